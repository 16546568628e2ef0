//! Common utilities for the accelerator firmware
//!
//! This crate provides the pieces shared by every task: the actor primitive
//! used for all cross-task requests, the shared error type, logging setup,
//! and helpers for tests.

pub mod actor;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use actor::{Actor, ActorHandle, Mailbox, create_mailbox, spawn_actor};
pub use error::{Error, Result};
pub use logging::{setup_logging, setup_test_logging};
