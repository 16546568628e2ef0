//! Descriptor, DFU and package definitions for the accelerator firmware
//!
//! This crate holds the data formats the accelerator tasks exchange with
//! their collaborators: USB descriptor views and the fixed VID/PID pairs,
//! DFU status reports, and the package container that carries compiled
//! executables.
//!
//! # Example
//!
//! ```
//! use protocol::{Executable, ExecutableKind, decode_package, encode_package};
//!
//! let exe = Executable {
//!     kind: ExecutableKind::StandAlone,
//!     caching_token: 0,
//!     instructions: &[0x10, 0x20],
//!     parameters: &[],
//! };
//!
//! let bytes = encode_package(&[exe]).unwrap();
//! let view = decode_package(&bytes).unwrap();
//! assert_eq!(view.executables[0].kind, ExecutableKind::StandAlone);
//! ```

pub mod dfu;
pub mod error;
pub mod integrity;
pub mod package;
pub mod states;
pub mod types;
pub mod version;

pub use dfu::{
    DFU_STATUS_LEN, DfuDeviceState, DfuFunctionalDescriptor, DfuStatus, DfuStatusCode,
};
pub use error::{ProtocolError, Result};
pub use package::{
    Executable, ExecutableKind, PACKAGE_MAGIC, PackageView, decode_package, encode_package,
};
pub use states::{AttachState, DfuState};
pub use types::{
    ACCELERATOR_PID, ACCELERATOR_VID, ConfigDescriptor, DFU_PID, DFU_VID, DeviceHandle,
    EndpointDescriptor, InterfaceDescriptor, PerformanceMode, TransferStatus, UsbId,
};
pub use version::{CURRENT_VERSION, PackageVersion};
