//! Accelerator firmware
//!
//! Brings a USB-attached inference accelerator up from cold: power
//! sequencing, a DFU download of the runtime image with read-back
//! verification, the vendor-class attach handshake, and a manager that
//! shares the open device, verifies packages and runs them.
//!
//! [`sim`] provides a software board so the whole lifecycle can run
//! without hardware.

pub mod config;
pub mod firmware_image;
pub mod manager;
pub mod sim;
pub mod system;
pub mod usb;

pub use config::AccelConfig;
pub use firmware_image::{APEX_LATEST_SINGLE_EP, FirmwareImage};
pub use manager::{AcceleratorManager, DeviceContext, ManagerError, ManagerSettings};
pub use system::{AcceleratorSystem, BoardIo};
