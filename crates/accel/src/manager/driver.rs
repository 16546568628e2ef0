//! Accelerator runtime driver contract

use protocol::{DeviceHandle, Executable, PerformanceMode};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("accelerator is not open")]
    NotOpen,

    #[error("hardware initialisation failed: {0}")]
    Init(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

/// Runtime that talks to the connected accelerator
///
/// Calls are serialised by the manager's state lock.
pub trait AcceleratorDriver: Send + Sync {
    /// Bring the runtime up on a connected device
    fn open(&self, device: DeviceHandle, mode: PerformanceMode) -> Result<(), DriverError>;

    /// Release the runtime before the device is powered down
    fn close(&self);

    /// Run one executable to completion
    fn execute(&self, executable: &Executable<'static>) -> Result<(), DriverError>;

    /// Die temperature in degrees Celsius
    fn temperature(&self) -> Option<f32>;
}
