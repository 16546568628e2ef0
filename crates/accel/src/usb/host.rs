//! Host-controller contracts
//!
//! The raw USB host stack lives outside this crate. It reaches the
//! accelerator tasks through a [`HostEventSink`] and is driven back through
//! the [`HostController`], [`VendorClassDriver`], [`DfuClassDriver`] and
//! [`PowerLines`] traits.
//!
//! Transfer submission never blocks: the driver queues the request and later
//! invokes the [`TransferCallback`] from its own completion context. Callbacks
//! must only post into an actor queue.

use protocol::{ConfigDescriptor, DeviceHandle, TransferStatus, UsbId};
use std::fmt;
use thiserror::Error;

/// Completion of a submitted transfer: status plus any IN data
pub type TransferCallback = Box<dyn FnOnce(TransferStatus, Vec<u8>) + Send + 'static>;

/// Event delivered by the host stack
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A device appeared and its configuration descriptor was read
    Attach {
        device: DeviceHandle,
        config: ConfigDescriptor,
    },
    /// The host finished configuring a device we accepted
    EnumerationDone { device: DeviceHandle, id: UsbId },
    EnumerationFailed { device: DeviceHandle, id: UsbId },
    Detach { device: DeviceHandle, id: UsbId },
}

impl HostEvent {
    pub fn device(&self) -> DeviceHandle {
        match self {
            HostEvent::Attach { device, .. }
            | HostEvent::EnumerationDone { device, .. }
            | HostEvent::EnumerationFailed { device, .. }
            | HostEvent::Detach { device, .. } => *device,
        }
    }

    /// VID/PID the event is routed on
    pub fn usb_id(&self) -> UsbId {
        match self {
            HostEvent::Attach { config, .. } => config.id,
            HostEvent::EnumerationDone { id, .. }
            | HostEvent::EnumerationFailed { id, .. }
            | HostEvent::Detach { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HostEvent::Attach { .. } => "attach",
            HostEvent::EnumerationDone { .. } => "enumeration-done",
            HostEvent::EnumerationFailed { .. } => "enumeration-failed",
            HostEvent::Detach { .. } => "detach",
        }
    }
}

/// Answer returned to the host stack for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEventStatus {
    Success,
    /// The device or event is not handled here; the host should leave it alone
    NotSupported,
    Error,
}

impl fmt::Display for HostEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostEventStatus::Success => "success",
            HostEventStatus::NotSupported => "not-supported",
            HostEventStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Receiver of host events, called from the host stack's context
pub trait HostEventSink: Send + Sync {
    fn on_host_event(&self, event: HostEvent) -> HostEventStatus;
}

/// Root-port operations of the host controller
pub trait HostController: Send + Sync {
    /// Drive a reset on the bus the accelerator hangs off
    fn bus_reset(&self);

    /// Drop the host's bookkeeping for a detached device
    fn remove_device(&self, device: DeviceHandle);

    /// Enumerate whatever is on the bus again
    fn reenumerate(&self);
}

/// Class driver instance created by `init`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassHandle(pub u32);

/// Vendor-class driver used while the accelerator runs application firmware
pub trait VendorClassDriver: Send {
    fn init(&mut self, device: DeviceHandle, interface: u8) -> Result<ClassHandle, UsbError>;

    fn deinit(&mut self, class: ClassHandle);

    fn set_interface(
        &mut self,
        class: ClassHandle,
        alternate_setting: u8,
        callback: TransferCallback,
    ) -> Result<(), UsbError>;

    fn get_status(&mut self, class: ClassHandle, callback: TransferCallback)
    -> Result<(), UsbError>;
}

/// DFU 1.1 class driver used while the accelerator sits in its boot ROM
pub trait DfuClassDriver: Send {
    fn init(&mut self, device: DeviceHandle, interface: u8) -> Result<ClassHandle, UsbError>;

    fn deinit(&mut self, class: ClassHandle);

    fn set_interface(
        &mut self,
        class: ClassHandle,
        alternate_setting: u8,
        callback: TransferCallback,
    ) -> Result<(), UsbError>;

    /// DFU_GETSTATUS; the callback receives the six status bytes
    fn get_status(&mut self, class: ClassHandle, callback: TransferCallback)
    -> Result<(), UsbError>;

    /// DFU_DNLOAD of one block; an empty block ends the download
    fn download(
        &mut self,
        class: ClassHandle,
        block: u16,
        data: &[u8],
        callback: TransferCallback,
    ) -> Result<(), UsbError>;

    /// DFU_UPLOAD of up to `length` bytes
    fn upload(
        &mut self,
        class: ClassHandle,
        block: u16,
        length: usize,
        callback: TransferCallback,
    ) -> Result<(), UsbError>;

    fn detach(
        &mut self,
        class: ClassHandle,
        timeout_ms: u16,
        callback: TransferCallback,
    ) -> Result<(), UsbError>;
}

/// Board GPIO feeding the accelerator
///
/// The reset line is active-low: driving it high lets the accelerator run.
pub trait PowerLines: Send {
    fn set_power_enable(&mut self, enabled: bool);

    /// PMIC power-good input
    fn power_good(&self) -> bool;

    fn set_reset_line(&mut self, high: bool);
}

/// Class driver submission failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsbError {
    #[error("device {0} is not attached")]
    NoDevice(DeviceHandle),

    #[error("class driver instance {0:?} is not initialised")]
    NotInitialized(ClassHandle),

    #[error("class driver has no free instance")]
    NoResources,

    #[error("transfer submission rejected: {0}")]
    Submit(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_accelerator_config, create_mock_handle};

    #[test]
    fn test_event_routing_id() {
        let attach = HostEvent::Attach {
            device: create_mock_handle(3),
            config: create_mock_accelerator_config(),
        };
        assert_eq!(attach.usb_id(), UsbId::ACCELERATOR);
        assert_eq!(attach.device(), DeviceHandle(3));
        assert_eq!(attach.kind(), "attach");

        let detach = HostEvent::Detach {
            device: create_mock_handle(4),
            id: UsbId::DFU,
        };
        assert_eq!(detach.usb_id(), UsbId::DFU);
        assert_eq!(detach.kind(), "detach");
    }

    #[test]
    fn test_usb_error_display() {
        let err = UsbError::NoDevice(DeviceHandle(9));
        assert_eq!(err.to_string(), "device dev#9 is not attached");
    }
}
