//! Test utilities for the accelerator firmware
//!
//! Provides mock descriptors and helpers for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_accelerator_config;
//!
//! let config = create_mock_accelerator_config();
//! assert!(config.interfaces.iter().any(|i| i.is_vendor_specific()));
//! ```

use protocol::{
    ConfigDescriptor, DeviceHandle, DfuFunctionalDescriptor, EndpointDescriptor,
    InterfaceDescriptor, UsbId,
};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceHandle for testing
pub fn create_mock_handle(id: u32) -> DeviceHandle {
    DeviceHandle(id)
}

/// Configuration descriptor of the accelerator in application mode
///
/// One vendor-specific interface with a bulk OUT/IN endpoint pair.
pub fn create_mock_accelerator_config() -> ConfigDescriptor {
    ConfigDescriptor {
        id: UsbId::ACCELERATOR,
        max_packet_size0: 64,
        value: 1,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            alternate_setting: 0,
            class: 0xff,
            subclass: 0xff,
            protocol: 0xff,
            endpoints: vec![
                EndpointDescriptor {
                    address: 0x01,
                    max_packet_size: 512,
                },
                EndpointDescriptor {
                    address: 0x81,
                    max_packet_size: 512,
                },
            ],
            dfu_functional: None,
        }],
    }
}

/// Configuration descriptor of the accelerator boot ROM (DFU mode)
///
/// # Arguments
/// * `transfer_size` - wTransferSize advertised by the functional descriptor
pub fn create_mock_dfu_config(transfer_size: u16) -> ConfigDescriptor {
    ConfigDescriptor {
        id: UsbId::DFU,
        max_packet_size0: 64,
        value: 1,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            alternate_setting: 0,
            class: 0xfe,
            subclass: 0x01,
            protocol: 0x02,
            endpoints: Vec::new(),
            dfu_functional: Some(DfuFunctionalDescriptor {
                attributes: DfuFunctionalDescriptor::CAN_DOWNLOAD
                    | DfuFunctionalDescriptor::CAN_UPLOAD
                    | DfuFunctionalDescriptor::WILL_DETACH,
                detach_timeout_ms: 1000,
                transfer_size,
                dfu_version: 0x0110,
            }),
        }],
    }
}

/// Configuration descriptor with only a HID interface
pub fn create_mock_hid_config(id: UsbId) -> ConfigDescriptor {
    ConfigDescriptor {
        id,
        max_packet_size0: 8,
        value: 1,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            alternate_setting: 0,
            class: 0x03,
            subclass: 0x01,
            protocol: 0x01,
            endpoints: vec![EndpointDescriptor {
                address: 0x81,
                max_packet_size: 8,
            }],
            dfu_functional: None,
        }],
    }
}

/// Deterministic firmware-like byte pattern
pub fn create_mock_firmware(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Poll `condition` until it holds or `timeout` elapses
///
/// # Example
/// ```
/// use common::test_utils::wait_until;
/// use std::time::Duration;
///
/// assert!(wait_until(Duration::from_millis(10), || true).is_ok());
/// ```
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> Result<(), TimeoutError>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(TimeoutError { duration: timeout });
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
