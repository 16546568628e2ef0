//! USB descriptor and identifier types
//!
//! This module defines the descriptor views the host-controller driver hands
//! to the accelerator tasks, the fixed VID/PID pairs used to route host
//! events, and the accelerator performance modes.

use crate::dfu::DfuFunctionalDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vendor ID of the accelerator once it runs application firmware
pub const ACCELERATOR_VID: u16 = 0x18d1;
/// Product ID of the accelerator once it runs application firmware
pub const ACCELERATOR_PID: u16 = 0x9302;
/// Vendor ID the accelerator's boot ROM enumerates with (DFU mode)
pub const DFU_VID: u16 = 0x1a6e;
/// Product ID the accelerator's boot ROM enumerates with (DFU mode)
pub const DFU_PID: u16 = 0x089a;

/// bInterfaceClass of the accelerator's vendor interface
pub const VENDOR_SPECIFIC_CLASS: u8 = 0xff;
/// bInterfaceClass of a DFU interface
pub const APPLICATION_SPECIFIC_CLASS: u8 = 0xfe;
/// bInterfaceSubClass of a DFU interface
pub const DFU_SUBCLASS: u8 = 0x01;

/// Host-assigned device handle
///
/// Valid from the attach event until the matching detach event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u32);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// VID/PID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbId {
    /// Accelerator in application mode
    pub const ACCELERATOR: UsbId = UsbId {
        vendor_id: ACCELERATOR_VID,
        product_id: ACCELERATOR_PID,
    };

    /// Accelerator boot ROM in DFU mode
    pub const DFU: UsbId = UsbId {
        vendor_id: DFU_VID,
        product_id: DFU_PID,
    };

    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Endpoint descriptor (only the fields the tasks use)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// bEndpointAddress, direction in bit 7
    pub address: u8,
    /// wMaxPacketSize
    pub max_packet_size: u16,
}

/// Interface descriptor with its endpoints and class-specific extras
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointDescriptor>,
    /// Present on DFU interfaces that carry a functional descriptor
    pub dfu_functional: Option<DfuFunctionalDescriptor>,
}

impl InterfaceDescriptor {
    /// Whether this is the accelerator's vendor-specific interface
    pub fn is_vendor_specific(&self) -> bool {
        self.class == VENDOR_SPECIFIC_CLASS
    }

    /// Whether this is a DFU interface
    pub fn is_dfu(&self) -> bool {
        self.class == APPLICATION_SPECIFIC_CLASS && self.subclass == DFU_SUBCLASS
    }
}

/// Parsed configuration descriptor as delivered with an attach event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDescriptor {
    /// Device VID/PID
    pub id: UsbId,
    /// bMaxPacketSize0 from the device descriptor
    pub max_packet_size0: u8,
    /// bConfigurationValue
    pub value: u8,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl ConfigDescriptor {
    /// First interface satisfying `pred`
    pub fn find_interface<F>(&self, pred: F) -> Option<&InterfaceDescriptor>
    where
        F: Fn(&InterfaceDescriptor) -> bool,
    {
        self.interfaces.iter().find(|iface| pred(*iface))
    }
}

/// Completion status of a control or bulk transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Success,
    /// Endpoint stalled the request
    Stall,
    Timeout,
    /// Device went away while the transfer was in flight
    Disconnected,
    /// Any other controller error
    Error,
}

impl TransferStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferStatus::Success)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Success => "success",
            TransferStatus::Stall => "stall",
            TransferStatus::Timeout => "timeout",
            TransferStatus::Disconnected => "disconnected",
            TransferStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Accelerator clock/performance mode selected when the device is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    Low,
    Medium,
    #[default]
    High,
    Max,
}

impl FromStr for PerformanceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(PerformanceMode::Low),
            "medium" => Ok(PerformanceMode::Medium),
            "high" => Ok(PerformanceMode::High),
            "max" => Ok(PerformanceMode::Max),
            other => Err(format!(
                "Invalid performance mode '{}', must be one of: low, medium, high, max",
                other
            )),
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PerformanceMode::Low => "low",
            PerformanceMode::Medium => "medium",
            PerformanceMode::High => "high",
            PerformanceMode::Max => "max",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(number: u8, class: u8, subclass: u8) -> InterfaceDescriptor {
        InterfaceDescriptor {
            number,
            alternate_setting: 0,
            class,
            subclass,
            protocol: 0,
            endpoints: Vec::new(),
            dfu_functional: None,
        }
    }

    #[test]
    fn test_interface_classification() {
        assert!(iface(0, 0xff, 0xff).is_vendor_specific());
        assert!(iface(0, 0xfe, 0x01).is_dfu());
        assert!(!iface(0, 0xfe, 0x02).is_dfu());
        assert!(!iface(0, 0x08, 0x06).is_vendor_specific());
    }

    #[test]
    fn test_find_interface() {
        let config = ConfigDescriptor {
            id: UsbId::ACCELERATOR,
            max_packet_size0: 64,
            value: 1,
            interfaces: vec![iface(0, 0x03, 0x00), iface(1, 0xff, 0xff)],
        };

        let found = config.find_interface(InterfaceDescriptor::is_vendor_specific);
        assert_eq!(found.map(|i| i.number), Some(1));
        assert!(config.find_interface(InterfaceDescriptor::is_dfu).is_none());
    }

    #[test]
    fn test_usb_id_display() {
        assert_eq!(UsbId::ACCELERATOR.to_string(), "18d1:9302");
        assert_eq!(UsbId::DFU.to_string(), "1a6e:089a");
    }

    #[test]
    fn test_performance_mode_parse() {
        assert_eq!("max".parse::<PerformanceMode>(), Ok(PerformanceMode::Max));
        assert_eq!("LOW".parse::<PerformanceMode>(), Ok(PerformanceMode::Low));
        assert!("turbo".parse::<PerformanceMode>().is_err());
        assert_eq!(PerformanceMode::default(), PerformanceMode::High);
    }
}
