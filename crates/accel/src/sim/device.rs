//! Behavioural model of the accelerator and its boot ROM

use protocol::{
    ConfigDescriptor, DeviceHandle, DfuDeviceState, DfuFunctionalDescriptor, DfuStatus,
    EndpointDescriptor, InterfaceDescriptor, TransferStatus, UsbId,
};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Which USB personality the accelerator enumerates with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Boot ROM waiting for a runtime image
    Dfu,
    /// Runtime image running
    Application,
}

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub power_good_delay: Duration,
    /// wTransferSize advertised by the boot ROM
    pub transfer_size: u16,
    /// Flip a bit in the first byte served back over DFU_UPLOAD
    pub corrupt_readback: bool,
    /// Enumerate the application personality without its vendor interface
    pub omit_vendor_interface: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            power_good_delay: Duration::from_millis(2),
            transfer_size: 256,
            corrupt_readback: false,
            omit_vendor_interface: false,
        }
    }
}

/// Counters exposed for tests and the demo summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub power_cycles: u32,
    pub enumerations: u32,
    pub images_flashed: u32,
    pub bytes_downloaded: usize,
    pub bytes_uploaded: usize,
}

pub struct AcceleratorModel {
    options: SimOptions,
    powered_at: Option<Instant>,
    reset_high: bool,
    mode: BootMode,
    /// Host handle and the identity it enumerated with
    attached: Option<(DeviceHandle, UsbId)>,
    download: Vec<u8>,
    flash: Option<Vec<u8>>,
    upload_offset: usize,
    detach_requested: bool,
    dfu_state: DfuDeviceState,
    stats: SimStats,
}

impl AcceleratorModel {
    pub fn new(options: SimOptions) -> Self {
        Self {
            options,
            powered_at: None,
            reset_high: false,
            mode: BootMode::Dfu,
            attached: None,
            download: Vec::new(),
            flash: None,
            upload_offset: 0,
            detach_requested: false,
            dfu_state: DfuDeviceState::DfuIdle,
            stats: SimStats::default(),
        }
    }

    pub fn set_power(&mut self, on: bool) {
        match (on, self.powered_at.is_some()) {
            (true, false) => {
                self.powered_at = Some(Instant::now());
                self.stats.power_cycles += 1;
            }
            (false, true) => {
                // The runtime lives in RAM; losing power drops back to the boot ROM.
                self.powered_at = None;
                self.mode = BootMode::Dfu;
                self.flash = None;
                self.reset_dfu();
            }
            _ => {}
        }
    }

    pub fn is_powered(&self) -> bool {
        self.powered_at.is_some()
    }

    pub fn power_good(&self) -> bool {
        self.powered_at
            .is_some_and(|at| at.elapsed() >= self.options.power_good_delay)
    }

    pub fn set_reset(&mut self, high: bool) {
        self.reset_high = high;
    }

    /// Powered and out of reset
    pub fn is_running(&self) -> bool {
        self.is_powered() && self.reset_high
    }

    pub fn mode(&self) -> BootMode {
        self.mode
    }

    pub fn attached(&self) -> Option<DeviceHandle> {
        self.attached.map(|(device, _)| device)
    }

    /// Bind the model to a host handle on connect
    pub fn enumerate(&mut self, device: DeviceHandle) -> ConfigDescriptor {
        self.attached = Some((device, self.usb_id()));
        self.stats.enumerations += 1;
        self.config_descriptor()
    }

    pub fn disconnect(&mut self) -> Option<(DeviceHandle, UsbId)> {
        self.attached.take()
    }

    /// Whether `device` is what is currently on the bus in `mode`
    pub fn is_attached_as(&self, device: DeviceHandle, mode: BootMode) -> bool {
        self.attached() == Some(device) && self.mode == mode
    }

    pub fn bus_reset(&mut self) {
        if self.detach_requested && self.flash.is_some() {
            info!("Simulated accelerator booting runtime image");
            self.mode = BootMode::Application;
        }
        self.reset_dfu();
    }

    pub fn download(&mut self, block: u16, data: &[u8]) -> TransferStatus {
        if data.is_empty() {
            debug!(
                "Boot ROM manifesting {} bytes after block {}",
                self.download.len(),
                block
            );
            self.flash = Some(std::mem::take(&mut self.download));
            self.stats.images_flashed += 1;
            self.dfu_state = DfuDeviceState::DfuIdle;
            return TransferStatus::Success;
        }

        if data.len() > usize::from(self.options.transfer_size) {
            self.dfu_state = DfuDeviceState::Error;
            return TransferStatus::Stall;
        }

        self.download.extend_from_slice(data);
        self.stats.bytes_downloaded += data.len();
        self.dfu_state = DfuDeviceState::DnloadIdle;
        TransferStatus::Success
    }

    pub fn upload(&mut self, length: usize) -> Vec<u8> {
        let Some(flash) = &self.flash else {
            return Vec::new();
        };

        let start = self.upload_offset.min(flash.len());
        let end = (start + length).min(flash.len());
        let mut data = flash[start..end].to_vec();
        if start == 0
            && self.options.corrupt_readback
            && let Some(first) = data.first_mut()
        {
            *first ^= 0x01;
        }

        self.upload_offset = end;
        self.stats.bytes_uploaded += data.len();
        self.dfu_state = DfuDeviceState::UploadIdle;
        data
    }

    pub fn request_detach(&mut self) {
        self.detach_requested = true;
    }

    pub fn dfu_status(&self) -> DfuStatus {
        DfuStatus::ok(self.dfu_state)
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    fn usb_id(&self) -> UsbId {
        match self.mode {
            BootMode::Dfu => UsbId::DFU,
            BootMode::Application => UsbId::ACCELERATOR,
        }
    }

    fn reset_dfu(&mut self) {
        self.download.clear();
        self.upload_offset = 0;
        self.detach_requested = false;
        self.dfu_state = DfuDeviceState::DfuIdle;
    }

    fn config_descriptor(&self) -> ConfigDescriptor {
        let interface = match self.mode {
            BootMode::Dfu => InterfaceDescriptor {
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
                    detach_timeout_ms: 500,
                    transfer_size: self.options.transfer_size,
                    dfu_version: 0x0110,
                }),
            },
            BootMode::Application if self.options.omit_vendor_interface => InterfaceDescriptor {
                number: 0,
                alternate_setting: 0,
                class: 0x08,
                subclass: 0x06,
                protocol: 0x50,
                endpoints: Vec::new(),
                dfu_functional: None,
            },
            BootMode::Application => InterfaceDescriptor {
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
                    EndpointDescriptor {
                        address: 0x82,
                        max_packet_size: 512,
                    },
                ],
                dfu_functional: None,
            },
        };

        ConfigDescriptor {
            id: self.usb_id(),
            max_packet_size0: 64,
            value: 1,
            interfaces: vec![interface],
        }
    }
}
