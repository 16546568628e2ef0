//! Recording fakes for the host contracts used by the task unit tests

use crate::usb::attach::DeviceObserver;
use crate::usb::host::{
    ClassHandle, DfuClassDriver, HostController, PowerLines, TransferCallback, UsbError,
    VendorClassDriver,
};
use protocol::{DeviceHandle, DfuDeviceState, DfuStatus, TransferStatus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    BusReset,
    Remove(DeviceHandle),
    Reenumerate,
}

#[derive(Clone, Default)]
pub struct FakeHost(pub Arc<Mutex<Vec<HostCall>>>);

impl FakeHost {
    pub fn calls(&self) -> Vec<HostCall> {
        self.0.lock().unwrap().clone()
    }
}

impl HostController for FakeHost {
    fn bus_reset(&self) {
        self.0.lock().unwrap().push(HostCall::BusReset);
    }

    fn remove_device(&self, device: DeviceHandle) {
        self.0.lock().unwrap().push(HostCall::Remove(device));
    }

    fn reenumerate(&self) {
        self.0.lock().unwrap().push(HostCall::Reenumerate);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Connected(DeviceHandle),
    Removed(DeviceHandle),
    Error,
}

#[derive(Clone, Default)]
pub struct RecordingObserver(pub Arc<Mutex<Vec<Notification>>>);

impl RecordingObserver {
    pub fn events(&self) -> Vec<Notification> {
        self.0.lock().unwrap().clone()
    }
}

impl DeviceObserver for RecordingObserver {
    fn device_connected(&self, device: DeviceHandle) {
        self.0.lock().unwrap().push(Notification::Connected(device));
    }

    fn device_removed(&self, device: DeviceHandle) {
        self.0.lock().unwrap().push(Notification::Removed(device));
    }

    fn device_error(&self) {
        self.0.lock().unwrap().push(Notification::Error);
    }
}

/// Power lines whose power-good follows the enable line immediately
#[derive(Clone, Default)]
pub struct InstantLines(pub Arc<Mutex<(bool, bool)>>);

impl InstantLines {
    /// (power enabled, reset high)
    pub fn lines(&self) -> (bool, bool) {
        *self.0.lock().unwrap()
    }
}

impl PowerLines for InstantLines {
    fn set_power_enable(&mut self, enabled: bool) {
        self.0.lock().unwrap().0 = enabled;
    }

    fn power_good(&self) -> bool {
        self.0.lock().unwrap().0
    }

    fn set_reset_line(&mut self, high: bool) {
        self.0.lock().unwrap().1 = high;
    }
}

#[derive(Default)]
pub struct VendorState {
    pub calls: Vec<&'static str>,
    /// Statuses handed to the next completions, `Success` when empty
    pub statuses: VecDeque<TransferStatus>,
    /// Completions held back instead of fired
    pub held: Vec<TransferCallback>,
    pub hold: bool,
}

#[derive(Clone, Default)]
pub struct FakeVendor(pub Arc<Mutex<VendorState>>);

impl FakeVendor {
    fn complete(&self, name: &'static str, callback: TransferCallback) {
        let mut s = self.0.lock().unwrap();
        s.calls.push(name);
        if s.hold {
            s.held.push(callback);
            return;
        }
        let status = s.statuses.pop_front().unwrap_or(TransferStatus::Success);
        drop(s);
        callback(status, Vec::new());
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().calls.clone()
    }
}

impl VendorClassDriver for FakeVendor {
    fn init(&mut self, _device: DeviceHandle, _interface: u8) -> Result<ClassHandle, UsbError> {
        self.0.lock().unwrap().calls.push("init");
        Ok(ClassHandle(1))
    }

    fn deinit(&mut self, _class: ClassHandle) {
        self.0.lock().unwrap().calls.push("deinit");
    }

    fn set_interface(
        &mut self,
        _class: ClassHandle,
        _alternate_setting: u8,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.complete("set_interface", callback);
        Ok(())
    }

    fn get_status(
        &mut self,
        _class: ClassHandle,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.complete("get_status", callback);
        Ok(())
    }
}

/// DFU device model that stores downloads and serves them back
#[derive(Default)]
pub struct DfuModel {
    pub downloads: Vec<(u16, usize)>,
    pub uploads: Vec<(u16, usize)>,
    pub flash: Vec<u8>,
    pub read_offset: usize,
    /// XOR applied to the first uploaded byte
    pub corrupt: u8,
    pub status: Option<DfuStatus>,
    pub calls: Vec<&'static str>,
}

#[derive(Clone, Default)]
pub struct FakeDfu(pub Arc<Mutex<DfuModel>>);

impl FakeDfu {
    pub fn corrupting(mask: u8) -> Self {
        let dfu = Self::default();
        dfu.0.lock().unwrap().corrupt = mask;
        dfu
    }

    pub fn download_sizes(&self) -> Vec<usize> {
        self.0.lock().unwrap().downloads.iter().map(|d| d.1).collect()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().calls.clone()
    }
}

impl DfuClassDriver for FakeDfu {
    fn init(&mut self, _device: DeviceHandle, _interface: u8) -> Result<ClassHandle, UsbError> {
        self.0.lock().unwrap().calls.push("init");
        Ok(ClassHandle(7))
    }

    fn deinit(&mut self, _class: ClassHandle) {
        self.0.lock().unwrap().calls.push("deinit");
    }

    fn set_interface(
        &mut self,
        _class: ClassHandle,
        _alternate_setting: u8,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.0.lock().unwrap().calls.push("set_interface");
        callback(TransferStatus::Success, Vec::new());
        Ok(())
    }

    fn get_status(
        &mut self,
        _class: ClassHandle,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        let status = {
            let mut s = self.0.lock().unwrap();
            s.calls.push("get_status");
            s.status.unwrap_or(DfuStatus::ok(DfuDeviceState::DfuIdle))
        };
        callback(TransferStatus::Success, status.to_bytes().to_vec());
        Ok(())
    }

    fn download(
        &mut self,
        _class: ClassHandle,
        block: u16,
        data: &[u8],
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        {
            let mut s = self.0.lock().unwrap();
            s.calls.push("download");
            s.downloads.push((block, data.len()));
            s.flash.extend_from_slice(data);
        }
        callback(TransferStatus::Success, Vec::new());
        Ok(())
    }

    fn upload(
        &mut self,
        _class: ClassHandle,
        block: u16,
        length: usize,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        let data = {
            let mut s = self.0.lock().unwrap();
            s.calls.push("upload");
            s.uploads.push((block, length));
            let start = s.read_offset;
            let end = (start + length).min(s.flash.len());
            let mut data = s.flash[start..end].to_vec();
            if start == 0
                && let Some(first) = data.first_mut()
            {
                *first ^= s.corrupt;
            }
            s.read_offset = end;
            data
        };
        callback(TransferStatus::Success, data);
        Ok(())
    }

    fn detach(
        &mut self,
        _class: ClassHandle,
        _timeout_ms: u16,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.0.lock().unwrap().calls.push("detach");
        callback(TransferStatus::Success, Vec::new());
        Ok(())
    }
}
