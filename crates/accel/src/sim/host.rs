//! Simulated host controller, class drivers and power GPIO
//!
//! The host controller is an actor: connects, disconnects, bus resets and
//! transfer completions are all queued to its thread, which delivers host
//! events to the bound sink and runs completion callbacks. Class driver
//! calls never block on it.

use crate::sim::device::{AcceleratorModel, BootMode};
use crate::usb::{
    ClassHandle, DfuClassDriver, HostController, HostEvent, HostEventSink, HostEventStatus,
    PowerLines, TransferCallback, UsbError, VendorClassDriver,
};
use common::{Actor, ActorHandle};
use protocol::{DeviceHandle, TransferStatus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

pub const SIM_HOST_NAME: &str = "sim-host";

pub type SharedModel = Arc<Mutex<AcceleratorModel>>;

pub(crate) fn lock(model: &SharedModel) -> MutexGuard<'_, AcceleratorModel> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

pub enum SimHostRequest {
    BindSink(Arc<dyn HostEventSink>),
    Connect,
    Disconnect,
    BusReset,
    Remove(DeviceHandle),
    Complete {
        callback: TransferCallback,
        status: TransferStatus,
        data: Vec<u8>,
    },
}

pub struct SimHost {
    model: SharedModel,
    sink: Option<Arc<dyn HostEventSink>>,
    next_device: u32,
}

impl SimHost {
    pub fn new(model: SharedModel) -> Self {
        Self {
            model,
            sink: None,
            next_device: 1,
        }
    }

    fn deliver(&self, event: HostEvent) -> HostEventStatus {
        match &self.sink {
            Some(sink) => sink.on_host_event(event),
            None => {
                warn!("No host event sink bound, dropping {} event", event.kind());
                HostEventStatus::NotSupported
            }
        }
    }

    fn connect(&mut self) {
        let device = DeviceHandle(self.next_device);
        let config = {
            let mut model = lock(&self.model);
            if !model.is_running() || model.attached().is_some() {
                return;
            }
            model.enumerate(device)
        };
        self.next_device = self.next_device.wrapping_add(1);

        let id = config.id;
        debug!("Simulated {} connected as {}", id, device);
        match self.deliver(HostEvent::Attach { device, config }) {
            HostEventStatus::Success => {
                self.deliver(HostEvent::EnumerationDone { device, id });
            }
            status => debug!("{} left unconfigured ({})", device, status),
        }
    }

    fn disconnect(&mut self) {
        let gone = lock(&self.model).disconnect();
        if let Some((device, id)) = gone {
            debug!("Simulated {} disconnected", device);
            self.deliver(HostEvent::Detach { device, id });
        }
    }
}

impl Actor for SimHost {
    type Request = SimHostRequest;
    type Response = ();

    fn handle(&mut self, request: SimHostRequest) {
        match request {
            SimHostRequest::BindSink(sink) => self.sink = Some(sink),
            SimHostRequest::Connect => self.connect(),
            SimHostRequest::Disconnect => self.disconnect(),
            SimHostRequest::BusReset => {
                lock(&self.model).bus_reset();
                self.disconnect();
            }
            SimHostRequest::Remove(device) => debug!("Host released {}", device),
            SimHostRequest::Complete {
                callback,
                status,
                data,
            } => callback(status, data),
        }
    }
}

/// [`HostController`] view of the simulated host
#[derive(Clone)]
pub struct SimHostController {
    host: ActorHandle<SimHost>,
}

impl SimHostController {
    pub fn new(host: ActorHandle<SimHost>) -> Self {
        Self { host }
    }
}

impl HostController for SimHostController {
    fn bus_reset(&self) {
        self.host.send_request_async(SimHostRequest::BusReset);
    }

    fn remove_device(&self, device: DeviceHandle) {
        self.host.send_request_async(SimHostRequest::Remove(device));
    }

    fn reenumerate(&self) {
        self.host.send_request_async(SimHostRequest::Connect);
    }
}

/// Class driver plumbing shared by the vendor and DFU drivers
struct ClassCore {
    host: ActorHandle<SimHost>,
    model: SharedModel,
    mode: BootMode,
    instance: Option<(ClassHandle, DeviceHandle)>,
    next_class: u32,
}

impl ClassCore {
    fn new(host: ActorHandle<SimHost>, model: SharedModel, mode: BootMode) -> Self {
        Self {
            host,
            model,
            mode,
            instance: None,
            next_class: 1,
        }
    }

    fn init(&mut self, device: DeviceHandle) -> Result<ClassHandle, UsbError> {
        if !lock(&self.model).is_attached_as(device, self.mode) {
            return Err(UsbError::NoDevice(device));
        }
        if self.instance.is_some() {
            return Err(UsbError::NoResources);
        }

        let class = ClassHandle(self.next_class);
        self.next_class += 1;
        self.instance = Some((class, device));
        Ok(class)
    }

    fn deinit(&mut self, class: ClassHandle) {
        if self.instance.is_some_and(|(c, _)| c == class) {
            self.instance = None;
        }
    }

    /// Run `op` against the model and queue its completion
    fn submit<F>(&self, class: ClassHandle, callback: TransferCallback, op: F) -> Result<(), UsbError>
    where
        F: FnOnce(&mut AcceleratorModel) -> (TransferStatus, Vec<u8>),
    {
        let Some((_, device)) = self.instance.filter(|(c, _)| *c == class) else {
            return Err(UsbError::NotInitialized(class));
        };

        let (status, data) = {
            let mut model = lock(&self.model);
            if model.is_attached_as(device, self.mode) {
                op(&mut model)
            } else {
                (TransferStatus::Disconnected, Vec::new())
            }
        };

        self.host
            .try_send_request_async(SimHostRequest::Complete {
                callback,
                status,
                data,
            })
            .map_err(|e| UsbError::Submit(e.to_string()))
    }
}

pub struct SimVendorClass {
    core: ClassCore,
}

impl SimVendorClass {
    pub fn new(host: ActorHandle<SimHost>, model: SharedModel) -> Self {
        Self {
            core: ClassCore::new(host, model, BootMode::Application),
        }
    }
}

impl VendorClassDriver for SimVendorClass {
    fn init(&mut self, device: DeviceHandle, _interface: u8) -> Result<ClassHandle, UsbError> {
        self.core.init(device)
    }

    fn deinit(&mut self, class: ClassHandle) {
        self.core.deinit(class);
    }

    fn set_interface(
        &mut self,
        class: ClassHandle,
        _alternate_setting: u8,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.core
            .submit(class, callback, |_| (TransferStatus::Success, Vec::new()))
    }

    fn get_status(
        &mut self,
        class: ClassHandle,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        // Self-powered, remote wakeup off.
        self.core
            .submit(class, callback, |_| (TransferStatus::Success, vec![0x01, 0x00]))
    }
}

pub struct SimDfuClass {
    core: ClassCore,
}

impl SimDfuClass {
    pub fn new(host: ActorHandle<SimHost>, model: SharedModel) -> Self {
        Self {
            core: ClassCore::new(host, model, BootMode::Dfu),
        }
    }
}

impl DfuClassDriver for SimDfuClass {
    fn init(&mut self, device: DeviceHandle, _interface: u8) -> Result<ClassHandle, UsbError> {
        self.core.init(device)
    }

    fn deinit(&mut self, class: ClassHandle) {
        self.core.deinit(class);
    }

    fn set_interface(
        &mut self,
        class: ClassHandle,
        _alternate_setting: u8,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.core
            .submit(class, callback, |_| (TransferStatus::Success, Vec::new()))
    }

    fn get_status(
        &mut self,
        class: ClassHandle,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.core.submit(class, callback, |model| {
            (TransferStatus::Success, model.dfu_status().to_bytes().to_vec())
        })
    }

    fn download(
        &mut self,
        class: ClassHandle,
        block: u16,
        data: &[u8],
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.core
            .submit(class, callback, |model| (model.download(block, data), Vec::new()))
    }

    fn upload(
        &mut self,
        class: ClassHandle,
        _block: u16,
        length: usize,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.core
            .submit(class, callback, |model| (TransferStatus::Success, model.upload(length)))
    }

    fn detach(
        &mut self,
        class: ClassHandle,
        _timeout_ms: u16,
        callback: TransferCallback,
    ) -> Result<(), UsbError> {
        self.core.submit(class, callback, |model| {
            model.request_detach();
            (TransferStatus::Success, Vec::new())
        })
    }
}

/// PMIC enable, power-good and reset GPIO of the simulated board
pub struct SimPowerLines {
    host: ActorHandle<SimHost>,
    model: SharedModel,
}

impl SimPowerLines {
    pub fn new(host: ActorHandle<SimHost>, model: SharedModel) -> Self {
        Self { host, model }
    }
}

impl PowerLines for SimPowerLines {
    fn set_power_enable(&mut self, enabled: bool) {
        lock(&self.model).set_power(enabled);
        if !enabled {
            self.host.send_request_async(SimHostRequest::Disconnect);
        }
    }

    fn power_good(&self) -> bool {
        lock(&self.model).power_good()
    }

    fn set_reset_line(&mut self, high: bool) {
        lock(&self.model).set_reset(high);
        let request = if high {
            SimHostRequest::Connect
        } else {
            SimHostRequest::Disconnect
        };
        self.host.send_request_async(request);
    }
}
