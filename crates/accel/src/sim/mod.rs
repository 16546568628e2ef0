//! Simulated board
//!
//! Stands in for the host stack, the class drivers, the power GPIO and the
//! accelerator runtime so the whole lifecycle can run on a workstation. The
//! accelerator itself is [`AcceleratorModel`]: it enumerates with the boot
//! ROM identity after power-up, takes a runtime image over DFU and comes
//! back with the application identity after a bus reset.

pub mod device;
pub mod driver;
pub mod host;

pub use device::{AcceleratorModel, BootMode, SimOptions, SimStats};
pub use driver::{ExecutionRecord, SimAcceleratorDriver};
pub use host::{
    SIM_HOST_NAME, SharedModel, SimDfuClass, SimHost, SimHostController, SimHostRequest,
    SimPowerLines, SimVendorClass,
};

use crate::system::BoardIo;
use crate::usb::HostEventSink;
use common::{ActorHandle, create_mailbox};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::info;

pub struct SimBoard {
    model: SharedModel,
    host: ActorHandle<SimHost>,
    driver: Arc<SimAcceleratorDriver>,
    _thread: JoinHandle<()>,
}

impl SimBoard {
    /// Start the simulated host controller thread
    pub fn start(options: SimOptions, queue_depth: usize) -> common::Result<Self> {
        let model: SharedModel = Arc::new(Mutex::new(AcceleratorModel::new(options)));
        let (host, mailbox) = create_mailbox(SIM_HOST_NAME, queue_depth);
        let thread = mailbox.spawn(SimHost::new(model.clone()))?;
        let driver = Arc::new(SimAcceleratorDriver::new(model.clone()));

        info!("Simulated board started");
        Ok(Self {
            model,
            host,
            driver,
            _thread: thread,
        })
    }

    /// Peripherals for one firmware instance
    pub fn io(&self) -> BoardIo {
        BoardIo {
            host: Arc::new(SimHostController::new(self.host.clone())),
            vendor_class: Box::new(SimVendorClass::new(self.host.clone(), self.model.clone())),
            dfu_class: Box::new(SimDfuClass::new(self.host.clone(), self.model.clone())),
            power_lines: Box::new(SimPowerLines::new(self.host.clone(), self.model.clone())),
            driver: self.driver.clone(),
        }
    }

    /// Route host events to `sink` from now on
    pub fn bind(&self, sink: Arc<dyn HostEventSink>) {
        self.host.send_request(SimHostRequest::BindSink(sink));
    }

    pub fn driver(&self) -> &Arc<SimAcceleratorDriver> {
        &self.driver
    }

    pub fn stats(&self) -> SimStats {
        host::lock(&self.model).stats()
    }

    pub fn is_powered(&self) -> bool {
        host::lock(&self.model).is_powered()
    }

    pub fn mode(&self) -> BootMode {
        host::lock(&self.model).mode()
    }
}
