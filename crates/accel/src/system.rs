//! Firmware bring-up
//!
//! Spawns the attach and DFU tasks, wires them to one [`AcceleratorLink`]
//! and builds the manager on top. The host stack is bound separately via
//! [`AcceleratorSystem::event_sink`] so it can be started first.

use crate::config::AccelConfig;
use crate::firmware_image::FirmwareImage;
use crate::manager::{AcceleratorDriver, AcceleratorLink, AcceleratorManager};
use crate::usb::{
    AttachClient, AttachIo, DeviceObserver, DfuClassDriver, DfuClient, DfuIo, HostController,
    HostEventSink, PowerLines, UsbEventRouter, VendorClassDriver, spawn_attach_task,
    spawn_dfu_task,
};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// Board peripherals the firmware runs against
pub struct BoardIo {
    pub host: Arc<dyn HostController>,
    pub vendor_class: Box<dyn VendorClassDriver>,
    pub dfu_class: Box<dyn DfuClassDriver>,
    pub power_lines: Box<dyn PowerLines>,
    pub driver: Arc<dyn AcceleratorDriver>,
}

pub struct AcceleratorSystem {
    manager: AcceleratorManager,
    attach: AttachClient,
    dfu: DfuClient,
    router: Arc<UsbEventRouter>,
    _tasks: [JoinHandle<()>; 2],
}

impl AcceleratorSystem {
    pub fn start(
        config: &AccelConfig,
        image: FirmwareImage,
        io: BoardIo,
    ) -> common::Result<Self> {
        let link = AcceleratorLink::new();
        let observer: Arc<dyn DeviceObserver> = Arc::new(link.clone());
        let queue_depth = config.tasks.queue_depth;

        let (attach, attach_thread) = spawn_attach_task(
            queue_depth,
            &config.attach_settings(),
            AttachIo {
                lines: io.power_lines,
                driver: io.vendor_class,
                host: io.host.clone(),
                observer: observer.clone(),
            },
        )?;

        info!(
            "Runtime image {} ({} bytes, crc32 {:08x})",
            image.name(),
            image.len(),
            image.checksum()
        );
        let (dfu, dfu_thread) = spawn_dfu_task(
            queue_depth,
            image,
            config.dfu_settings(),
            DfuIo {
                driver: io.dfu_class,
                host: io.host,
                observer,
            },
        )?;

        let router = Arc::new(UsbEventRouter::new(attach.clone(), dfu.clone()));
        let manager = AcceleratorManager::new(
            link,
            Arc::new(attach.clone()),
            io.driver,
            config.manager_settings(),
        );

        Ok(Self {
            manager,
            attach,
            dfu,
            router,
            _tasks: [attach_thread, dfu_thread],
        })
    }

    pub fn manager(&self) -> &AcceleratorManager {
        &self.manager
    }

    pub fn attach(&self) -> &AttachClient {
        &self.attach
    }

    pub fn dfu(&self) -> &DfuClient {
        &self.dfu
    }

    /// Sink to register with the host stack
    pub fn event_sink(&self) -> Arc<dyn HostEventSink> {
        self.router.clone()
    }
}
