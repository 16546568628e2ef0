//! Host event routing
//!
//! The host stack reports every device through one sink. Events are handed
//! to the task responsible for the device's VID/PID and answered with that
//! task's status; anything else is declined.

use crate::usb::attach::AttachClient;
use crate::usb::dfu::DfuClient;
use crate::usb::host::{HostEvent, HostEventSink, HostEventStatus};
use protocol::UsbId;
use tracing::debug;

pub struct UsbEventRouter {
    attach: AttachClient,
    dfu: DfuClient,
}

impl UsbEventRouter {
    pub fn new(attach: AttachClient, dfu: DfuClient) -> Self {
        Self { attach, dfu }
    }
}

impl HostEventSink for UsbEventRouter {
    fn on_host_event(&self, event: HostEvent) -> HostEventStatus {
        let id = event.usb_id();
        debug!("Host {} event for {} ({})", event.kind(), event.device(), id);

        match id {
            UsbId::ACCELERATOR => self.attach.host_event(event),
            UsbId::DFU => self.dfu.host_event(event),
            _ => {
                debug!("No task handles {}", id);
                HostEventStatus::NotSupported
            }
        }
    }
}
