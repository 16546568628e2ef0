//! Accelerator power/attach task
//!
//! Owns the power reference count and the vendor-class attach handshake:
//!
//! ```text
//! Attach ──► (interface claimed) ── EnumerationDone ──► Attached
//!   ──► SetInterface ──► GetStatus ──► Connected
//! ```
//!
//! Any failed transfer moves the task to `Error` and raises a fatal error
//! with the [`DeviceObserver`]; a detach in any state returns it to
//! `Unattached`. Transfer completions re-enter the task through its own
//! queue and carry the attach cycle they were issued in, so completions
//! from a device that has since gone away are dropped.

use crate::usb::host::{
    ClassHandle, HostController, HostEvent, HostEventStatus, PowerLines, TransferCallback,
    VendorClassDriver,
};
use crate::usb::power::PowerSequencer;
use common::{Actor, ActorHandle, create_mailbox};
use protocol::{AttachState, ConfigDescriptor, DeviceHandle, InterfaceDescriptor, TransferStatus};
use std::fmt::Display;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Thread and queue name of the task
pub const ATTACH_TASK_NAME: &str = "accel-attach";

/// Receiver of device availability changes
///
/// Called from the attach task's thread. Implementations must not block on
/// the attach task.
pub trait DeviceObserver: Send + Sync {
    /// The vendor-class handshake finished
    fn device_connected(&self, device: DeviceHandle);

    /// The device detached; any cached device state is stale
    fn device_removed(&self, device: DeviceHandle);

    /// The attach cycle failed and will not complete
    fn device_error(&self);
}

pub enum AttachRequest {
    SetPower(bool),
    GetPower,
    GetState,
    HostEvent(HostEvent),
    TransferComplete { cycle: u32, status: TransferStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachResponse {
    Done,
    Power(bool),
    State(AttachState),
    Event(HostEventStatus),
}

#[derive(Debug, Clone)]
pub struct AttachSettings {
    /// Delay between power-good polls, zero to only yield
    pub power_poll_interval: Duration,
}

impl Default for AttachSettings {
    fn default() -> Self {
        Self {
            power_poll_interval: Duration::from_micros(100),
        }
    }
}

/// Collaborators handed to the task at construction
pub struct AttachIo {
    pub lines: Box<dyn PowerLines>,
    pub driver: Box<dyn VendorClassDriver>,
    pub host: Arc<dyn HostController>,
    pub observer: Arc<dyn DeviceObserver>,
}

#[derive(Debug, Clone, Copy)]
struct Claimed {
    device: DeviceHandle,
    interface: u8,
    alternate_setting: u8,
    class: Option<ClassHandle>,
}

pub struct AttachTask {
    state: AttachState,
    claimed: Option<Claimed>,
    cycle: u32,
    power: PowerSequencer,
    driver: Box<dyn VendorClassDriver>,
    host: Arc<dyn HostController>,
    observer: Arc<dyn DeviceObserver>,
    me: ActorHandle<AttachTask>,
}

impl AttachTask {
    /// `me` is the task's own handle, used for transfer completions
    pub fn new(me: ActorHandle<AttachTask>, io: AttachIo, settings: &AttachSettings) -> Self {
        Self {
            state: AttachState::Unattached,
            claimed: None,
            cycle: 0,
            power: PowerSequencer::new(io.lines, settings.power_poll_interval),
            driver: io.driver,
            host: io.host,
            observer: io.observer,
            me,
        }
    }

    pub fn state(&self) -> AttachState {
        self.state
    }

    fn on_host_event(&mut self, event: HostEvent) -> HostEventStatus {
        match event {
            HostEvent::Attach { device, config } => self.on_attach(device, &config),
            HostEvent::EnumerationDone { device, .. } => self.on_enumeration_done(device),
            HostEvent::EnumerationFailed { device, .. } => self.on_enumeration_failed(device),
            HostEvent::Detach { device, .. } => self.on_detach(device),
        }
    }

    fn on_attach(&mut self, device: DeviceHandle, config: &ConfigDescriptor) -> HostEventStatus {
        if let Some(claimed) = &self.claimed {
            warn!(
                "Attach of {} while {} is still tracked, refusing",
                device, claimed.device
            );
            return HostEventStatus::NotSupported;
        }

        let Some(iface) = config.find_interface(InterfaceDescriptor::is_vendor_specific) else {
            warn!(
                "{} ({}) has no vendor-specific interface, not claiming it",
                device, config.id
            );
            return HostEventStatus::NotSupported;
        };

        self.cycle = self.cycle.wrapping_add(1);
        self.claimed = Some(Claimed {
            device,
            interface: iface.number,
            alternate_setting: iface.alternate_setting,
            class: None,
        });
        debug!("Claimed interface {} of {}", iface.number, device);
        HostEventStatus::Success
    }

    fn on_enumeration_done(&mut self, device: DeviceHandle) -> HostEventStatus {
        let Some(claimed) = self.tracked(device) else {
            warn!("Enumeration of untracked {} ignored", device);
            return HostEventStatus::NotSupported;
        };
        if self.state != AttachState::Unattached {
            warn!(
                "Enumeration of {} out of sequence in state {}",
                device, self.state
            );
            return HostEventStatus::NotSupported;
        }

        self.transition(AttachState::Attached);

        let class = match self.driver.init(device, claimed.interface) {
            Ok(class) => class,
            Err(e) => {
                self.fail("class driver init", e);
                return HostEventStatus::Error;
            }
        };
        if let Some(c) = self.claimed.as_mut() {
            c.class = Some(class);
        }

        let callback = self.completion();
        if let Err(e) = self
            .driver
            .set_interface(class, claimed.alternate_setting, callback)
        {
            self.fail("SetInterface submission", e);
            return HostEventStatus::Error;
        }
        self.transition(AttachState::SetInterface);
        HostEventStatus::Success
    }

    fn on_enumeration_failed(&mut self, device: DeviceHandle) -> HostEventStatus {
        if self.tracked(device).is_none() {
            return HostEventStatus::NotSupported;
        }

        error!("Enumeration of {} failed", device);
        self.transition(AttachState::EnumerationFailed);
        self.observer.device_error();
        HostEventStatus::Success
    }

    fn on_detach(&mut self, device: DeviceHandle) -> HostEventStatus {
        let Some(claimed) = self.tracked(device) else {
            debug!("Detach of untracked {} ignored", device);
            return HostEventStatus::NotSupported;
        };

        if let Some(class) = claimed.class {
            self.driver.deinit(class);
        }
        self.claimed = None;
        self.cycle = self.cycle.wrapping_add(1);
        self.transition(AttachState::Unattached);

        info!("Accelerator {} detached", device);
        self.observer.device_removed(device);
        self.host.remove_device(device);
        HostEventStatus::Success
    }

    fn on_transfer_complete(&mut self, cycle: u32, status: TransferStatus) {
        if cycle != self.cycle || !self.state.is_pending() {
            debug!(
                "Stale completion ({}) in state {}, ignored",
                status, self.state
            );
            return;
        }

        let step = match self.state {
            AttachState::SetInterface => "SetInterface",
            _ => "GetStatus",
        };
        if !status.is_success() {
            self.fail(step, status);
            return;
        }

        let Some(claimed) = self.claimed else {
            return;
        };
        let Some(class) = claimed.class else {
            return;
        };

        match self.state {
            AttachState::SetInterface => {
                let callback = self.completion();
                if let Err(e) = self.driver.get_status(class, callback) {
                    self.fail("GetStatus submission", e);
                    return;
                }
                self.transition(AttachState::GetStatus);
            }
            AttachState::GetStatus => {
                self.transition(AttachState::Connected);
                info!("Accelerator {} connected", claimed.device);
                self.observer.device_connected(claimed.device);
            }
            _ => {}
        }
    }

    fn tracked(&self, device: DeviceHandle) -> Option<Claimed> {
        self.claimed.filter(|c| c.device == device)
    }

    fn completion(&self) -> TransferCallback {
        let me = self.me.clone();
        let cycle = self.cycle;
        Box::new(move |status, _data| {
            me.send_request_async(AttachRequest::TransferComplete { cycle, status });
        })
    }

    fn fail(&mut self, step: &str, detail: impl Display) {
        error!("Accelerator {} failed: {}", step, detail);
        self.transition(AttachState::Error);
        self.observer.device_error();
    }

    fn transition(&mut self, next: AttachState) {
        debug!("Attach state {} -> {}", self.state, next);
        self.state = next;
    }
}

impl Actor for AttachTask {
    type Request = AttachRequest;
    type Response = AttachResponse;

    fn handle(&mut self, request: AttachRequest) -> AttachResponse {
        match request {
            AttachRequest::SetPower(enable) => {
                self.power.set_power(enable);
                AttachResponse::Done
            }
            AttachRequest::GetPower => AttachResponse::Power(self.power.is_on()),
            AttachRequest::GetState => AttachResponse::State(self.state),
            AttachRequest::HostEvent(event) => AttachResponse::Event(self.on_host_event(event)),
            AttachRequest::TransferComplete { cycle, status } => {
                self.on_transfer_complete(cycle, status);
                AttachResponse::Done
            }
        }
    }
}

/// Application-side handle to the power/attach task
#[derive(Clone, Debug)]
pub struct AttachClient {
    handle: ActorHandle<AttachTask>,
}

impl AttachClient {
    pub fn new(handle: ActorHandle<AttachTask>) -> Self {
        Self { handle }
    }

    /// Add (`true`) or drop (`false`) a power reference
    ///
    /// Returns once the rail and reset line are settled.
    pub fn set_power(&self, enable: bool) {
        self.handle.send_request(AttachRequest::SetPower(enable));
    }

    pub fn get_power(&self) -> bool {
        match self.handle.send_request(AttachRequest::GetPower) {
            AttachResponse::Power(on) => on,
            other => unexpected(other),
        }
    }

    pub fn state(&self) -> AttachState {
        match self.handle.send_request(AttachRequest::GetState) {
            AttachResponse::State(state) => state,
            other => unexpected(other),
        }
    }

    pub fn host_event(&self, event: HostEvent) -> HostEventStatus {
        match self.handle.send_request(AttachRequest::HostEvent(event)) {
            AttachResponse::Event(status) => status,
            other => unexpected(other),
        }
    }
}

fn unexpected(response: AttachResponse) -> ! {
    error!("{}: mismatched response {:?}", ATTACH_TASK_NAME, response);
    panic!("{}: mismatched response {:?}", ATTACH_TASK_NAME, response);
}

/// Start the power/attach task
pub fn spawn_attach_task(
    queue_depth: usize,
    settings: &AttachSettings,
    io: AttachIo,
) -> common::Result<(AttachClient, JoinHandle<()>)> {
    let (handle, mailbox) = create_mailbox(ATTACH_TASK_NAME, queue_depth);
    let task = AttachTask::new(handle.clone(), io, settings);
    let join = mailbox.spawn(task)?;
    Ok((AttachClient::new(handle), join))
}
