//! Firmware update task
//!
//! Drives the accelerator's boot ROM through a DFU download of the runtime
//! image, reads the image back and compares it byte for byte before letting
//! the device leave DFU mode:
//!
//! ```text
//! Attached ─► SetInterface ─► GetStatus ─┬─► Transfer ─► GetStatus ─┐
//!                                        │   ◄──────────────────────┘
//!                                        └─► ZeroLengthTransfer
//!   ─► ReadBack ─► GetStatusRead ─┬─► ReadBack ...
//!                                 └─► (compare) ─► Detach ─► CheckStatus ─► Complete
//! ```
//!
//! A failed transfer, a bad status report or a read-back mismatch ends in
//! `Error` and is reported to the [`DeviceObserver`], since the accelerator
//! will never reach its application personality. There is no retry; the
//! device has to be power cycled.

use crate::firmware_image::FirmwareImage;
use crate::usb::attach::DeviceObserver;
use crate::usb::host::{
    ClassHandle, DfuClassDriver, HostController, HostEvent, HostEventStatus, TransferCallback,
};
use common::{Actor, ActorHandle, create_mailbox};
use protocol::{
    ConfigDescriptor, DeviceHandle, DfuState, DfuStatus, InterfaceDescriptor, TransferStatus,
};
use std::fmt::Display;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Thread and queue name of the task
pub const DFU_TASK_NAME: &str = "accel-dfu";

pub enum DfuRequest {
    HostEvent(HostEvent),
    TransferComplete {
        cycle: u32,
        status: TransferStatus,
        data: Vec<u8>,
    },
    GetState,
    GetProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuResponse {
    Done,
    Event(HostEventStatus),
    State(DfuState),
    Progress(DfuProgress),
}

/// Download and read-back counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DfuProgress {
    /// Next block number, wraps at 16 bits
    pub block: u16,
    pub transferred: usize,
    pub total: usize,
    pub read_back: usize,
}

#[derive(Debug, Clone)]
pub struct DfuSettings {
    /// wDetachTimeOut used when the device has no functional descriptor
    pub detach_timeout_ms: u16,
    /// Upper bound on the bwPollTimeout wait after a status report
    pub max_poll_timeout: Duration,
}

impl Default for DfuSettings {
    fn default() -> Self {
        Self {
            detach_timeout_ms: 1000,
            max_poll_timeout: Duration::from_secs(5),
        }
    }
}

/// Wait requested by a status report, capped at `max`
pub fn poll_delay(status: &DfuStatus, max: Duration) -> Duration {
    Duration::from_millis(u64::from(status.poll_timeout_ms)).min(max)
}

pub struct DfuIo {
    pub driver: Box<dyn DfuClassDriver>,
    pub host: Arc<dyn HostController>,
    pub observer: Arc<dyn DeviceObserver>,
}

#[derive(Debug, Clone, Copy)]
struct Target {
    device: DeviceHandle,
    interface: u8,
    alternate_setting: u8,
    max_packet: usize,
    detach_timeout_ms: u16,
    class: Option<ClassHandle>,
}

pub struct DfuTask {
    state: DfuState,
    target: Option<Target>,
    cycle: u32,
    block: u16,
    transferred: usize,
    /// Bytes requested by the transfer in flight
    in_flight: usize,
    read_back: Vec<u8>,
    image: FirmwareImage,
    driver: Box<dyn DfuClassDriver>,
    host: Arc<dyn HostController>,
    observer: Arc<dyn DeviceObserver>,
    settings: DfuSettings,
    me: ActorHandle<DfuTask>,
}

impl DfuTask {
    pub fn new(
        me: ActorHandle<DfuTask>,
        image: FirmwareImage,
        io: DfuIo,
        settings: DfuSettings,
    ) -> Self {
        Self {
            state: DfuState::Unattached,
            target: None,
            cycle: 0,
            block: 0,
            transferred: 0,
            in_flight: 0,
            read_back: Vec::new(),
            image,
            driver: io.driver,
            host: io.host,
            observer: io.observer,
            settings,
            me,
        }
    }

    pub fn state(&self) -> DfuState {
        self.state
    }

    pub fn progress(&self) -> DfuProgress {
        DfuProgress {
            block: self.block,
            transferred: self.transferred,
            total: self.image.len(),
            read_back: self.read_back.len(),
        }
    }

    fn on_host_event(&mut self, event: HostEvent) -> HostEventStatus {
        match event {
            HostEvent::Attach { device, config } => self.on_attach(device, &config),
            HostEvent::EnumerationDone { device, .. } => self.on_enumeration_done(device),
            HostEvent::EnumerationFailed { device, .. } => {
                if self.tracked(device).is_none() {
                    return HostEventStatus::NotSupported;
                }
                self.fail("enumeration", format!("{} failed to enumerate", device));
                HostEventStatus::Success
            }
            HostEvent::Detach { device, .. } => self.on_detach(device),
        }
    }

    fn on_attach(&mut self, device: DeviceHandle, config: &ConfigDescriptor) -> HostEventStatus {
        if let Some(target) = &self.target {
            warn!(
                "DFU attach of {} while {} is still tracked, refusing",
                device, target.device
            );
            return HostEventStatus::NotSupported;
        }

        let Some(iface) = config.find_interface(InterfaceDescriptor::is_dfu) else {
            warn!("{} ({}) has no DFU interface", device, config.id);
            return HostEventStatus::NotSupported;
        };

        let functional = iface.dfu_functional;
        if functional.is_some_and(|f| !f.can_upload()) {
            warn!("{} cannot upload, the image could not be read back", device);
            return HostEventStatus::NotSupported;
        }
        let max_packet = functional
            .map(|f| f.transfer_size)
            .filter(|&size| size > 0)
            .unwrap_or(u16::from(config.max_packet_size0));
        if max_packet == 0 {
            warn!("{} reports a zero transfer size", device);
            return HostEventStatus::NotSupported;
        }

        self.cycle = self.cycle.wrapping_add(1);
        self.target = Some(Target {
            device,
            interface: iface.number,
            alternate_setting: iface.alternate_setting,
            max_packet: usize::from(max_packet),
            detach_timeout_ms: functional
                .map(|f| f.detach_timeout_ms)
                .unwrap_or(self.settings.detach_timeout_ms),
            class: None,
        });
        debug!(
            "Claimed DFU interface {} of {} (transfer size {})",
            iface.number, device, max_packet
        );
        HostEventStatus::Success
    }

    fn on_enumeration_done(&mut self, device: DeviceHandle) -> HostEventStatus {
        let Some(target) = self.tracked(device) else {
            warn!("DFU enumeration of untracked {} ignored", device);
            return HostEventStatus::NotSupported;
        };
        if self.state != DfuState::Unattached {
            warn!(
                "DFU enumeration of {} out of sequence in state {}",
                device, self.state
            );
            return HostEventStatus::NotSupported;
        }

        self.transition(DfuState::Attached);
        self.reset_progress();
        info!(
            "Downloading {} ({} bytes, crc32 {:08x}) to {}",
            self.image.name(),
            self.image.len(),
            self.image.checksum(),
            device
        );

        let class = match self.driver.init(device, target.interface) {
            Ok(class) => class,
            Err(e) => {
                self.fail("class driver init", e);
                return HostEventStatus::Error;
            }
        };
        if let Some(t) = self.target.as_mut() {
            t.class = Some(class);
        }

        let callback = self.completion();
        if let Err(e) = self
            .driver
            .set_interface(class, target.alternate_setting, callback)
        {
            self.fail("SetInterface submission", e);
            return HostEventStatus::Error;
        }
        self.transition(DfuState::SetInterface);
        HostEventStatus::Success
    }

    fn on_detach(&mut self, device: DeviceHandle) -> HostEventStatus {
        let Some(target) = self.tracked(device) else {
            debug!("DFU detach of untracked {} ignored", device);
            return HostEventStatus::NotSupported;
        };

        if let Some(class) = target.class {
            self.driver.deinit(class);
        }
        self.target = None;
        self.cycle = self.cycle.wrapping_add(1);
        self.reset_progress();
        self.transition(DfuState::Unattached);

        debug!("DFU device {} detached", device);
        self.host.remove_device(device);
        HostEventStatus::Success
    }

    fn on_transfer_complete(&mut self, cycle: u32, status: TransferStatus, data: Vec<u8>) {
        if cycle != self.cycle || !self.awaiting_completion() {
            debug!(
                "Stale DFU completion ({}) in state {}, ignored",
                status, self.state
            );
            return;
        }

        if !status.is_success() {
            self.fail(self.state, status);
            return;
        }

        let Some(target) = self.target else {
            return;
        };
        let Some(class) = target.class else {
            return;
        };

        match self.state {
            DfuState::SetInterface => self.request_status(class, DfuState::GetStatus),
            DfuState::GetStatus => {
                if !self.check_status(&data) {
                    return;
                }
                if self.transferred < self.image.len() {
                    self.send_block(class, target.max_packet);
                } else {
                    self.send_zero_length(class);
                }
            }
            DfuState::Transfer => {
                self.transferred += self.in_flight;
                self.block = self.block.wrapping_add(1);
                self.request_status(class, DfuState::GetStatus);
            }
            DfuState::ZeroLengthTransfer => {
                debug!("Download finished after {} bytes", self.transferred);
                self.block = 0;
                self.read_back.clear();
                self.read_back.reserve(self.image.len());
                if self.image.is_empty() {
                    self.verify(class, target.detach_timeout_ms);
                } else {
                    self.request_block(class, target.max_packet);
                }
            }
            DfuState::ReadBack => {
                if data.is_empty() {
                    self.fail(
                        DfuState::ReadBack,
                        format!("device returned no data at offset {}", self.read_back.len()),
                    );
                    return;
                }
                let take = data.len().min(self.in_flight);
                self.read_back.extend_from_slice(&data[..take]);
                self.block = self.block.wrapping_add(1);
                self.request_status(class, DfuState::GetStatusRead);
            }
            DfuState::GetStatusRead => {
                if !self.check_status(&data) {
                    return;
                }
                if self.read_back.len() < self.image.len() {
                    self.request_block(class, target.max_packet);
                } else {
                    self.verify(class, target.detach_timeout_ms);
                }
            }
            DfuState::Detach => self.request_status(class, DfuState::CheckStatus),
            DfuState::CheckStatus => {
                if !self.check_status(&data) {
                    return;
                }
                self.complete(target.device, class);
            }
            _ => {}
        }
    }

    fn send_block(&mut self, class: ClassHandle, max_packet: usize) {
        let remaining = self.image.len() - self.transferred;
        let len = max_packet.min(remaining);
        let start = self.transferred;
        let callback = self.completion();

        self.in_flight = len;
        let image = self.image.clone();
        let chunk = &image.as_bytes()[start..start + len];
        if let Err(e) = self.driver.download(class, self.block, chunk, callback) {
            self.fail("download submission", e);
            return;
        }
        self.transition(DfuState::Transfer);
    }

    fn send_zero_length(&mut self, class: ClassHandle) {
        let callback = self.completion();
        self.in_flight = 0;
        if let Err(e) = self.driver.download(class, self.block, &[], callback) {
            self.fail("zero-length download submission", e);
            return;
        }
        self.transition(DfuState::ZeroLengthTransfer);
    }

    fn request_block(&mut self, class: ClassHandle, max_packet: usize) {
        let remaining = self.image.len() - self.read_back.len();
        let len = max_packet.min(remaining);
        let callback = self.completion();

        self.in_flight = len;
        if let Err(e) = self.driver.upload(class, self.block, len, callback) {
            self.fail("upload submission", e);
            return;
        }
        self.transition(DfuState::ReadBack);
    }

    fn request_status(&mut self, class: ClassHandle, next: DfuState) {
        let callback = self.completion();
        if let Err(e) = self.driver.get_status(class, callback) {
            self.fail("GetStatus submission", e);
            return;
        }
        self.transition(next);
    }

    /// Compare the read-back buffer with the image and leave DFU mode
    fn verify(&mut self, class: ClassHandle, detach_timeout_ms: u16) {
        if let Some(offset) = first_difference(&self.read_back, self.image.as_bytes()) {
            let detail = format!(
                "mismatch at offset {} ({} of {} bytes read)",
                offset,
                self.read_back.len(),
                self.image.len()
            );
            self.fail("read-back verification", detail);
            return;
        }
        info!("Read-back of {} bytes verified", self.read_back.len());
        self.read_back = Vec::new();

        let callback = self.completion();
        if let Err(e) = self.driver.detach(class, detach_timeout_ms, callback) {
            self.fail("detach submission", e);
            return;
        }
        self.transition(DfuState::Detach);
    }

    fn complete(&mut self, device: DeviceHandle, class: ClassHandle) {
        self.transition(DfuState::Complete);
        info!("Firmware update of {} complete, re-enumerating", device);

        self.host.bus_reset();
        self.driver.deinit(class);
        if let Some(t) = self.target.as_mut() {
            t.class = None;
        }
        self.host.reenumerate();
    }

    /// Decode a DFU_GETSTATUS payload, failing the task on a bad report
    fn check_status(&mut self, data: &[u8]) -> bool {
        match DfuStatus::parse(data) {
            Ok(status) if status.is_ok() => {
                let delay = poll_delay(&status, self.settings.max_poll_timeout);
                if delay < Duration::from_millis(u64::from(status.poll_timeout_ms)) {
                    warn!(
                        "Device asked for a {} ms poll timeout, waiting {:?}",
                        status.poll_timeout_ms, delay
                    );
                }
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                true
            }
            Ok(status) => {
                self.fail(
                    self.state,
                    format!("device reported {:?} in {:?}", status.status, status.state),
                );
                false
            }
            Err(e) => {
                self.fail(self.state, e);
                false
            }
        }
    }

    fn awaiting_completion(&self) -> bool {
        !self.state.is_terminal()
            && !matches!(self.state, DfuState::Unattached | DfuState::Attached)
    }

    fn tracked(&self, device: DeviceHandle) -> Option<Target> {
        self.target.filter(|t| t.device == device)
    }

    fn reset_progress(&mut self) {
        self.block = 0;
        self.transferred = 0;
        self.in_flight = 0;
        self.read_back = Vec::new();
    }

    fn completion(&self) -> TransferCallback {
        let me = self.me.clone();
        let cycle = self.cycle;
        Box::new(move |status, data| {
            me.send_request_async(DfuRequest::TransferComplete {
                cycle,
                status,
                data,
            });
        })
    }

    fn fail(&mut self, step: impl Display, detail: impl Display) {
        error!("DFU {} failed: {}", step, detail);
        self.transition(DfuState::Error);
        self.observer.device_error();
    }

    fn transition(&mut self, next: DfuState) {
        debug!("DFU state {} -> {}", self.state, next);
        self.state = next;
    }
}

impl Actor for DfuTask {
    type Request = DfuRequest;
    type Response = DfuResponse;

    fn handle(&mut self, request: DfuRequest) -> DfuResponse {
        match request {
            DfuRequest::HostEvent(event) => DfuResponse::Event(self.on_host_event(event)),
            DfuRequest::TransferComplete {
                cycle,
                status,
                data,
            } => {
                self.on_transfer_complete(cycle, status, data);
                DfuResponse::Done
            }
            DfuRequest::GetState => DfuResponse::State(self.state),
            DfuRequest::GetProgress => DfuResponse::Progress(self.progress()),
        }
    }
}

/// Handle to the firmware update task
#[derive(Clone, Debug)]
pub struct DfuClient {
    handle: ActorHandle<DfuTask>,
}

impl DfuClient {
    pub fn new(handle: ActorHandle<DfuTask>) -> Self {
        Self { handle }
    }

    pub fn state(&self) -> DfuState {
        match self.handle.send_request(DfuRequest::GetState) {
            DfuResponse::State(state) => state,
            other => unexpected(other),
        }
    }

    pub fn progress(&self) -> DfuProgress {
        match self.handle.send_request(DfuRequest::GetProgress) {
            DfuResponse::Progress(progress) => progress,
            other => unexpected(other),
        }
    }

    pub fn host_event(&self, event: HostEvent) -> HostEventStatus {
        match self.handle.send_request(DfuRequest::HostEvent(event)) {
            DfuResponse::Event(status) => status,
            other => unexpected(other),
        }
    }
}

/// Offset of the first differing byte, counting a length difference
fn first_difference(actual: &[u8], expected: &[u8]) -> Option<usize> {
    actual
        .iter()
        .zip(expected)
        .position(|(a, b)| a != b)
        .or_else(|| (actual.len() != expected.len()).then(|| actual.len().min(expected.len())))
}

fn unexpected(response: DfuResponse) -> ! {
    error!("{}: mismatched response {:?}", DFU_TASK_NAME, response);
    panic!("{}: mismatched response {:?}", DFU_TASK_NAME, response);
}

/// Start the firmware update task
pub fn spawn_dfu_task(
    queue_depth: usize,
    image: FirmwareImage,
    settings: DfuSettings,
    io: DfuIo,
) -> common::Result<(DfuClient, JoinHandle<()>)> {
    let (handle, mailbox) = create_mailbox(DFU_TASK_NAME, queue_depth);
    let task = DfuTask::new(handle.clone(), image, io, settings);
    let join = mailbox.spawn(task)?;
    Ok((DfuClient::new(handle), join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::mock::{FakeDfu, FakeHost, HostCall, Notification, RecordingObserver};
    use common::Mailbox;
    use common::test_utils::{
        create_mock_accelerator_config, create_mock_dfu_config, create_mock_firmware,
        create_mock_handle,
    };
    use proptest::prelude::*;
    use protocol::{DfuDeviceState, DfuFunctionalDescriptor, DfuStatusCode, UsbId};

    struct Harness {
        task: DfuTask,
        mailbox: Mailbox<DfuTask>,
        dfu: FakeDfu,
        host: FakeHost,
        observer: RecordingObserver,
    }

    impl Harness {
        fn new(firmware: Vec<u8>, dfu: FakeDfu) -> Self {
            Self::with_settings(firmware, dfu, DfuSettings::default())
        }

        fn with_settings(firmware: Vec<u8>, dfu: FakeDfu, settings: DfuSettings) -> Self {
            let host = FakeHost::default();
            let observer = RecordingObserver::default();
            // Deep enough for one completion per step.
            let (handle, mailbox) = create_mailbox("dfu-test", 4);
            let task = DfuTask::new(
                handle,
                FirmwareImage::from_bytes("test.bin", firmware),
                DfuIo {
                    driver: Box::new(dfu.clone()),
                    host: Arc::new(host.clone()),
                    observer: Arc::new(observer.clone()),
                },
                settings,
            );
            Self {
                task,
                mailbox,
                dfu,
                host,
                observer,
            }
        }

        fn event(&mut self, event: HostEvent) -> HostEventStatus {
            let status = match self.task.handle(DfuRequest::HostEvent(event)) {
                DfuResponse::Event(status) => status,
                other => panic!("unexpected {:?}", other),
            };
            while let Some(request) = self.mailbox.try_recv() {
                self.task.handle(request);
            }
            status
        }

        fn run(&mut self, transfer_size: u16) -> DfuState {
            let device = create_mock_handle(1);
            let status = self.event(HostEvent::Attach {
                device,
                config: create_mock_dfu_config(transfer_size),
            });
            assert_eq!(status, HostEventStatus::Success);
            self.event(HostEvent::EnumerationDone {
                device,
                id: UsbId::DFU,
            });
            self.task.state()
        }
    }

    #[test]
    fn test_final_partial_block_then_zero_length() {
        let mut h = Harness::new(create_mock_firmware(3 * 256 + 10), FakeDfu::default());
        assert_eq!(h.run(256), DfuState::Complete);

        assert_eq!(h.dfu.download_sizes(), vec![256, 256, 256, 10, 0]);
        let blocks: Vec<u16> = h.dfu.0.lock().unwrap().downloads.iter().map(|d| d.0).collect();
        assert_eq!(blocks, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_complete_resets_bus_and_reenumerates() {
        let mut h = Harness::new(create_mock_firmware(1000), FakeDfu::default());
        assert_eq!(h.run(256), DfuState::Complete);

        assert_eq!(h.host.calls(), vec![HostCall::BusReset, HostCall::Reenumerate]);
        assert!(h.observer.events().is_empty());
        assert_eq!(h.dfu.calls().last(), Some(&"deinit"));
        let progress = h.task.progress();
        assert_eq!(progress.transferred, 1000);
        assert_eq!(progress.total, 1000);
    }

    #[test]
    fn test_read_back_mismatch_is_error() {
        let mut h = Harness::new(create_mock_firmware(600), FakeDfu::corrupting(0x01));
        assert_eq!(h.run(256), DfuState::Error);

        let calls = h.dfu.calls();
        assert!(!calls.contains(&"detach"));
        assert!(h.host.calls().is_empty());
        assert_eq!(h.observer.events(), vec![Notification::Error]);
    }

    #[test]
    fn test_falls_back_to_ep0_packet_size() {
        let mut h = Harness::new(create_mock_firmware(130), FakeDfu::default());
        let mut config = create_mock_dfu_config(0);
        config.interfaces[0].dfu_functional = None;

        let device = create_mock_handle(1);
        h.event(HostEvent::Attach { device, config });
        h.event(HostEvent::EnumerationDone {
            device,
            id: UsbId::DFU,
        });

        assert_eq!(h.task.state(), DfuState::Complete);
        assert_eq!(h.dfu.download_sizes(), vec![64, 64, 2, 0]);
    }

    #[test]
    fn test_error_status_report_fails() {
        let dfu = FakeDfu::default();
        dfu.0.lock().unwrap().status = Some(DfuStatus {
            status: DfuStatusCode::ErrWrite,
            poll_timeout_ms: 0,
            state: DfuDeviceState::Error,
            string_index: 0,
        });
        let mut h = Harness::new(create_mock_firmware(512), dfu);

        assert_eq!(h.run(256), DfuState::Error);
        assert!(h.dfu.download_sizes().is_empty());
    }

    #[test]
    fn test_attach_without_dfu_interface() {
        let mut h = Harness::new(create_mock_firmware(16), FakeDfu::default());
        let status = h.event(HostEvent::Attach {
            device: create_mock_handle(1),
            config: create_mock_accelerator_config(),
        });

        assert_eq!(status, HostEventStatus::NotSupported);
        assert_eq!(h.task.state(), DfuState::Unattached);
    }

    #[test]
    fn test_attach_without_upload_support() {
        let mut h = Harness::new(create_mock_firmware(16), FakeDfu::default());
        let mut config = create_mock_dfu_config(256);
        for iface in &mut config.interfaces {
            if let Some(f) = iface.dfu_functional.as_mut() {
                f.attributes &= !DfuFunctionalDescriptor::CAN_UPLOAD;
            }
        }

        let status = h.event(HostEvent::Attach {
            device: create_mock_handle(1),
            config,
        });

        assert_eq!(status, HostEventStatus::NotSupported);
        assert_eq!(h.task.state(), DfuState::Unattached);
    }

    #[test]
    fn test_poll_delay_is_capped() {
        let mut status = DfuStatus {
            status: DfuStatusCode::Ok,
            poll_timeout_ms: 0x00ff_ffff,
            state: DfuDeviceState::DnloadIdle,
            string_index: 0,
        };
        let max = DfuSettings::default().max_poll_timeout;
        assert_eq!(poll_delay(&status, max), max);

        status.poll_timeout_ms = 20;
        assert_eq!(poll_delay(&status, max), Duration::from_millis(20));
    }

    #[test]
    fn test_long_poll_timeout_does_not_stall() {
        let dfu = FakeDfu::default();
        dfu.0.lock().unwrap().status = Some(DfuStatus {
            status: DfuStatusCode::Ok,
            poll_timeout_ms: 0x00ff_ffff,
            state: DfuDeviceState::DnloadIdle,
            string_index: 0,
        });
        let mut h = Harness::with_settings(
            create_mock_firmware(8),
            dfu,
            DfuSettings {
                max_poll_timeout: Duration::from_millis(1),
                ..DfuSettings::default()
            },
        );

        assert_eq!(h.run(256), DfuState::Complete);
    }

    #[test]
    fn test_detach_returns_to_unattached() {
        let mut h = Harness::new(create_mock_firmware(300), FakeDfu::default());
        assert_eq!(h.run(256), DfuState::Complete);

        let status = h.event(HostEvent::Detach {
            device: DeviceHandle(1),
            id: UsbId::DFU,
        });
        assert_eq!(status, HostEventStatus::Success);
        assert_eq!(h.task.state(), DfuState::Unattached);
        assert_eq!(h.task.progress().transferred, 0);
        assert_eq!(
            h.host.calls().last(),
            Some(&HostCall::Remove(DeviceHandle(1)))
        );
    }

    #[test]
    fn test_empty_image_skips_read_back() {
        let mut h = Harness::new(Vec::new(), FakeDfu::default());
        assert_eq!(h.run(256), DfuState::Complete);

        assert_eq!(h.dfu.download_sizes(), vec![0]);
        assert!(h.dfu.0.lock().unwrap().uploads.is_empty());
    }

    #[test]
    fn test_first_difference() {
        assert_eq!(first_difference(b"abc", b"abc"), None);
        assert_eq!(first_difference(b"abx", b"abc"), Some(2));
        assert_eq!(first_difference(b"ab", b"abc"), Some(2));
        assert_eq!(first_difference(b"", b""), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_complete_iff_read_back_matches(
            firmware in proptest::collection::vec(any::<u8>(), 1..1500),
            mask in any::<u8>(),
            transfer_size in 16u16..300,
        ) {
            let mut h = Harness::new(firmware.clone(), FakeDfu::corrupting(mask));
            let state = h.run(transfer_size);

            if mask == 0 {
                prop_assert_eq!(state, DfuState::Complete);
            } else {
                prop_assert_eq!(state, DfuState::Error);
                prop_assert!(!h.host.calls().contains(&HostCall::BusReset));
            }
            let flashed = h.dfu.0.lock().unwrap().flash.clone();
            prop_assert_eq!(flashed, firmware);
        }
    }
}
