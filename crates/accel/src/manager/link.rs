//! Device availability as seen by the manager
//!
//! Written by the attach task through [`DeviceObserver`] and polled by the
//! manager. It has its own lock so the attach task never waits on the
//! manager's state lock, which is held across power requests.

use crate::usb::attach::DeviceObserver;
use protocol::DeviceHandle;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Outcome of one poll while waiting for the accelerator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected(DeviceHandle),
    Failed,
    Pending,
}

#[derive(Debug, Default)]
struct LinkState {
    device: Option<DeviceHandle>,
    failed: bool,
    /// Bumped whenever a connected device goes away
    generation: u64,
}

#[derive(Clone, Default, Debug)]
pub struct AcceleratorLink {
    inner: Arc<Mutex<LinkState>>,
}

impl AcceleratorLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> LinkStatus {
        let state = self.lock();
        match (state.device, state.failed) {
            (Some(device), _) => LinkStatus::Connected(device),
            (None, true) => LinkStatus::Failed,
            (None, false) => LinkStatus::Pending,
        }
    }

    pub fn device(&self) -> Option<DeviceHandle> {
        self.lock().device
    }

    /// Changes every time the device handle is lost
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Drop a failure left over from an earlier attach cycle
    pub fn clear_failure(&self) {
        self.lock().failed = false;
    }

    /// Forget the device after powering it down
    pub fn reset(&self) {
        let mut state = self.lock();
        if state.device.take().is_some() {
            state.generation += 1;
        }
        state.failed = false;
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceObserver for AcceleratorLink {
    fn device_connected(&self, device: DeviceHandle) {
        let mut state = self.lock();
        state.device = Some(device);
        state.failed = false;
        debug!("Link up on {}", device);
    }

    fn device_removed(&self, device: DeviceHandle) {
        let mut state = self.lock();
        state.device = None;
        state.failed = false;
        state.generation += 1;
        debug!("Link to {} gone (generation {})", device, state.generation);
    }

    fn device_error(&self) {
        let mut state = self.lock();
        if state.device.take().is_some() {
            state.generation += 1;
        }
        state.failed = true;
        debug!("Link failed");
    }
}
