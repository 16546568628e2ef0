//! Accelerator manager
//!
//! Owns the lifecycle of the open accelerator:
//!
//! - [`AcceleratorManager::open_device`] powers the accelerator, waits for
//!   the attach task to report it connected and hands out a shared
//!   [`DeviceContext`]. Every caller gets the same context while any copy of
//!   it is alive; dropping the last copy shuts the runtime down and removes
//!   the power reference.
//! - [`AcceleratorManager::register_package`] verifies packages once per
//!   source buffer.
//! - [`AcceleratorManager::invoke`] keeps the on-device parameter cache
//!   coherent and runs the package.
//!
//! Context, registry and cache live behind one lock. Device notifications
//! arrive through the separate [`AcceleratorLink`].

mod cache;
mod driver;
mod link;
mod package;

pub use cache::{CachePlan, CacheStats, ParameterCache};
pub use driver::{AcceleratorDriver, DriverError};
pub use link::{AcceleratorLink, LinkStatus};
pub use package::{Package, PackageError, PackageKey, PackageRegistry};

use crate::usb::AttachClient;
use protocol::{DeviceHandle, PerformanceMode};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Power reference control, implemented by the attach task's client
pub trait PowerControl: Send + Sync {
    fn set_power(&self, enable: bool);
}

impl PowerControl for AttachClient {
    fn set_power(&self, enable: bool) {
        AttachClient::set_power(self, enable);
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("context does not refer to the open accelerator")]
    StaleContext,

    #[error("parameter caching failed: {0}")]
    ParameterCaching(DriverError),

    #[error("inference failed: {0}")]
    Inference(DriverError),
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Sleep between polls while waiting for the accelerator
    pub open_poll_interval: Duration,
    /// Pause between runtime shutdown and power removal
    pub power_down_settle: Duration,
    pub cache_slots: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            open_poll_interval: Duration::from_millis(10),
            power_down_settle: Duration::from_millis(100),
            cache_slots: 4,
        }
    }
}

#[derive(Debug)]
struct ContextSlot {
    id: u64,
    holders: usize,
    device: DeviceHandle,
    mode: PerformanceMode,
}

struct ManagerState {
    context: Option<ContextSlot>,
    next_context_id: u64,
    registry: PackageRegistry,
    cache: ParameterCache,
    /// Link generation the cache was last valid for
    cache_generation: u64,
}

struct ManagerInner {
    state: Mutex<ManagerState>,
    link: AcceleratorLink,
    power: Arc<dyn PowerControl>,
    driver: Arc<dyn AcceleratorDriver>,
    settings: ManagerSettings,
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Undo `open_device` once the last context holder is gone
    fn shut_down(&self, slot: ContextSlot) {
        info!("Closing accelerator {} ({} mode)", slot.device, slot.mode);
        self.driver.close();
        thread::sleep(self.settings.power_down_settle);
        self.power.set_power(false);
        self.link.reset();
    }
}

/// Shared handle to the open accelerator
///
/// Clones count as additional holders. The accelerator is closed and
/// powered down when the last holder is dropped.
pub struct DeviceContext {
    id: u64,
    device: DeviceHandle,
    mode: PerformanceMode,
    inner: Arc<ManagerInner>,
}

impl DeviceContext {
    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    pub fn mode(&self) -> PerformanceMode {
        self.mode
    }

    /// Whether two contexts refer to the same open accelerator
    pub fn same_as(&self, other: &DeviceContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && self.id == other.id
    }
}

impl Clone for DeviceContext {
    fn clone(&self) -> Self {
        let mut state = self.inner.lock();
        if let Some(slot) = state.context.as_mut().filter(|s| s.id == self.id) {
            slot.holders += 1;
        }
        Self {
            id: self.id,
            device: self.device,
            mode: self.mode,
            inner: self.inner.clone(),
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        let Some(slot) = state.context.as_mut().filter(|s| s.id == self.id) else {
            return;
        };

        slot.holders -= 1;
        if slot.holders > 0 {
            return;
        }
        if let Some(slot) = state.context.take() {
            // Held across the shutdown so a concurrent open waits for it.
            self.inner.shut_down(slot);
        }
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("mode", &self.mode)
            .finish()
    }
}

#[derive(Clone)]
pub struct AcceleratorManager {
    inner: Arc<ManagerInner>,
}

impl AcceleratorManager {
    pub fn new(
        link: AcceleratorLink,
        power: Arc<dyn PowerControl>,
        driver: Arc<dyn AcceleratorDriver>,
        settings: ManagerSettings,
    ) -> Self {
        let cache_generation = link.generation();
        let state = ManagerState {
            context: None,
            next_context_id: 1,
            registry: PackageRegistry::default(),
            cache: ParameterCache::new(settings.cache_slots),
            cache_generation,
        };

        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(state),
                link,
                power,
                driver,
                settings,
            }),
        }
    }

    /// Open the accelerator, or join the context that is already open
    ///
    /// Blocks until the attach task reports the device connected; there is
    /// no timeout. Returns `None` if the attach cycle fails or the runtime
    /// does not come up. `mode` only applies when the device is actually
    /// opened here.
    pub fn open_device(&self, mode: PerformanceMode) -> Option<DeviceContext> {
        let mut state = self.inner.lock();

        if let Some(slot) = state.context.as_mut() {
            slot.holders += 1;
            if slot.mode != mode {
                debug!(
                    "Accelerator already open in {} mode, ignoring {}",
                    slot.mode, mode
                );
            }
            return Some(DeviceContext {
                id: slot.id,
                device: slot.device,
                mode: slot.mode,
                inner: self.inner.clone(),
            });
        }

        self.inner.link.clear_failure();
        self.inner.power.set_power(true);

        let device = loop {
            match self.inner.link.status() {
                LinkStatus::Connected(device) => break device,
                LinkStatus::Failed => {
                    error!("Accelerator failed to attach");
                    self.inner.power.set_power(false);
                    self.inner.link.reset();
                    return None;
                }
                LinkStatus::Pending => thread::sleep(self.inner.settings.open_poll_interval),
            }
        };

        if let Err(e) = self.inner.driver.open(device, mode) {
            error!("Failed to open accelerator {}: {}", device, e);
            self.inner.power.set_power(false);
            self.inner.link.reset();
            return None;
        }

        let id = state.next_context_id;
        state.next_context_id += 1;
        state.context = Some(ContextSlot {
            id,
            holders: 1,
            device,
            mode,
        });
        info!("Accelerator {} open in {} mode", device, mode);

        Some(DeviceContext {
            id,
            device,
            mode,
            inner: self.inner.clone(),
        })
    }

    /// Verify `buffer` as a package, once per buffer address
    pub fn register_package(&self, buffer: &'static [u8]) -> Option<Arc<Package>> {
        let mut state = self.inner.lock();
        state.registry.register(buffer).ok()
    }

    /// Run `package` on the open accelerator
    ///
    /// Uploads the package's cached parameters first when the device does
    /// not hold them.
    pub fn invoke(&self, package: &Package, context: &DeviceContext) -> Result<(), ManagerError> {
        let mut state = self.inner.lock();

        let live = Arc::ptr_eq(&context.inner, &self.inner)
            && state.context.as_ref().is_some_and(|s| s.id == context.id);
        if !live {
            warn!("Invoke with a context that is not open");
            return Err(ManagerError::StaleContext);
        }

        let generation = self.inner.link.generation();
        if generation != state.cache_generation {
            debug!("Device handle changed, parameter cache invalidated");
            state.cache.invalidate();
            state.cache_generation = generation;
        }

        if let Some(caching) = package.parameter_caching() {
            let token = caching.caching_token;
            match state.cache.plan(package.key(), token) {
                CachePlan::Resident => debug!("{} parameters resident", package.key()),
                CachePlan::Load { slot } => {
                    self.inner.driver.execute(caching).map_err(|e| {
                        error!("Parameter caching for {} failed: {}", package.key(), e);
                        ManagerError::ParameterCaching(e)
                    })?;
                    state.cache.commit(slot, package.key(), token);
                    debug!("{} parameters cached in slot {}", package.key(), slot);
                }
                CachePlan::Upload => {
                    self.inner.driver.execute(caching).map_err(|e| {
                        error!("Parameter caching for {} failed: {}", package.key(), e);
                        ManagerError::ParameterCaching(e)
                    })?;
                }
            }
        }

        self.inner
            .driver
            .execute(package.inference())
            .map_err(ManagerError::Inference)
    }

    /// Die temperature, while a context is open
    pub fn get_temperature(&self) -> Option<f32> {
        let state = self.inner.lock();
        state.context.as_ref()?;
        self.inner.driver.temperature()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().context.is_some()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.lock().cache.stats()
    }

    pub fn link(&self) -> &AcceleratorLink {
        &self.inner.link
    }
}
