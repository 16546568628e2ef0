//! Software stand-in for the accelerator runtime

use crate::manager::{AcceleratorDriver, DriverError};
use crate::sim::device::BootMode;
use crate::sim::host::{SharedModel, lock};
use protocol::{DeviceHandle, Executable, ExecutableKind, PerformanceMode};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const IDLE_TEMPERATURE_C: f32 = 35.0;
const MAX_TEMPERATURE_C: f32 = 85.0;

/// One executable the runtime ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub kind: ExecutableKind,
    pub caching_token: u64,
    pub instruction_bytes: usize,
    pub parameter_bytes: usize,
}

#[derive(Default)]
struct RuntimeState {
    open: Option<(DeviceHandle, PerformanceMode)>,
    opens: usize,
    executions: Vec<ExecutionRecord>,
    /// Heat accumulated since the runtime was opened
    heat: f32,
}

pub struct SimAcceleratorDriver {
    model: SharedModel,
    state: Mutex<RuntimeState>,
}

impl SimAcceleratorDriver {
    pub fn new(model: SharedModel) -> Self {
        Self {
            model,
            state: Mutex::new(RuntimeState::default()),
        }
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.lock().executions.clone()
    }

    /// How many times the runtime was brought up
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.lock().open.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn heat_per_execution(mode: PerformanceMode) -> f32 {
    match mode {
        PerformanceMode::Low => 0.05,
        PerformanceMode::Medium => 0.1,
        PerformanceMode::High => 0.2,
        PerformanceMode::Max => 0.4,
    }
}

impl AcceleratorDriver for SimAcceleratorDriver {
    fn open(&self, device: DeviceHandle, mode: PerformanceMode) -> Result<(), DriverError> {
        if !lock(&self.model).is_attached_as(device, BootMode::Application) {
            return Err(DriverError::Init(format!(
                "{} is not running the runtime image",
                device
            )));
        }

        let mut state = self.lock();
        state.open = Some((device, mode));
        state.opens += 1;
        state.heat = 0.0;
        debug!("Simulated runtime open on {} ({} mode)", device, mode);
        Ok(())
    }

    fn close(&self) {
        self.lock().open = None;
    }

    fn execute(&self, executable: &Executable<'static>) -> Result<(), DriverError> {
        let mut state = self.lock();
        let Some((device, mode)) = state.open else {
            return Err(DriverError::NotOpen);
        };
        if !lock(&self.model).is_attached_as(device, BootMode::Application) {
            return Err(DriverError::Execution(format!("{} went away", device)));
        }

        state.executions.push(ExecutionRecord {
            kind: executable.kind,
            caching_token: executable.caching_token,
            instruction_bytes: executable.instructions.len(),
            parameter_bytes: executable.parameters.len(),
        });
        state.heat += heat_per_execution(mode);
        Ok(())
    }

    fn temperature(&self) -> Option<f32> {
        let state = self.lock();
        state.open?;
        Some((IDLE_TEMPERATURE_C + state.heat).min(MAX_TEMPERATURE_C))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::device::{AcceleratorModel, SimOptions};
    use std::sync::Arc;

    const EXE: Executable<'static> = Executable {
        kind: ExecutableKind::StandAlone,
        caching_token: 0,
        instructions: &[1, 2],
        parameters: &[3; 8],
    };

    fn booted_model(device: DeviceHandle) -> SharedModel {
        let mut model = AcceleratorModel::new(SimOptions::default());
        model.set_power(true);
        model.set_reset(true);
        model.download(0, &[0xaa; 16]);
        model.download(1, &[]);
        model.request_detach();
        model.bus_reset();
        model.enumerate(device);
        Arc::new(Mutex::new(model))
    }

    #[test]
    fn test_open_requires_runtime() {
        let model = Arc::new(Mutex::new(AcceleratorModel::new(SimOptions::default())));
        let driver = SimAcceleratorDriver::new(model);

        let err = driver.open(DeviceHandle(1), PerformanceMode::High);
        assert!(matches!(err, Err(DriverError::Init(_))));
        assert!(matches!(driver.execute(&EXE), Err(DriverError::NotOpen)));
        assert_eq!(driver.temperature(), None);
    }

    #[test]
    fn test_execute_records_and_heats() {
        let device = DeviceHandle(3);
        let driver = SimAcceleratorDriver::new(booted_model(device));
        driver.open(device, PerformanceMode::Max).unwrap();

        let idle = driver.temperature().unwrap();
        driver.execute(&EXE).unwrap();
        driver.execute(&EXE).unwrap();

        assert!(driver.temperature().unwrap() > idle);
        assert_eq!(driver.executions().len(), 2);
        assert_eq!(driver.executions()[0].parameter_bytes, 8);
        assert_eq!(driver.open_count(), 1);

        driver.close();
        assert!(!driver.is_open());
        assert_eq!(driver.temperature(), None);
    }

    #[test]
    fn test_execute_fails_after_disconnect() {
        let device = DeviceHandle(5);
        let model = booted_model(device);
        let driver = SimAcceleratorDriver::new(model.clone());
        driver.open(device, PerformanceMode::Low).unwrap();

        lock(&model).disconnect();
        assert!(matches!(
            driver.execute(&EXE),
            Err(DriverError::Execution(_))
        ));
    }
}
