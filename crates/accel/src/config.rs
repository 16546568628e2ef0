//! Firmware configuration management

use crate::manager::ManagerSettings;
use crate::sim::SimOptions;
use crate::usb::{AttachSettings, DfuSettings};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccelConfig {
    pub firmware: FirmwareSettings,
    #[serde(default)]
    pub tasks: TaskSettings,
    #[serde(default)]
    pub power: PowerSettings,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub dfu: DfuConfig,
    /// Simulated board behaviour
    #[serde(default)]
    pub board: BoardSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareSettings {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Request queue depth of every actor task
    #[serde(default = "TaskSettings::default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            queue_depth: Self::default_queue_depth(),
        }
    }
}

impl TaskSettings {
    fn default_queue_depth() -> usize {
        32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerSettings {
    /// Delay between power-good polls in microseconds (0 = yield only)
    #[serde(default = "PowerSettings::default_poll_interval")]
    pub poll_interval_us: u64,
}

impl Default for PowerSettings {
    fn default() -> Self {
        Self {
            poll_interval_us: Self::default_poll_interval(),
        }
    }
}

impl PowerSettings {
    fn default_poll_interval() -> u64 {
        100
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "ManagerConfig::default_open_poll_interval")]
    pub open_poll_interval_ms: u64,
    /// Wait between runtime shutdown and power removal
    #[serde(default = "ManagerConfig::default_power_down_settle")]
    pub power_down_settle_ms: u64,
    /// Packages whose parameters stay resident on the device
    #[serde(default = "ManagerConfig::default_cache_slots")]
    pub cache_slots: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            open_poll_interval_ms: Self::default_open_poll_interval(),
            power_down_settle_ms: Self::default_power_down_settle(),
            cache_slots: Self::default_cache_slots(),
        }
    }
}

impl ManagerConfig {
    fn default_open_poll_interval() -> u64 {
        10
    }

    fn default_power_down_settle() -> u64 {
        100
    }

    fn default_cache_slots() -> usize {
        4
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DfuConfig {
    /// Used when the device has no DFU functional descriptor
    #[serde(default = "DfuConfig::default_detach_timeout")]
    pub detach_timeout_ms: u16,
    /// Cap on the poll timeout a device may request in a status report
    #[serde(default = "DfuConfig::default_max_poll_timeout")]
    pub max_poll_timeout_ms: u64,
    /// Runtime image to download; a placeholder image is used when unset
    #[serde(default)]
    pub firmware_path: Option<String>,
}

impl Default for DfuConfig {
    fn default() -> Self {
        Self {
            detach_timeout_ms: Self::default_detach_timeout(),
            max_poll_timeout_ms: Self::default_max_poll_timeout(),
            firmware_path: None,
        }
    }
}

impl DfuConfig {
    fn default_detach_timeout() -> u16 {
        1000
    }

    fn default_max_poll_timeout() -> u64 {
        5000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSettings {
    /// Time from power enable until power-good
    #[serde(default = "BoardSettings::default_power_good_delay")]
    pub power_good_delay_ms: u64,
    /// wTransferSize advertised by the boot ROM
    #[serde(default = "BoardSettings::default_transfer_size")]
    pub transfer_size: u16,
    /// Size of the placeholder runtime image
    #[serde(default = "BoardSettings::default_image_size")]
    pub placeholder_image_size: usize,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            power_good_delay_ms: Self::default_power_good_delay(),
            transfer_size: Self::default_transfer_size(),
            placeholder_image_size: Self::default_image_size(),
        }
    }
}

impl BoardSettings {
    fn default_power_good_delay() -> u64 {
        5
    }

    fn default_transfer_size() -> u16 {
        256
    }

    fn default_image_size() -> usize {
        16 * 1024
    }

    pub fn sim_options(&self) -> SimOptions {
        SimOptions {
            power_good_delay: Duration::from_millis(self.power_good_delay_ms),
            transfer_size: self.transfer_size,
            ..SimOptions::default()
        }
    }
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            firmware: FirmwareSettings {
                log_level: "info".to_string(),
            },
            tasks: TaskSettings::default(),
            power: PowerSettings::default(),
            manager: ManagerConfig::default(),
            dfu: DfuConfig::default(),
            board: BoardSettings::default(),
        }
    }
}

impl AccelConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/accel-firmware/accel.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: AccelConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("accel-firmware").join("accel.toml")
        } else {
            PathBuf::from(".config/accel-firmware/accel.toml")
        }
    }

    /// Firmware image path with `~` expanded
    pub fn firmware_path(&self) -> Option<PathBuf> {
        self.dfu
            .firmware_path
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }

    pub fn attach_settings(&self) -> AttachSettings {
        AttachSettings {
            power_poll_interval: Duration::from_micros(self.power.poll_interval_us),
        }
    }

    pub fn dfu_settings(&self) -> DfuSettings {
        DfuSettings {
            detach_timeout_ms: self.dfu.detach_timeout_ms,
            max_poll_timeout: Duration::from_millis(self.dfu.max_poll_timeout_ms),
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            open_poll_interval: Duration::from_millis(self.manager.open_poll_interval_ms),
            power_down_settle: Duration::from_millis(self.manager.power_down_settle_ms),
            cache_slots: self.manager.cache_slots,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.firmware.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.firmware.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.tasks.queue_depth == 0 {
            return Err(anyhow!("Task queue depth must be at least 1"));
        }

        if !(1..=16).contains(&self.manager.cache_slots) {
            return Err(anyhow!(
                "Invalid cache_slots {}, must be between 1 and 16",
                self.manager.cache_slots
            ));
        }

        if self.board.transfer_size == 0 {
            return Err(anyhow!("Board transfer_size must be non-zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AccelConfig::default();
        assert_eq!(config.firmware.log_level, "info");
        assert_eq!(config.tasks.queue_depth, 32);
        assert_eq!(config.manager.cache_slots, 4);
        assert!(config.dfu.firmware_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = AccelConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: AccelConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.firmware.log_level, parsed.firmware.log_level);
        assert_eq!(config.manager.cache_slots, parsed.manager.cache_slots);
        assert_eq!(config.board.transfer_size, parsed.board.transfer_size);
    }

    #[test]
    fn test_minimal_file_uses_section_defaults() {
        let parsed: AccelConfig = toml::from_str(
            r#"
            [firmware]
            log_level = "debug"

            [manager]
            cache_slots = 8
            "#,
        )
        .unwrap();

        assert_eq!(parsed.manager.cache_slots, 8);
        assert_eq!(parsed.manager.open_poll_interval_ms, 10);
        assert_eq!(parsed.tasks.queue_depth, 32);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = AccelConfig::default();
        config.firmware.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.firmware.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_limits() {
        let mut config = AccelConfig::default();
        config.tasks.queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = AccelConfig::default();
        config.manager.cache_slots = 0;
        assert!(config.validate().is_err());
        config.manager.cache_slots = 17;
        assert!(config.validate().is_err());
        config.manager.cache_slots = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_firmware_path_expands_tilde() {
        let mut config = AccelConfig::default();
        config.dfu.firmware_path = Some("~/fw/apex.bin".to_string());

        let path = config.firmware_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~') || dirs::home_dir().is_none());
        assert!(path.ends_with("fw/apex.bin"));
    }

    #[test]
    fn test_settings_conversion() {
        let mut config = AccelConfig::default();
        config.manager.power_down_settle_ms = 250;
        config.power.poll_interval_us = 0;

        assert_eq!(
            config.manager_settings().power_down_settle,
            Duration::from_millis(250)
        );
        assert!(config.attach_settings().power_poll_interval.is_zero());
        assert_eq!(config.dfu_settings().detach_timeout_ms, 1000);
        assert_eq!(
            config.dfu_settings().max_poll_timeout,
            Duration::from_millis(5000)
        );

        config.board.transfer_size = 64;
        let options = config.board.sim_options();
        assert_eq!(options.transfer_size, 64);
        assert_eq!(options.power_good_delay, Duration::from_millis(5));
        assert!(!options.corrupt_readback);
    }
}
