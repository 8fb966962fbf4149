//! Application settings

use crate::core::session::{SessionConfig, DEVICE_NAME_PREFIX};
use crate::core::state_machine::ReconnectPolicy;
use crate::core::transport::BluetoothConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

type ConfigResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Device discovery and reconnect settings
    pub device: DeviceSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Load config from the user config directory, or defaults if absent
    pub fn load() -> ConfigResult<Self> {
        let dir = super::config_dir().ok_or("Could not determine config directory")?;
        Self::load_from(&dir.join(super::CONFIG_FILE))
    }

    /// Load config from `path`, or defaults if the file does not exist
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the user config directory
    pub fn save(&self) -> ConfigResult<()> {
        let dir = super::config_dir().ok_or("Could not determine config directory")?;
        std::fs::create_dir_all(&dir)?;
        self.save_to(&dir.join(super::CONFIG_FILE))
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Device settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Advertised name prefix to connect to
    pub name_prefix: String,
    /// Reconnect retries after the first failed attempt
    pub max_reconnect_attempts: u32,
    /// Scan duration in seconds
    pub scan_timeout_secs: u64,
    /// GATT connect timeout in seconds
    pub connection_timeout_secs: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name_prefix: DEVICE_NAME_PREFIX.to_string(),
            max_reconnect_attempts: 3,
            scan_timeout_secs: 5,
            connection_timeout_secs: 10,
        }
    }
}

impl DeviceSettings {
    /// Session configuration for these settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            name_prefix: self.name_prefix.clone(),
            reconnect: ReconnectPolicy {
                max_attempts: self.max_reconnect_attempts,
            },
        }
    }

    /// BLE transport configuration for these settings
    pub fn bluetooth_config(&self) -> BluetoothConfig {
        BluetoothConfig {
            scan_timeout_secs: self.scan_timeout_secs,
            connection_timeout_secs: self.connection_timeout_secs,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
