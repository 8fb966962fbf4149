//! Configuration module
//!
//! Handles device and logging settings stored as TOML

mod settings;

pub use settings::{AppConfig, DeviceSettings, LoggingSettings};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Settings file name inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("io", "flowio", "FlowIO").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Full path of the settings file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE))
}
