//! Tool configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use peqhid_core::{DeviceProfile, DeviceRegistry};
use peqhid_hid::SessionConfig;
use serde::{Deserialize, Serialize};

/// Tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
    /// Session timing and codec settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Device selection
    #[serde(default)]
    pub device: DeviceConfig,
    /// Extra or overriding device profiles
    #[serde(default)]
    pub profiles: Vec<DeviceProfile>,
    /// File the configuration was read from, `None` for defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    /// Built-in registry extended with the configured profiles.
    #[must_use]
    pub fn registry(&self) -> DeviceRegistry {
        DeviceRegistry::builtin().with_profiles(self.profiles.iter().cloned())
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(not(feature = "hid"), allow(dead_code))]
pub struct DeviceConfig {
    /// USB Vendor ID (hex)
    #[serde(default = "default_vid")]
    pub vendor_id: String,
    /// Exact product name to open; any device of the vendor if unset
    #[serde(default)]
    pub product_name: Option<String>,
    /// Report id for output reports
    #[serde(default)]
    pub output_report_id: u8,
    /// Input reports carry a leading report id byte
    #[serde(default)]
    pub strip_report_id: bool,
}

impl DeviceConfig {
    /// Parsed vendor id.
    pub fn vendor_id(&self) -> Result<u16> {
        let hex = self.vendor_id.trim_start_matches("0x");
        u16::from_str_radix(hex, 16).with_context(|| format!("Invalid vendor id: {}", self.vendor_id))
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { vendor_id: default_vid(), product_name: None, output_report_id: 0, strip_report_id: false }
    }
}

fn default_vid() -> String {
    "2972".to_string()
}

/// Load configuration from the default location or defaults.
pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

/// Load configuration from a file, or defaults if it does not exist.
///
/// Runs before logging is set up, so nothing is logged here; callers report
/// [`Config::source`] once the subscriber is installed.
pub fn load_config_from(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {config_path:?}"))?;
        config.source = Some(config_path.to_path_buf());
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("com", "peqhid", "peqhid").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
