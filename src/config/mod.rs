//! Configuration file support for winsession.
//!
//! This module handles loading and validating user settings from the configuration file
//! located at `~/.config/winsession/config.toml`. Settings cover where sessions are
//! stored, which parts of a window are restored, and autosave timing.
//!
//! If no config file exists, sensible defaults are used automatically.

pub mod enums;
pub mod types;

pub use enums::StorageMode;
pub use types::{AutosaveConfig, LaunchConfig, RestoreConfig, StorageConfig};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure containing all user settings.
///
/// # Example TOML
/// ```toml
/// [storage]
/// mode = "custom"
/// custom_directory = "~/sessions"
///
/// [restore]
/// restore_tiling = false
/// geometry_delay_ms = 500
///
/// [autosave]
/// enabled = true
/// interval_secs = 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub restore: RestoreConfig,

    #[serde(default)]
    pub autosave: AutosaveConfig,

    #[serde(default)]
    pub launch: LaunchConfig,
}

impl Config {
    /// Clamps out-of-range values and logs a warning for each one.
    ///
    /// Validated ranges:
    /// - `restore.geometry_delay_ms`: 0 - 5000
    /// - `restore.monitor_timeout_ms`: 100 - 30000
    /// - `autosave.interval_secs`: 1 - 3600
    fn validate_and_clamp(&mut self) {
        if self.restore.geometry_delay_ms > 5000 {
            log::warn!(
                "Invalid geometry_delay_ms {}, clamping to 0-5000 range",
                self.restore.geometry_delay_ms
            );
            self.restore.geometry_delay_ms = 5000;
        }

        if !(100..=30_000).contains(&self.restore.monitor_timeout_ms) {
            log::warn!(
                "Invalid monitor_timeout_ms {}, clamping to 100-30000 range",
                self.restore.monitor_timeout_ms
            );
            self.restore.monitor_timeout_ms = self.restore.monitor_timeout_ms.clamp(100, 30_000);
        }

        if !(1..=3600).contains(&self.autosave.interval_secs) {
            log::warn!(
                "Invalid autosave interval_secs {}, clamping to 1-3600 range",
                self.autosave.interval_secs
            );
            self.autosave.interval_secs = self.autosave.interval_secs.clamp(1, 3600);
        }

        if matches!(self.storage.mode, StorageMode::Custom)
            && self
                .storage
                .custom_directory
                .as_deref()
                .is_none_or(|dir| dir.trim().is_empty())
        {
            log::warn!("storage.mode = \"custom\" without custom_directory, falling back to auto");
            self.storage.mode = StorageMode::Auto;
        }
    }

    /// Returns the path to the configuration file (`~/.config/winsession/config.toml`).
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be determined (e.g., HOME not set).
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("winsession");

        Ok(config_dir.join("config.toml"))
    }

    /// Loads configuration from the default path, or returns defaults if not found.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Loads configuration from `config_path`, or returns defaults if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or contains invalid TOML.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!("Config file not found, using defaults");
            debug!("Expected config at: {}", config_path.display());
            return Ok(Self::default());
        }

        let config_str = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config from {}", config_path.display()))?;

        config.validate_and_clamp();

        info!("Loaded config from {}", config_path.display());
        debug!("Config: {:?}", config);

        Ok(config)
    }
}
