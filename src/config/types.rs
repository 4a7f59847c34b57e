//! Configuration type definitions.

use super::enums::StorageMode;
use serde::{Deserialize, Serialize};

/// Session file location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `auto` uses the XDG data directory, `custom` uses `custom_directory`
    #[serde(default)]
    pub mode: StorageMode,

    /// Base directory when `mode = "custom"` (a leading `~/` is expanded)
    #[serde(default)]
    pub custom_directory: Option<String>,

    /// Copy the previous session file into `backups/` before overwriting it
    #[serde(default = "default_true")]
    pub backups: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            custom_directory: None,
            backups: default_true(),
        }
    }
}

/// Which parts of a saved window are reapplied on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    #[serde(default = "default_true")]
    pub restore_monitor: bool,

    #[serde(default = "default_true")]
    pub restore_state: bool,

    #[serde(default = "default_true")]
    pub restore_geometry: bool,

    #[serde(default = "default_true")]
    pub restore_tiling: bool,

    #[serde(default = "default_true")]
    pub restore_workspace: bool,

    /// Wait after unmaximizing before resizing, on compositors that apply
    /// unmaximize asynchronously (valid range: 0 - 5000)
    #[serde(default = "default_geometry_delay_ms")]
    pub geometry_delay_ms: u64,

    /// Upper bound on waiting for a monitor move to complete (valid range: 100 - 30000)
    #[serde(default = "default_monitor_timeout_ms")]
    pub monitor_timeout_ms: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            restore_monitor: true,
            restore_state: true,
            restore_geometry: true,
            restore_tiling: true,
            restore_workspace: true,
            geometry_delay_ms: default_geometry_delay_ms(),
            monitor_timeout_ms: default_monitor_timeout_ms(),
        }
    }
}

/// Periodic per-window saving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between batched saves (valid range: 1 - 3600)
    #[serde(default = "default_autosave_interval")]
    pub interval_secs: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_autosave_interval(),
        }
    }
}

/// Relaunch helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Write a desktop entry for applications that have none, so they can be relaunched
    #[serde(default = "default_true")]
    pub generate_launchers: bool,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            generate_launchers: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_geometry_delay_ms() -> u64 {
    500
}

fn default_monitor_timeout_ms() -> u64 {
    2000
}

fn default_autosave_interval() -> u64 {
    5
}
