//! Configuration enum types.

use serde::{Deserialize, Serialize};

/// Where session files are kept.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// `$XDG_DATA_HOME/winsession`
    #[default]
    Auto,
    /// `storage.custom_directory`
    Custom,
}
