use crate::config::{StorageConfig, StorageMode};
use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};

pub const DEFAULT_SESSION_NAME: &str = "defaultSession";

/// Name given to the session assembled from autosaved window records.
pub const AUTOSAVED_SESSION_NAME: &str = "autosaved";

/// Runtime storage layout derived from configuration.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub base_dir: PathBuf,
    pub backups: bool,
}

impl StoreOptions {
    /// Creates options rooted at `base_dir` with backups enabled. Intended mainly for tests.
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            backups: true,
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.base_dir.join("sessions")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.sessions_dir().join("backups")
    }

    pub fn windows_dir(&self) -> PathBuf {
        self.base_dir.join("windows")
    }

    pub fn session_file_path(&self, name: &str) -> PathBuf {
        self.sessions_dir().join(sanitize_identifier(name))
    }

    pub fn lock_file_path(&self, name: &str) -> PathBuf {
        self.sessions_dir()
            .join(format!(".{}.lock", sanitize_identifier(name)))
    }

    pub fn backup_file_path(&self, name: &str, epoch_millis: i64) -> PathBuf {
        self.backups_dir().join(format!(
            "{}.backup-{}",
            sanitize_identifier(name),
            epoch_millis
        ))
    }

    pub fn application_dir(&self, application_key: &str) -> PathBuf {
        self.windows_dir().join(sanitize_identifier(application_key))
    }

    pub fn window_record_path(&self, application_key: &str, stable_window_id: &str) -> PathBuf {
        self.application_dir(application_key)
            .join(format!("{}.json", sanitize_identifier(stable_window_id)))
    }
}

/// Build runtime storage options from configuration values.
pub fn options_from_config(storage_cfg: &StorageConfig) -> Result<StoreOptions> {
    let base_dir = match storage_cfg.mode {
        StorageMode::Auto => {
            let root = dirs::data_dir()
                .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
                .ok_or_else(|| anyhow!("could not determine the data directory"))?;
            root.join("winsession")
        }
        StorageMode::Custom => {
            let raw = storage_cfg.custom_directory.as_ref().ok_or_else(|| {
                anyhow!("storage.custom_directory must be set when mode = \"custom\"")
            })?;
            let expanded = expand_tilde(raw);
            if expanded.as_os_str().is_empty() {
                return Err(anyhow!(
                    "storage.custom_directory resolved to an empty path"
                ));
            }
            expanded
        }
    };

    let mut options = StoreOptions::new(base_dir);
    options.backups = storage_cfg.backups;
    Ok(options)
}

/// Maps a name onto a safe single path component.
pub(crate) fn sanitize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return "default".to_string();
    }

    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub(crate) fn is_lock_or_temp(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.') || name.ends_with(".tmp"))
}
