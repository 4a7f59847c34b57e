use super::cancel::{CancelToken, is_cancelled};
use super::error::{SaveOutcome, SessionError};
use super::model::{SavedWindowSession, SessionDocument};
use super::options::{AUTOSAVED_SESSION_NAME, StoreOptions, is_lock_or_temp};
use chrono::Utc;
use fs2::FileExt;
use log::{debug, info, warn};
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Mode for every directory the store creates.
const DIRECTORY_MODE: u32 = 0o744;

/// Summary of one saved session for listings.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
    /// `None` when the file could not be parsed.
    pub record_count: Option<usize>,
}

/// JSON document store for whole sessions and per-window records.
#[derive(Debug, Clone)]
pub struct SessionStore {
    options: StoreOptions,
}

impl SessionStore {
    pub fn new(options: StoreOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Persist a session document, backing up the file it replaces.
    pub fn save(
        &self,
        document: &SessionDocument,
        cancel: Option<&CancelToken>,
    ) -> Result<SaveOutcome, SessionError> {
        if is_cancelled(cancel) {
            debug!("Save of '{}' cancelled", document.session_name);
            return Ok(SaveOutcome::Cancelled);
        }

        let sessions_dir = self.options.sessions_dir();
        create_dir(&sessions_dir)?;

        let name = &document.session_name;
        let lock_path = self.options.lock_file_path(name);
        let lock_file = open_lock(&lock_path)?;
        lock_file.lock_exclusive().map_err(|err| {
            SessionError::storage(
                format!("failed to lock session file {}", lock_path.display()),
                err,
            )
        })?;

        let result = self.save_locked(document, cancel);

        FileExt::unlock(&lock_file).unwrap_or_else(|err| {
            warn!(
                "failed to unlock session file {}: {}",
                lock_path.display(),
                err
            )
        });

        result
    }

    fn save_locked(
        &self,
        document: &SessionDocument,
        cancel: Option<&CancelToken>,
    ) -> Result<SaveOutcome, SessionError> {
        let session_path = self.options.session_file_path(&document.session_name);
        let json_bytes = serde_json::to_vec_pretty(document).map_err(|err| {
            SessionError::Malformed {
                path: session_path.clone(),
                source: err,
            }
        })?;

        if is_cancelled(cancel) {
            debug!(
                "Save of '{}' cancelled before writing",
                document.session_name
            );
            return Ok(SaveOutcome::Cancelled);
        }

        if session_path.exists() && self.options.backups {
            let backup_path = self
                .options
                .backup_file_path(&document.session_name, Utc::now().timestamp_millis());
            create_dir(&self.options.backups_dir())?;
            fs::copy(&session_path, &backup_path).map_err(|err| {
                SessionError::storage(
                    format!(
                        "failed to back up session file {} -> {}",
                        session_path.display(),
                        backup_path.display()
                    ),
                    err,
                )
            })?;
            debug!("Backed up previous session to {}", backup_path.display());
        }

        write_atomically(&session_path, &json_bytes)?;

        info!(
            "Session '{}' saved to {} ({} windows, {} bytes)",
            document.session_name,
            session_path.display(),
            document.records.len(),
            json_bytes.len()
        );

        Ok(SaveOutcome::Saved(session_path))
    }

    /// Load a saved session. Every record starts unconsumed.
    pub fn load(&self, name: &str) -> Result<SessionDocument, SessionError> {
        let session_path = self.options.session_file_path(name);
        if !session_path.exists() {
            return Err(SessionError::NotFound(name.to_string()));
        }

        let lock_path = self.options.lock_file_path(name);
        let lock_file = open_lock(&lock_path)?;
        FileExt::lock_shared(&lock_file).map_err(|err| {
            SessionError::storage(
                format!("failed to acquire shared lock {}", lock_path.display()),
                err,
            )
        })?;

        let result = read_document(&session_path);

        FileExt::unlock(&lock_file).unwrap_or_else(|err| {
            warn!(
                "failed to unlock session file {}: {}",
                lock_path.display(),
                err
            )
        });

        let mut document = result?;
        if document.session_name.is_empty() {
            document.session_name = name.to_string();
        }
        debug!(
            "Loaded session '{}' with {} windows",
            document.session_name,
            document.records.len()
        );
        Ok(document)
    }

    /// Saved sessions sorted by name.
    pub fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let dir = self.options.sessions_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(SessionError::storage(
                    format!("failed to read session directory {}", dir.display()),
                    err,
                ));
            }
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || is_lock_or_temp(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            let metadata = entry.metadata().ok();
            let record_count = match read_document(&path) {
                Ok(document) => Some(document.records.len()),
                Err(err) => {
                    debug!("Unreadable session file {}: {}", path.display(), err);
                    None
                }
            };
            sessions.push(SessionSummary {
                name,
                size_bytes: metadata.as_ref().map_or(0, |m| m.len()),
                modified: metadata.as_ref().and_then(|m| m.modified().ok()),
                record_count,
                path,
            });
        }

        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sessions)
    }

    /// Remove a saved session. Backups are kept.
    pub fn delete(&self, name: &str) -> Result<bool, SessionError> {
        let removed = remove_file_if_exists(&self.options.session_file_path(name))?;
        remove_file_if_exists(&self.options.lock_file_path(name))?;
        Ok(removed)
    }

    /// Backups of one session, oldest first.
    pub fn backups(&self, name: &str) -> Result<Vec<PathBuf>, SessionError> {
        let prefix = format!(
            "{}.backup-",
            self.options
                .session_file_path(name)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
        );
        let mut backups: Vec<(i64, PathBuf)> = Vec::new();
        if let Ok(entries) = fs::read_dir(self.options.backups_dir()) {
            for entry in entries.flatten() {
                let path = entry.path();
                let stamp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix(&prefix))
                    .and_then(|s| s.parse::<i64>().ok());
                if let Some(stamp) = stamp {
                    backups.push((stamp, path));
                }
            }
        }
        backups.sort();
        Ok(backups.into_iter().map(|(_, path)| path).collect())
    }

    /// Persist one window's record to its own file.
    pub fn save_window_record(&self, record: &SavedWindowSession) -> Result<PathBuf, SessionError> {
        let app_dir = self.options.application_dir(record.application_key());
        create_dir(&app_dir)?;
        let path = self
            .options
            .window_record_path(record.application_key(), &record.window_id);
        let json_bytes =
            serde_json::to_vec_pretty(record).map_err(|err| SessionError::Malformed {
                path: path.clone(),
                source: err,
            })?;
        write_atomically(&path, &json_bytes)?;
        debug!(
            "Saved window '{}' of {} to {}",
            record.window_title,
            record.app_name,
            path.display()
        );
        Ok(path)
    }

    pub fn remove_window_record(
        &self,
        application_key: &str,
        stable_window_id: &str,
    ) -> Result<bool, SessionError> {
        let path = self
            .options
            .window_record_path(application_key, stable_window_id);
        let removed = remove_file_if_exists(&path)?;
        if removed {
            debug!("Removed window record {}", path.display());
        }
        Ok(removed)
    }

    /// Remove every window record of one application.
    pub fn remove_application_records(&self, application_key: &str) -> Result<usize, SessionError> {
        let dir = self.options.application_dir(application_key);
        let mut removed = 0;
        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") && remove_file_if_exists(&path)? {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            fs::remove_dir(&dir).ok();
        }
        Ok(removed)
    }

    /// Every stored per-window record, grouped by application directory order.
    pub fn load_window_records(&self) -> Result<Vec<SavedWindowSession>, SessionError> {
        let mut records = Vec::new();
        let Ok(app_dirs) = fs::read_dir(self.options.windows_dir()) else {
            return Ok(records);
        };
        let mut app_dirs: Vec<PathBuf> = app_dirs.flatten().map(|e| e.path()).collect();
        app_dirs.sort();
        for app_dir in app_dirs.into_iter().filter(|p| p.is_dir()) {
            let Ok(files) = fs::read_dir(&app_dir) else {
                continue;
            };
            let mut files: Vec<PathBuf> = files.flatten().map(|e| e.path()).collect();
            files.sort();
            for file in files {
                if file.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                match read_json::<SavedWindowSession>(&file) {
                    Ok(record) => records.push(record),
                    Err(err) => warn!("Skipping window record {}: {}", file.display(), err),
                }
            }
        }
        Ok(records)
    }

    /// Session made of every autosaved window record, for restoring after a
    /// logout without an explicit save.
    pub fn load_autosaved(&self) -> Result<SessionDocument, SessionError> {
        let records = self.load_window_records()?;
        if records.is_empty() {
            return Err(SessionError::NotFound(AUTOSAVED_SESSION_NAME.to_string()));
        }
        let mut document = SessionDocument::new(AUTOSAVED_SESSION_NAME, 0);
        document.records = records;
        info!(
            "Loaded {} autosaved window records",
            document.records.len()
        );
        Ok(document)
    }
}

fn read_document(path: &Path) -> Result<SessionDocument, SessionError> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SessionError> {
    let bytes = fs::read(path).map_err(|err| {
        SessionError::storage(format!("failed to read {}", path.display()), err)
    })?;
    serde_json::from_slice(&bytes).map_err(|err| SessionError::Malformed {
        path: path.to_path_buf(),
        source: err,
    })
}

fn create_dir(dir: &Path) -> Result<(), SessionError> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIRECTORY_MODE)
        .create(dir)
        .map_err(|err| {
            SessionError::storage(format!("failed to create directory {}", dir.display()), err)
        })
}

fn open_lock(lock_path: &Path) -> Result<File, SessionError> {
    if let Some(parent) = lock_path.parent() {
        create_dir(parent)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|err| {
            SessionError::storage(
                format!("failed to open session lock file {}", lock_path.display()),
                err,
            )
        })
}

/// Write to a sibling temp file, sync, then rename over `target`.
fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), SessionError> {
    let tmp_path = temp_path(target);
    {
        let mut tmp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .map_err(|err| {
                SessionError::storage(
                    format!("failed to open temporary file {}", tmp_path.display()),
                    err,
                )
            })?;
        tmp_file
            .write_all(bytes)
            .and_then(|_| tmp_file.sync_all())
            .map_err(|err| {
                fs::remove_file(&tmp_path).ok();
                SessionError::storage(format!("failed to write {}", tmp_path.display()), err)
            })?;
    }

    fs::rename(&tmp_path, target).map_err(|err| {
        fs::remove_file(&tmp_path).ok();
        SessionError::storage(
            format!(
                "failed to move temporary file {} -> {}",
                tmp_path.display(),
                target.display()
            ),
            err,
        )
    })
}

fn temp_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("session");
    let mut candidate = target.with_file_name(format!(".{file_name}.tmp"));
    let mut counter = 0u32;
    while candidate.exists() {
        counter += 1;
        candidate = target.with_file_name(format!(".{file_name}.{counter}.tmp"));
    }
    candidate
}

fn remove_file_if_exists(path: &Path) -> Result<bool, SessionError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(SessionError::storage(
            format!("failed to remove {}", path.display()),
            err,
        )),
    }
}
