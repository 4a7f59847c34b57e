use std::path::PathBuf;

use thiserror::Error;

use crate::windowing::WindowingError;

/// Document-level failures surfaced to callers of save/restore.
///
/// `Display` is the short user-facing message; the underlying cause is
/// available through `source()`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{message}")]
    Storage {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session file {} is not valid", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("session '{0}' does not exist")]
    NotFound(String),

    #[error("could not query the windowing system")]
    Windowing(#[from] WindowingError),
}

impl SessionError {
    pub(crate) fn storage(message: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Storage {
            message: message.into(),
            source,
        }
    }
}

/// Result of a save request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    Cancelled,
}
