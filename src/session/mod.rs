//! Session documents and their persistence.
//!
//! Defines the saved record types, the JSON document store with timestamped
//! backups, and the per-window record files used by autosave.

mod cancel;
mod error;
mod model;
mod options;
mod storage;

pub use cancel::CancelToken;
pub(crate) use cancel::is_cancelled;
pub use error::{SaveOutcome, SessionError};
pub use model::{
    ALL_WORKSPACES, MaximizeMode, POSITION_PROVIDER, ProcessMetadata, SavedWindowSession,
    SessionDocument, TilingPartnerRef, UNMANAGED_MONITOR, WindowPosition, WindowVisualState,
};
pub use options::{
    AUTOSAVED_SESSION_NAME, DEFAULT_SESSION_NAME, StoreOptions, options_from_config,
};
pub(crate) use options::sanitize_identifier;
pub use storage::{SessionStore, SessionSummary};
