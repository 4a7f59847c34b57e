//! Persisted session records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::windowing::Rect;

/// Coordinate source tag written next to every saved position.
pub const POSITION_PROVIDER: &str = "Meta";

/// Desktop number used for windows pinned to every workspace.
pub const ALL_WORKSPACES: i32 = -1;

/// Monitor number recorded for windows the compositor did not manage at save time.
pub const UNMANAGED_MONITOR: i32 = -1;

/// Which axes of a window are maximized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaximizeMode {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

impl MaximizeMode {
    pub fn from_axes(horizontal: bool, vertical: bool) -> Self {
        match (horizontal, vertical) {
            (true, true) => MaximizeMode::Both,
            (true, false) => MaximizeMode::Horizontal,
            (false, true) => MaximizeMode::Vertical,
            (false, false) => MaximizeMode::None,
        }
    }

    pub fn is_maximized(self) -> bool {
        self != MaximizeMode::None
    }
}

/// Saved frame geometry in device pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPosition {
    pub provider: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl WindowPosition {
    pub fn from_rect(rect: Rect) -> Self {
        Self {
            provider: POSITION_PROVIDER.to_string(),
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.provider == POSITION_PROVIDER
    }
}

impl Default for WindowPosition {
    fn default() -> Self {
        Self::from_rect(Rect::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowVisualState {
    pub sticky: bool,
    pub above: bool,
    pub maximized: MaximizeMode,
}

/// Lookup key for the other half of a tiled pair. Resolved against live
/// windows at restore time; never a handle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingPartnerRef {
    pub app_name: String,
    pub desktop_entry_id: String,
    pub desktop_entry_path: String,
    pub window_title: String,
}

/// Process details captured at save time. All fields are `None` when the
/// process listing was unavailable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessMetadata {
    pub process_create_time: Option<String>,
    pub cpu_percent: Option<f32>,
    pub memory_percent: Option<f32>,
    pub cmd: Option<Vec<String>>,
}

impl ProcessMetadata {
    pub fn is_known(&self) -> bool {
        self.process_create_time.is_some() || self.cmd.is_some()
    }
}

/// One saved window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedWindowSession {
    /// Stable window id, valid for one compositor session.
    pub window_id: String,
    /// Workspace index, or [`ALL_WORKSPACES`].
    pub desktop_number: i32,
    /// `None` for files written before monitors were tracked.
    pub monitor_number: Option<i32>,
    pub is_on_primary_monitor: bool,
    pub pid: u32,
    pub username: String,
    pub hostname: String,
    pub window_title: String,
    pub app_name: String,
    pub wm_class: String,
    pub wm_class_instance: String,
    /// Sibling windows of the same application, ignored windows excluded.
    pub windows_count: usize,
    pub fullscreen: bool,
    pub window_state: WindowVisualState,
    pub window_position: WindowPosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_tiling: Option<TilingPartnerRef>,
    /// Empty for window-backed applications.
    pub desktop_entry_id: String,
    pub desktop_file_path: String,
    /// Directory a relative command line of a window-backed app resolves against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub process: ProcessMetadata,
    /// Set once this record has been consumed during a restore run.
    #[serde(skip)]
    pub moved: bool,
}

impl SavedWindowSession {
    pub fn is_window_backed(&self) -> bool {
        self.desktop_entry_id.is_empty()
    }

    pub fn is_sticky(&self) -> bool {
        self.window_state.sticky || self.desktop_number == ALL_WORKSPACES
    }

    /// Directory name grouping per-window record files of one application.
    pub fn application_key(&self) -> &str {
        if self.desktop_entry_id.is_empty() {
            &self.app_name
        } else {
            &self.desktop_entry_id
        }
    }
}

/// A whole saved session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDocument {
    pub session_name: String,
    /// RFC 3339 timestamp.
    pub session_create_time: String,
    pub active_workspace_index: i32,
    pub records: Vec<SavedWindowSession>,
}

impl SessionDocument {
    pub fn new(session_name: impl Into<String>, active_workspace_index: i32) -> Self {
        Self {
            session_name: session_name.into(),
            session_create_time: chrono::Local::now().to_rfc3339(),
            active_workspace_index,
            records: Vec::new(),
        }
    }

    /// Records not yet consumed in the current restore run.
    pub fn pending(&self) -> impl Iterator<Item = &SavedWindowSession> {
        self.records.iter().filter(|record| !record.moved)
    }

    pub fn moved_count(&self) -> usize {
        self.records.iter().filter(|record| record.moved).count()
    }

    /// Forget which records were consumed so the document can be replayed.
    pub fn reset_moved(&mut self) {
        for record in &mut self.records {
            record.moved = false;
        }
    }

    /// Highest workspace index any record needs.
    pub fn max_desktop_number(&self) -> Option<i32> {
        self.records
            .iter()
            .map(|record| record.desktop_number)
            .filter(|desktop| *desktop >= 0)
            .max()
    }
}
