//! Boundary toward the windowing system.
//!
//! The engine only talks to the compositor through [`WindowingSystem`]. Every
//! call is synchronous except monitor moves, whose completion is reported on
//! the [`WindowEvent`] broadcast.

pub mod hyprland;

#[cfg(test)]
pub(crate) mod fake;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::session::MaximizeMode;

/// Compositor-assigned window handle, valid while the window lives.
pub type WindowId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Current state of a live window as reported by the compositor.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveWindow {
    pub id: WindowId,
    pub stable_id: String,
    pub title: String,
    pub wm_class: String,
    pub wm_class_instance: String,
    pub pid: u32,
    /// `None` while the window has no workspace (e.g. during a compositor restart).
    pub workspace: Option<i32>,
    pub on_all_workspaces: bool,
    pub monitor: i32,
    pub frame: Rect,
    pub maximized: MaximizeMode,
    pub above: bool,
    pub fullscreen: bool,
    /// Transient dialogs and override-redirect windows.
    pub ignored: bool,
    pub focused: bool,
}

/// A running application and the windows it owns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Application {
    pub name: String,
    pub desktop_entry_id: Option<String>,
    pub desktop_entry_path: Option<String>,
    pub windows: Vec<WindowId>,
}

impl Application {
    /// Applications without an installed desktop entry.
    pub fn is_window_backed(&self) -> bool {
        self.desktop_entry_id.is_none()
    }

    pub fn key(&self) -> &str {
        self.desktop_entry_id.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    EnteredMonitor { window: WindowId, monitor: i32 },
}

#[derive(Debug, Error)]
pub enum WindowingError {
    #[error("window {0} no longer exists")]
    UnknownWindow(WindowId),

    #[error("workspace {0} could not be created")]
    Workspace(i32),

    #[error("request rejected by the compositor: {0}")]
    Rejected(String),

    #[error("backend command failed: {0}")]
    Backend(String),

    #[error("backend returned invalid response: {0}")]
    InvalidResponse(String),

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operations the session engine needs from the compositor.
pub trait WindowingSystem: Send + Sync {
    fn applications(&self) -> Result<Vec<Application>, WindowingError>;
    fn application_of(&self, window: WindowId) -> Result<Option<Application>, WindowingError>;
    fn window(&self, window: WindowId) -> Result<LiveWindow, WindowingError>;

    fn monitor_count(&self) -> i32;
    fn primary_monitor(&self) -> i32;
    /// Usable area of a monitor (panels excluded).
    fn work_area(&self, monitor: i32) -> Option<Rect>;

    fn workspace_count(&self) -> i32;
    fn active_workspace(&self) -> i32;
    /// Appends a workspace and returns its index.
    fn append_workspace(&self) -> Result<i32, WindowingError>;
    fn set_workspace_persistent(&self, index: i32, persistent: bool)
    -> Result<(), WindowingError>;

    /// Requests a monitor move. Completion arrives as [`WindowEvent::EnteredMonitor`].
    fn move_to_monitor(&self, window: WindowId, monitor: i32) -> Result<(), WindowingError>;
    fn change_workspace(&self, window: WindowId, workspace: i32) -> Result<(), WindowingError>;
    fn focus(&self, window: WindowId) -> Result<(), WindowingError>;

    fn move_frame(&self, window: WindowId, x: i32, y: i32) -> Result<(), WindowingError>;
    fn move_resize_frame(&self, window: WindowId, frame: Rect) -> Result<(), WindowingError>;
    fn maximize(&self, window: WindowId, mode: MaximizeMode) -> Result<(), WindowingError>;
    fn unmaximize(&self, window: WindowId, mode: MaximizeMode) -> Result<(), WindowingError>;
    fn make_above(&self, window: WindowId) -> Result<(), WindowingError>;
    fn stick(&self, window: WindowId) -> Result<(), WindowingError>;
    /// True when a resize issued right after an unmaximize may be dropped.
    fn unmaximize_is_deferred(&self) -> bool;

    /// The window currently tiled next to `window`, if any.
    fn tile_match(&self, window: WindowId) -> Result<Option<WindowId>, WindowingError>;
    fn set_tile_partner(&self, window: WindowId, partner: WindowId)
    -> Result<(), WindowingError>;

    fn subscribe(&self) -> broadcast::Receiver<WindowEvent>;
}
