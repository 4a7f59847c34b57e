//! Per-window restore pipeline.
//!
//! Steps run strictly in order: monitor, state, geometry, tiling, workspace,
//! state again. Workspace placement can reset sticky/above on some
//! compositors, which is why state is applied twice.

use std::fmt;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use crate::config::RestoreConfig;
use crate::session::{MaximizeMode, SavedWindowSession, TilingPartnerRef};
use crate::windowing::{Rect, WindowEvent, WindowId, WindowingError, WindowingSystem};

use super::provisioner::WorkspaceProvisioner;

/// Which restore steps run and how long suspensions may last.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub restore_monitor: bool,
    pub restore_state: bool,
    pub restore_geometry: bool,
    pub restore_tiling: bool,
    pub restore_workspace: bool,
    pub geometry_delay: Duration,
    pub monitor_timeout: Duration,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self::from(&RestoreConfig::default())
    }
}

impl From<&RestoreConfig> for RestoreOptions {
    fn from(config: &RestoreConfig) -> Self {
        Self {
            restore_monitor: config.restore_monitor,
            restore_state: config.restore_state,
            restore_geometry: config.restore_geometry,
            restore_tiling: config.restore_tiling,
            restore_workspace: config.restore_workspace,
            geometry_delay: Duration::from_millis(config.geometry_delay_ms),
            monitor_timeout: Duration::from_millis(config.monitor_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStep {
    Pending,
    MonitorRestoring,
    StateRestoring,
    GeometryRestoring,
    TilingRestoring,
    WorkspacePlacing,
    StateReapplying,
    Done,
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStep::Pending => "pending",
            RestoreStep::MonitorRestoring => "monitor",
            RestoreStep::StateRestoring => "state",
            RestoreStep::GeometryRestoring => "geometry",
            RestoreStep::TilingRestoring => "tiling",
            RestoreStep::WorkspacePlacing => "workspace",
            RestoreStep::StateReapplying => "state reapply",
            RestoreStep::Done => "done",
        };
        f.write_str(name)
    }
}

/// Whether the pipeline may move the window to another workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Full,
    /// The window already sits on its saved workspace.
    InPlace,
}

/// A window whose restore stopped at `step`.
#[derive(Debug, Error)]
#[error("restoring {step} of '{title}' ({app}) failed: {source}")]
pub struct RestoreFailure {
    pub window: WindowId,
    pub step: RestoreStep,
    pub title: String,
    pub app: String,
    #[source]
    pub source: WindowingError,
}

/// Emitted after two windows were paired as tile partners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingEstablished {
    pub window: WindowId,
    pub partner: WindowId,
}

/// Drives one live window back to a saved record.
pub struct WindowRestorer<'a> {
    windowing: &'a dyn WindowingSystem,
    options: &'a RestoreOptions,
    tiling: &'a broadcast::Sender<TilingEstablished>,
}

impl<'a> WindowRestorer<'a> {
    pub fn new(
        windowing: &'a dyn WindowingSystem,
        options: &'a RestoreOptions,
        tiling: &'a broadcast::Sender<TilingEstablished>,
    ) -> Self {
        Self {
            windowing,
            options,
            tiling,
        }
    }

    /// Runs every enabled step. The caller flags the record moved on success.
    pub async fn restore(
        &self,
        window: WindowId,
        record: &SavedWindowSession,
        placement: Placement,
    ) -> Result<(), RestoreFailure> {
        let fail = |step: RestoreStep, source: WindowingError| RestoreFailure {
            window,
            step,
            title: record.window_title.clone(),
            app: record.app_name.clone(),
            source,
        };

        debug!(
            "Restoring '{}' ({}) from {}",
            record.window_title,
            record.app_name,
            RestoreStep::Pending
        );

        if self.options.restore_monitor {
            self.restore_monitor(window, record)
                .await
                .map_err(|e| fail(RestoreStep::MonitorRestoring, e))?;
        }

        if self.options.restore_state {
            self.restore_state(window, record, RestoreStep::StateRestoring)
                .map_err(|e| fail(RestoreStep::StateRestoring, e))?;
        }

        if self.options.restore_geometry {
            self.restore_geometry(window, record)
                .await
                .map_err(|e| fail(RestoreStep::GeometryRestoring, e))?;
        }

        if self.options.restore_tiling {
            self.restore_tiling(window, record)
                .map_err(|e| fail(RestoreStep::TilingRestoring, e))?;
        }

        if self.options.restore_workspace {
            let place = match placement {
                Placement::Full => true,
                // Monitor moves can carry the window off its workspace.
                Placement::InPlace => self.left_saved_workspace(window, record),
            };
            if place {
                self.place_on_workspace(window, record)
                    .map_err(|e| fail(RestoreStep::WorkspacePlacing, e))?;
            }
        }

        if self.options.restore_state {
            self.restore_state(window, record, RestoreStep::StateReapplying)
                .map_err(|e| fail(RestoreStep::StateReapplying, e))?;
        }

        debug!(
            "Restoring '{}' ({}) reached {}",
            record.window_title,
            record.app_name,
            RestoreStep::Done
        );
        Ok(())
    }

    async fn restore_monitor(
        &self,
        window: WindowId,
        record: &SavedWindowSession,
    ) -> Result<(), WindowingError> {
        let live = self.windowing.window(window)?;
        let target = target_monitor(
            record.monitor_number,
            record.is_on_primary_monitor,
            self.windowing.monitor_count(),
            self.windowing.primary_monitor(),
        );
        if live.monitor == target {
            return Ok(());
        }

        // Subscribe first so the completion cannot slip past us.
        let mut events = self.windowing.subscribe();
        self.windowing.move_to_monitor(window, target)?;

        match timeout(
            self.options.monitor_timeout,
            wait_for_monitor(&mut events, window, target),
        )
        .await
        {
            Ok(true) => debug!("Window {} entered monitor {}", window, target),
            Ok(false) => {
                debug!("Event stream closed while moving window {} to monitor {}", window, target)
            }
            Err(_) => warn!(
                "Window '{}' did not report entering monitor {} within {:?}; continuing",
                record.window_title, target, self.options.monitor_timeout
            ),
        }
        Ok(())
    }

    fn restore_state(
        &self,
        window: WindowId,
        record: &SavedWindowSession,
        step: RestoreStep,
    ) -> Result<(), WindowingError> {
        let live = self.windowing.window(window)?;
        let saved = &record.window_state;

        if saved.above && !live.above {
            self.windowing.make_above(window)?;
        }
        if saved.sticky && !live.on_all_workspaces {
            self.windowing.stick(window)?;
        }
        let wants_maximize = match saved.maximized {
            MaximizeMode::None => false,
            MaximizeMode::Both => true,
            // Half-maximize goes back on once the frame is in place.
            MaximizeMode::Horizontal | MaximizeMode::Vertical => {
                step == RestoreStep::StateReapplying
            }
        };
        if wants_maximize && live.maximized != saved.maximized {
            self.windowing.maximize(window, saved.maximized)?;
        }
        Ok(())
    }

    async fn restore_geometry(
        &self,
        window: WindowId,
        record: &SavedWindowSession,
    ) -> Result<(), WindowingError> {
        let position = &record.window_position;
        if !position.is_supported() {
            warn!(
                "Skipping geometry of '{}': unsupported position provider '{}'",
                record.window_title, position.provider
            );
            return Ok(());
        }

        let live = self.windowing.window(window)?;
        let target = clamp_to_work_area(position.rect(), self.windowing.work_area(live.monitor));
        let saved_mode = record.window_state.maximized;

        if live.maximized == saved_mode && live.frame == target {
            return Ok(());
        }

        // A maximized window cannot be resized.
        let needs_unmaximize =
            live.maximized.is_maximized() && (live.maximized != saved_mode || live.frame != target);
        if !needs_unmaximize && live.frame == target {
            return Ok(());
        }

        if needs_unmaximize {
            self.windowing.unmaximize(window, MaximizeMode::Both)?;
            if self.windowing.unmaximize_is_deferred() && !self.options.geometry_delay.is_zero() {
                debug!(
                    "Deferring geometry of '{}' by {:?} after unmaximize",
                    record.window_title, self.options.geometry_delay
                );
                sleep(self.options.geometry_delay).await;
            }
            if self.windowing.window(window)?.frame == target {
                return Ok(());
            }
        }

        // Some clients refuse a resize until they have been moved.
        self.windowing.move_frame(window, target.x, target.y)?;
        self.windowing.move_resize_frame(window, target)
    }

    fn restore_tiling(
        &self,
        window: WindowId,
        record: &SavedWindowSession,
    ) -> Result<(), WindowingError> {
        let Some(partner_ref) = &record.window_tiling else {
            return Ok(());
        };
        let Some(partner) = self.resolve_partner(partner_ref, window)? else {
            debug!(
                "Tile partner '{}' of '{}' is not running yet",
                partner_ref.window_title, record.window_title
            );
            return Ok(());
        };

        self.windowing.set_tile_partner(window, partner)?;
        self.windowing.set_tile_partner(partner, window)?;
        // Nobody listening is fine.
        let _ = self.tiling.send(TilingEstablished { window, partner });
        Ok(())
    }

    fn resolve_partner(
        &self,
        partner: &TilingPartnerRef,
        exclude: WindowId,
    ) -> Result<Option<WindowId>, WindowingError> {
        let applications = self.windowing.applications()?;
        let app = applications.iter().find(|app| {
            if partner.desktop_entry_id.is_empty() {
                app.is_window_backed() && app.name == partner.app_name
            } else {
                app.desktop_entry_id.as_deref() == Some(partner.desktop_entry_id.as_str())
            }
        });
        let Some(app) = app else {
            return Ok(None);
        };

        let candidates: Vec<_> = app
            .windows
            .iter()
            .filter(|id| **id != exclude)
            .filter_map(|id| self.windowing.window(*id).ok())
            .filter(|w| !w.ignored)
            .collect();

        Ok(match candidates.as_slice() {
            [] => None,
            [only] => Some(only.id),
            many => many
                .iter()
                .find(|w| w.title == partner.window_title)
                .map(|w| w.id),
        })
    }

    fn left_saved_workspace(&self, window: WindowId, record: &SavedWindowSession) -> bool {
        if record.is_sticky() {
            return false;
        }
        match self.windowing.window(window) {
            Ok(live) if !live.on_all_workspaces => {
                let left = live.workspace != Some(record.desktop_number);
                if left {
                    debug!(
                        "'{}' left workspace {} while restoring; placing it again",
                        record.window_title, record.desktop_number
                    );
                }
                left
            }
            _ => false,
        }
    }

    fn place_on_workspace(
        &self,
        window: WindowId,
        record: &SavedWindowSession,
    ) -> Result<(), WindowingError> {
        let live = self.windowing.window(window)?;
        // Changing the workspace of a sticky window would unstick it.
        if record.is_sticky() || live.on_all_workspaces {
            return Ok(());
        }

        WorkspaceProvisioner::new(self.windowing).ensure(record.desktop_number)?;
        if live.workspace == Some(record.desktop_number) {
            return Ok(());
        }

        self.windowing
            .change_workspace(window, record.desktop_number)?;
        if live.focused {
            self.windowing.focus(window)?;
        }
        Ok(())
    }
}

/// Monitor a saved window should return to. Windows saved on the primary
/// monitor follow the current primary. Unknown, unmanaged and disconnected
/// monitors fall back to the primary one.
pub fn target_monitor(
    saved: Option<i32>,
    on_primary: bool,
    monitor_count: i32,
    primary: i32,
) -> i32 {
    match saved {
        _ if on_primary => primary,
        Some(index) if index >= 0 && index < monitor_count => index,
        _ => primary,
    }
}

/// Keeps the frame top inside the work area so the clip region stays valid.
pub fn clamp_to_work_area(mut frame: Rect, work_area: Option<Rect>) -> Rect {
    if let Some(area) = work_area {
        frame.y = frame.y.max(area.y);
    }
    frame
}

async fn wait_for_monitor(
    events: &mut broadcast::Receiver<WindowEvent>,
    window: WindowId,
    monitor: i32,
) -> bool {
    loop {
        match events.recv().await {
            Ok(WindowEvent::EnteredMonitor {
                window: entered,
                monitor: target,
            }) if entered == window && target == monitor => return true,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Missed {} window events while waiting for a monitor move", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}
