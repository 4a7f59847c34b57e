//! Entry points that match live windows to a loaded document and restore them.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::session::{SessionDocument, SessionError};
use crate::windowing::{Application, LiveWindow, WindowId, WindowingSystem};

use super::matcher::{
    MatchOutcome, MatchScope, WindowKey, mark_moved, match_application_where,
    match_window_where,
};
use super::provisioner::WorkspaceProvisioner;
use super::restorer::{Placement, RestoreOptions, TilingEstablished, WindowRestorer};

const TILING_CHANNEL_CAPACITY: usize = 32;

/// Result of restoring one live window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOutcome {
    Restored,
    /// The window was already on its saved workspace.
    RestoredInPlace,
    Unmatched,
    Failed(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub in_place: usize,
    pub unmatched: usize,
    pub failures: Vec<String>,
}

impl RestoreReport {
    pub fn record(&mut self, outcome: WindowOutcome) {
        match outcome {
            WindowOutcome::Restored => self.restored += 1,
            WindowOutcome::RestoredInPlace => self.in_place += 1,
            WindowOutcome::Unmatched => self.unmatched += 1,
            WindowOutcome::Failed(message) => self.failures.push(message),
        }
    }

    pub fn merge(&mut self, other: RestoreReport) {
        self.restored += other.restored;
        self.in_place += other.in_place;
        self.unmatched += other.unmatched;
        self.failures.extend(other.failures);
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} restored, {} already in place, {} unmatched, {} failed",
            self.restored,
            self.in_place,
            self.unmatched,
            self.failures.len()
        )
    }
}

/// Restores live windows from a saved document. Windows are processed one at
/// a time; a failing window never stops the others.
pub struct RestoreEngine {
    windowing: Arc<dyn WindowingSystem>,
    options: RestoreOptions,
    tiling: broadcast::Sender<TilingEstablished>,
}

impl RestoreEngine {
    pub fn new(windowing: Arc<dyn WindowingSystem>, options: RestoreOptions) -> Self {
        let (tiling, _) = broadcast::channel(TILING_CHANNEL_CAPACITY);
        Self {
            windowing,
            options,
            tiling,
        }
    }

    /// Notifications for every tile pairing the engine establishes.
    pub fn subscribe_tiling(&self) -> broadcast::Receiver<TilingEstablished> {
        self.tiling.subscribe()
    }

    /// Restores a newly created window against records of its application.
    pub async fn restore_window(
        &self,
        document: &mut SessionDocument,
        window: WindowId,
    ) -> WindowOutcome {
        let live = match self.windowing.window(window) {
            Ok(live) => live,
            Err(err) => {
                warn!("Cannot restore window {}: {}", window, err);
                return WindowOutcome::Failed(err.to_string());
            }
        };
        if live.ignored {
            return WindowOutcome::Unmatched;
        }

        let app_key = match self.windowing.application_of(window) {
            Ok(Some(app)) => app.key().to_string(),
            Ok(None) => {
                debug!("Window '{}' has no application; leaving it alone", live.title);
                return WindowOutcome::Unmatched;
            }
            Err(err) => {
                warn!("Cannot resolve application of '{}': {}", live.title, err);
                return WindowOutcome::Failed(err.to_string());
            }
        };

        let outcome = match_window_where(
            &WindowKey::from(&live),
            &mut document.records,
            MatchScope::Window,
            |_, record| record.application_key() == app_key,
        );
        self.apply(document, &live, outcome).await
    }

    /// Matches all windows of one application, class-aware. Windows already on
    /// their saved workspace are restored first, the rest afterwards.
    pub async fn restore_application(
        &self,
        document: &mut SessionDocument,
        app: &Application,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        let windows: Vec<LiveWindow> = app
            .windows
            .iter()
            .filter_map(|id| self.windowing.window(*id).ok())
            .filter(|window| !window.ignored)
            .collect();

        let app_key = app.key();
        let outcomes = match_application_where(&windows, &mut document.records, |record| {
            record.application_key() == app_key
        });

        let (in_place, queued): (Vec<_>, Vec<_>) = windows
            .iter()
            .zip(outcomes)
            .partition(|(_, (_, outcome))| matches!(outcome, MatchOutcome::AlreadyPlaced(_)));

        for (live, (_, outcome)) in in_place.into_iter().chain(queued) {
            report.record(self.apply(document, live, outcome).await);
        }
        report
    }

    /// Restores every live window against `document`.
    pub async fn restore_running(
        &self,
        document: &mut SessionDocument,
    ) -> Result<RestoreReport, SessionError> {
        let applications = self.windowing.applications()?;
        if self.options.restore_workspace {
            if let Some(highest) = document.max_desktop_number() {
                if let Err(err) = WorkspaceProvisioner::new(self.windowing.as_ref()).ensure(highest) {
                    warn!("Could not provision workspace {}: {}", highest, err);
                }
            }
        }

        let mut report = RestoreReport::default();
        for app in &applications {
            report.merge(self.restore_application(document, app).await);
        }
        info!(
            "Restored session '{}': {}",
            document.session_name,
            report.summary()
        );
        Ok(report)
    }

    async fn apply(
        &self,
        document: &mut SessionDocument,
        live: &LiveWindow,
        outcome: MatchOutcome,
    ) -> WindowOutcome {
        let (index, placement) = match outcome {
            MatchOutcome::AlreadyPlaced(index) => (index, Placement::InPlace),
            MatchOutcome::NeedsPlacement(index) => (index, Placement::Full),
            MatchOutcome::NoMatch => {
                debug!("No saved record for '{}'", live.title);
                return WindowOutcome::Unmatched;
            }
        };

        let restorer = WindowRestorer::new(self.windowing.as_ref(), &self.options, &self.tiling);
        let result = restorer
            .restore(live.id, &document.records[index], placement)
            .await;

        match (result, placement) {
            (Ok(()), Placement::InPlace) => WindowOutcome::RestoredInPlace,
            (Ok(()), Placement::Full) => {
                mark_moved(&mut document.records, index);
                WindowOutcome::Restored
            }
            (Err(failure), _) => {
                warn!("{}", failure);
                WindowOutcome::Failed(failure.to_string())
            }
        }
    }
}
