//! Assembles session documents from live windows.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, warn};

use crate::process::ProcessInfoCollector;
use crate::session::{
    ALL_WORKSPACES, CancelToken, SavedWindowSession, SessionDocument, SessionError,
    TilingPartnerRef, WindowPosition, WindowVisualState, is_cancelled,
};
use crate::windowing::{Application, LiveWindow, WindowId, WindowingError, WindowingSystem};

use super::launcher;

/// User and host tags stored with every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIdentity {
    pub username: String,
    pub hostname: String,
}

impl HostIdentity {
    pub fn current() -> Self {
        let hostname = nix::unistd::gethostname()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|err| {
                warn!("Could not read hostname: {}", err);
                String::new()
            });
        let username = nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|user| user.name)
            .unwrap_or_default();
        Self { username, hostname }
    }
}

/// Which windows a build covers.
#[derive(Debug, Clone, Copy)]
pub enum BuildScope<'a> {
    All,
    Only(&'a HashSet<WindowId>),
}

impl BuildScope<'_> {
    fn includes(&self, window: WindowId) -> bool {
        match self {
            BuildScope::All => true,
            BuildScope::Only(ids) => ids.contains(&window),
        }
    }
}

pub struct SessionBuilder {
    windowing: Arc<dyn WindowingSystem>,
    collector: ProcessInfoCollector,
    identity: HostIdentity,
    launcher_dir: Option<PathBuf>,
}

impl SessionBuilder {
    pub fn new(windowing: Arc<dyn WindowingSystem>, collector: ProcessInfoCollector) -> Self {
        Self {
            windowing,
            collector,
            identity: HostIdentity::current(),
            launcher_dir: None,
        }
    }

    pub fn with_identity(mut self, identity: HostIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Directory that receives launchers for window-backed applications.
    /// `None` disables launcher generation.
    pub fn with_launcher_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.launcher_dir = dir;
        self
    }

    /// Snapshots the live windows in `scope`. Returns `Ok(None)` when the
    /// build was cancelled before it started.
    pub async fn build(
        &self,
        session_name: &str,
        scope: BuildScope<'_>,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<SessionDocument>, SessionError> {
        if is_cancelled(cancel) {
            debug!("Building '{}' cancelled", session_name);
            return Ok(None);
        }

        let applications = self.windowing.applications()?;
        let primary = self.windowing.primary_monitor();
        let mut document = SessionDocument::new(session_name, self.windowing.active_workspace());

        for app in &applications {
            let windows: Vec<LiveWindow> = app
                .windows
                .iter()
                .filter_map(|id| match self.windowing.window(*id) {
                    Ok(window) => Some(window),
                    Err(err) => {
                        warn!("Skipping window {} of {}: {}", id, app.name, err);
                        None
                    }
                })
                .collect();
            let ignored = windows.iter().filter(|w| w.ignored).count();
            let windows_count = windows.len() - ignored;

            for window in windows.iter().filter(|w| !w.ignored) {
                if !scope.includes(window.id) {
                    continue;
                }
                match self.snapshot(app, window, windows_count, primary) {
                    Ok(Some(record)) => document.records.push(record),
                    Ok(None) => {}
                    Err(err) => warn!(
                        "Failed to save window '{}' ({}): {}",
                        window.title, app.name, err
                    ),
                }
            }
        }

        self.merge_process_info(&mut document.records).await;
        self.resolve_working_dirs(&mut document.records).await;
        if self.launcher_dir.is_some() {
            self.write_launchers(&document.records).await;
        }

        debug!(
            "Built session '{}' with {} windows",
            session_name,
            document.records.len()
        );
        Ok(Some(document))
    }

    fn snapshot(
        &self,
        app: &Application,
        window: &LiveWindow,
        windows_count: usize,
        primary: i32,
    ) -> Result<Option<SavedWindowSession>, WindowingError> {
        let desktop_number = if window.on_all_workspaces {
            ALL_WORKSPACES
        } else {
            match window.workspace {
                Some(index) => index,
                None => {
                    warn!(
                        "Window '{}' ({}) has no workspace; not saving it",
                        window.title, app.name
                    );
                    return Ok(None);
                }
            }
        };

        Ok(Some(SavedWindowSession {
            window_id: window.stable_id.clone(),
            desktop_number,
            monitor_number: Some(window.monitor),
            is_on_primary_monitor: window.monitor == primary,
            pid: window.pid,
            username: self.identity.username.clone(),
            hostname: self.identity.hostname.clone(),
            window_title: window.title.clone(),
            app_name: app.name.clone(),
            wm_class: window.wm_class.clone(),
            wm_class_instance: window.wm_class_instance.clone(),
            windows_count,
            fullscreen: window.fullscreen,
            window_state: WindowVisualState {
                sticky: window.on_all_workspaces,
                above: window.above,
                maximized: window.maximized,
            },
            window_position: WindowPosition::from_rect(window.frame),
            window_tiling: self.tiling_partner(window.id)?,
            desktop_entry_id: app.desktop_entry_id.clone().unwrap_or_default(),
            desktop_file_path: app.desktop_entry_path.clone().unwrap_or_default(),
            ..Default::default()
        }))
    }

    fn tiling_partner(&self, window: WindowId) -> Result<Option<TilingPartnerRef>, WindowingError> {
        let Some(partner) = self.windowing.tile_match(window)? else {
            return Ok(None);
        };
        let partner_window = match self.windowing.window(partner) {
            Ok(found) => found,
            Err(WindowingError::UnknownWindow(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(partner_app) = self.windowing.application_of(partner)? else {
            return Ok(None);
        };

        Ok(Some(TilingPartnerRef {
            app_name: partner_app.name,
            desktop_entry_id: partner_app.desktop_entry_id.unwrap_or_default(),
            desktop_entry_path: partner_app.desktop_entry_path.unwrap_or_default(),
            window_title: partner_window.title,
        }))
    }

    async fn merge_process_info(&self, records: &mut [SavedWindowSession]) {
        let pids: BTreeSet<u32> = records.iter().map(|record| record.pid).collect();
        let infos = self.collector.collect(&pids).await;
        for record in records.iter_mut() {
            if let Some(info) = infos.get(&record.pid) {
                record.process = info.clone().into();
            }
        }
    }

    /// Window-backed apps started through a relative path only relaunch from
    /// their original working directory.
    async fn resolve_working_dirs(&self, records: &mut [SavedWindowSession]) {
        for record in records.iter_mut().filter(|r| r.is_window_backed()) {
            let relative = record
                .process
                .cmd
                .as_deref()
                .is_some_and(launcher::needs_working_dir);
            if !relative {
                continue;
            }
            match self.collector.working_dir(record.pid).await {
                Ok(dir) => record.working_dir = Some(dir),
                Err(err) => warn!(
                    "Keeping relative command of {} unresolved: {}",
                    record.app_name, err
                ),
            }
        }
    }

    async fn write_launchers(&self, records: &[SavedWindowSession]) {
        let Some(dir) = &self.launcher_dir else {
            return;
        };

        let mut written = HashSet::new();
        for record in records.iter().filter(|r| r.is_window_backed()) {
            let Some(argv) = record.process.cmd.as_deref() else {
                continue;
            };
            if !written.insert(record.app_name.as_str()) {
                continue;
            }

            let Some(desktop) = launcher::synthesize(
                &record.app_name,
                &record.wm_class,
                argv,
                record.working_dir.as_deref(),
            ) else {
                continue;
            };
            if let Err(err) = launcher::write_launcher(dir, &desktop) {
                warn!("Failed to write launcher for {}: {}", record.app_name, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessQuery, ProcessQueryError, QueryOutput};
    use crate::session::MaximizeMode;
    use crate::windowing::Rect;
    use crate::windowing::fake::{self, FakeWindowing};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    struct StaticQuery {
        stdout: String,
        cwd: Option<PathBuf>,
        calls: Mutex<Vec<String>>,
    }

    impl StaticQuery {
        fn new(stdout: &str, cwd: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                stdout: stdout.to_string(),
                cwd: cwd.map(PathBuf::from),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProcessQuery for StaticQuery {
        async fn list(&self, pids: &str) -> Result<QueryOutput, ProcessQueryError> {
            self.calls.lock().unwrap().push(pids.to_string());
            Ok(QueryOutput {
                success: true,
                stdout: self.stdout.clone(),
            })
        }

        async fn working_dir(&self, pid: u32) -> Result<PathBuf, ProcessQueryError> {
            self.cwd.clone().ok_or(ProcessQueryError::WorkingDir {
                pid,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            })
        }
    }

    fn identity() -> HostIdentity {
        HostIdentity {
            username: "me".into(),
            hostname: "box".into(),
        }
    }

    fn builder(ws: Arc<FakeWindowing>, query: Arc<StaticQuery>) -> SessionBuilder {
        SessionBuilder::new(ws, ProcessInfoCollector::new(query)).with_identity(identity())
    }

    #[tokio::test]
    async fn snapshots_windows_in_application_order() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let editor = ws.add_app("Editor", Some("editor.desktop"));
        let mut first = fake::window(1, "a.txt", "Editor");
        first.workspace = Some(2);
        first.maximized = MaximizeMode::Both;
        first.frame = Rect::new(0, 27, 1920, 1053);
        ws.add_window(editor, first);
        let mut sticky = fake::window(2, "b.txt", "Editor");
        sticky.on_all_workspaces = true;
        sticky.above = true;
        ws.add_window(editor, sticky);
        let query = StaticQuery::new(
            "Mon Oct 12 09:30:01 2026  0.5  1.2  1001 /usr/bin/editor --new\n",
            None,
        );

        let doc = builder(ws.clone(), query.clone())
            .build("work", BuildScope::All, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(doc.session_name, "work");
        assert_eq!(doc.records.len(), 2);
        let a = &doc.records[0];
        assert_eq!(a.window_id, "stable-1");
        assert_eq!(a.desktop_number, 2);
        assert_eq!(a.monitor_number, Some(0));
        assert!(a.is_on_primary_monitor);
        assert_eq!(a.windows_count, 2);
        assert_eq!(a.window_state.maximized, MaximizeMode::Both);
        assert_eq!(a.window_position.rect(), Rect::new(0, 27, 1920, 1053));
        assert_eq!(a.desktop_entry_id, "editor.desktop");
        assert_eq!(a.desktop_file_path, "/usr/share/applications/editor.desktop");
        assert_eq!(a.username, "me");
        assert_eq!(a.hostname, "box");
        assert_eq!(
            a.process.cmd.as_deref(),
            Some(&["/usr/bin/editor".to_string(), "--new".to_string()][..])
        );

        let b = &doc.records[1];
        assert_eq!(b.desktop_number, ALL_WORKSPACES);
        assert!(b.window_state.sticky && b.window_state.above);
        assert!(!b.process.is_known());

        assert_eq!(*query.calls.lock().unwrap(), vec!["1001,1002".to_string()]);
    }

    #[tokio::test]
    async fn ignored_windows_are_excluded_from_records_and_count() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        ws.add_window(app, fake::window(1, "main", "Editor"));
        let mut dialog = fake::window(2, "Open File", "Editor");
        dialog.ignored = true;
        ws.add_window(app, dialog);

        let doc = builder(ws, StaticQuery::new("", None))
            .build("s", BuildScope::All, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(doc.records.len(), 1);
        assert_eq!(doc.records[0].windows_count, 1);
    }

    #[tokio::test]
    async fn window_without_workspace_is_skipped() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        let mut homeless = fake::window(1, "lost", "Editor");
        homeless.workspace = None;
        ws.add_window(app, homeless);
        ws.add_window(app, fake::window(2, "kept", "Editor"));

        let doc = builder(ws, StaticQuery::new("", None))
            .build("s", BuildScope::All, None)
            .await
            .unwrap()
            .unwrap();

        let titles: Vec<_> = doc.records.iter().map(|r| r.window_title.as_str()).collect();
        assert_eq!(titles, vec!["kept"]);
    }

    #[tokio::test]
    async fn tile_partner_is_recorded_as_lookup_key() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let editor = ws.add_app("Editor", Some("editor.desktop"));
        let terminal = ws.add_app("Terminal", None);
        ws.add_window(editor, fake::window(1, "code", "Editor"));
        ws.add_window(terminal, fake::window(2, "shell", "Terminal"));
        ws.with_state(|s| {
            s.tiles.insert(1, 2);
        });

        let doc = builder(ws, StaticQuery::new("", None))
            .build("s", BuildScope::All, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            doc.records[0].window_tiling,
            Some(TilingPartnerRef {
                app_name: "Terminal".into(),
                desktop_entry_id: String::new(),
                desktop_entry_path: String::new(),
                window_title: "shell".into(),
            })
        );
        assert_eq!(doc.records[1].window_tiling, None);
    }

    #[tokio::test]
    async fn scope_limits_records_but_not_sibling_count() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        ws.add_window(app, fake::window(1, "one", "Editor"));
        ws.add_window(app, fake::window(2, "two", "Editor"));
        let only: HashSet<WindowId> = [2].into_iter().collect();

        let doc = builder(ws, StaticQuery::new("", None))
            .build("s", BuildScope::Only(&only), None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(doc.records.len(), 1);
        assert_eq!(doc.records[0].window_title, "two");
        assert_eq!(doc.records[0].windows_count, 2);
    }

    #[tokio::test]
    async fn cancelled_build_produces_nothing() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        ws.add_window(app, fake::window(1, "one", "Editor"));
        let query = StaticQuery::new("", None);
        let cancel = CancelToken::new();
        cancel.cancel();

        let built = builder(ws, query.clone())
            .build("s", BuildScope::All, Some(&cancel))
            .await
            .unwrap();

        assert!(built.is_none());
        assert!(query.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn launchers_are_written_for_window_backed_apps() {
        let temp = tempfile::tempdir().unwrap();
        let ws = Arc::new(FakeWindowing::single_monitor());
        let script = ws.add_app("runner", None);
        ws.add_window(script, fake::window(1, "out", "Runner"));
        ws.add_window(script, fake::window(2, "log", "Runner"));
        let installed = ws.add_app("Editor", Some("editor.desktop"));
        ws.add_window(installed, fake::window(3, "x", "Editor"));
        let query = StaticQuery::new(
            "Mon Oct 12 09:30:01 2026 0.0 0.1 1001 ./bin/runner --fast\n\
             Mon Oct 12 09:30:01 2026 0.0 0.1 1003 /usr/bin/editor\n",
            Some("/srv/app"),
        );

        builder(ws, query)
            .with_launcher_dir(Some(temp.path().to_path_buf()))
            .build("s", BuildScope::All, None)
            .await
            .unwrap();

        let written: Vec<PathBuf> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(written, vec![temp.path().join("winsession-runner.desktop")]);
        let entry = std::fs::read_to_string(&written[0]).unwrap();
        assert!(entry.contains("Exec=/srv/app/./bin/runner --fast\n"));
        assert!(entry.contains(&format!("Path={}\n", Path::new("/srv/app").display())));
    }

    #[tokio::test]
    async fn relative_commands_record_their_working_dir() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let script = ws.add_app("runner", None);
        ws.add_window(script, fake::window(1, "out", "Runner"));
        let tool = ws.add_app("tool", None);
        ws.add_window(tool, fake::window(2, "t", "Tool"));
        let query = StaticQuery::new(
            "Mon Oct 12 09:30:01 2026 0.0 0.1 1001 ./build/app -v
             Mon Oct 12 09:30:01 2026 0.0 0.1 1002 /usr/bin/tool
",
            Some("/srv/app"),
        );

        let doc = builder(ws, query)
            .build("s", BuildScope::All, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(doc.records[0].working_dir, Some(PathBuf::from("/srv/app")));
        assert_eq!(doc.records[1].working_dir, None);
    }

    #[tokio::test]
    async fn unresolvable_cwd_keeps_original_command() {
        let temp = tempfile::tempdir().unwrap();
        let ws = Arc::new(FakeWindowing::single_monitor());
        let script = ws.add_app("runner", None);
        ws.add_window(script, fake::window(1, "out", "Runner"));
        let query = StaticQuery::new("Mon Oct 12 09:30:01 2026 0.0 0.1 1001 ./runner\n", None);

        builder(ws, query)
            .with_launcher_dir(Some(temp.path().to_path_buf()))
            .build("s", BuildScope::All, None)
            .await
            .unwrap();

        let entry =
            std::fs::read_to_string(temp.path().join("winsession-runner.desktop")).unwrap();
        assert!(entry.contains("Exec=./runner\n"));
    }
}
