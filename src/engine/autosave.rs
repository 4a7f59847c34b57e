//! Coalesced per-window autosave.
//!
//! Changed windows are collected into a pending set; each tick drains it with
//! one builder pass and writes every record to its own file.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};

use crate::session::{CancelToken, MaximizeMode, SessionError, SessionStore};
use crate::windowing::{LiveWindow, Rect, WindowId, WindowingSystem};

use super::builder::{BuildScope, SessionBuilder};

/// Name given to documents built for per-window records.
const AUTOSAVE_SESSION_NAME: &str = "autosave";

/// The parts of a window whose change warrants a new save.
#[derive(Debug, Clone, PartialEq)]
struct Fingerprint {
    title: String,
    workspace: Option<i32>,
    on_all_workspaces: bool,
    monitor: i32,
    frame: Rect,
    maximized: MaximizeMode,
    above: bool,
    fullscreen: bool,
}

impl From<&LiveWindow> for Fingerprint {
    fn from(window: &LiveWindow) -> Self {
        Self {
            title: window.title.clone(),
            workspace: window.workspace,
            on_all_workspaces: window.on_all_workspaces,
            monitor: window.monitor,
            frame: window.frame,
            maximized: window.maximized,
            above: window.above,
            fullscreen: window.fullscreen,
        }
    }
}

#[derive(Debug, Clone)]
struct KnownWindow {
    app_key: String,
    stable_id: String,
    fingerprint: Fingerprint,
}

pub struct AutoSaver {
    windowing: Arc<dyn WindowingSystem>,
    builder: SessionBuilder,
    store: SessionStore,
    pending: Mutex<HashSet<WindowId>>,
    known: Mutex<HashMap<WindowId, KnownWindow>>,
    closing: AtomicBool,
}

impl AutoSaver {
    pub fn new(
        windowing: Arc<dyn WindowingSystem>,
        builder: SessionBuilder,
        store: SessionStore,
    ) -> Self {
        Self {
            windowing,
            builder,
            store,
            pending: Mutex::new(HashSet::new()),
            known: Mutex::new(HashMap::new()),
            closing: AtomicBool::new(false),
        }
    }

    /// Queues a window for the next tick.
    pub fn mark_dirty(&self, window: WindowId) {
        lock(&self.pending).insert(window);
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// While set, closing windows keep their record files so the next
    /// restore still finds them.
    pub fn set_session_closing(&self, closing: bool) {
        self.closing.store(closing, Ordering::SeqCst);
    }

    pub fn is_session_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Saves every pending window. Returns how many records were written.
    pub async fn tick(&self) -> Result<usize, SessionError> {
        let pending: HashSet<WindowId> = std::mem::take(&mut *lock(&self.pending));
        if pending.is_empty() {
            return Ok(0);
        }

        let Some(document) = self
            .builder
            .build(AUTOSAVE_SESSION_NAME, BuildScope::Only(&pending), None)
            .await?
        else {
            return Ok(0);
        };

        let mut written = 0;
        for record in &document.records {
            match self.store.save_window_record(record) {
                Ok(_) => written += 1,
                Err(err) => warn!(
                    "Failed to autosave '{}' ({}): {}",
                    record.window_title, record.app_name, err
                ),
            }
        }
        debug!("Autosaved {} of {} pending windows", written, pending.len());
        Ok(written)
    }

    /// Drops the record of a closed window.
    pub fn window_closed(&self, window: WindowId) -> Result<bool, SessionError> {
        let Some(known) = lock(&self.known).remove(&window) else {
            return Ok(false);
        };
        lock(&self.pending).remove(&window);
        if self.is_session_closing() {
            debug!("Keeping record of window {} during session close", window);
            return Ok(false);
        }
        self.store
            .remove_window_record(&known.app_key, &known.stable_id)
    }

    /// Drops every record of an application that exited.
    pub fn application_closed(&self, app_key: &str) -> Result<usize, SessionError> {
        {
            let mut known = lock(&self.known);
            let mut pending = lock(&self.pending);
            known.retain(|id, entry| {
                let keep = entry.app_key != app_key;
                if !keep {
                    pending.remove(id);
                }
                keep
            });
        }
        if self.is_session_closing() {
            debug!("Keeping records of {} during session close", app_key);
            return Ok(0);
        }
        self.store.remove_application_records(app_key)
    }

    /// Polls the compositor: new and changed windows are queued, vanished
    /// windows and applications have their records removed.
    pub fn sync_live_windows(&self) -> Result<(), SessionError> {
        let mut live = HashMap::new();
        for app in self.windowing.applications()? {
            for id in &app.windows {
                let Ok(window) = self.windowing.window(*id) else {
                    continue;
                };
                if window.ignored {
                    continue;
                }
                live.insert(
                    *id,
                    KnownWindow {
                        app_key: app.key().to_string(),
                        stable_id: window.stable_id.clone(),
                        fingerprint: Fingerprint::from(&window),
                    },
                );
            }
        }

        let mut closed = Vec::new();
        {
            let mut known = lock(&self.known);
            let mut pending = lock(&self.pending);
            for (id, entry) in &live {
                if known.get(id).map(|k| &k.fingerprint) != Some(&entry.fingerprint) {
                    pending.insert(*id);
                }
            }
            for (id, entry) in known.iter() {
                if !live.contains_key(id) {
                    closed.push((*id, entry.app_key.clone()));
                }
            }
            for (id, entry) in &live {
                known.insert(*id, entry.clone());
            }
        }

        let live_apps: HashSet<&str> = live.values().map(|k| k.app_key.as_str()).collect();
        let mut closed_apps = HashSet::new();
        for (id, app_key) in closed {
            if live_apps.contains(app_key.as_str()) {
                self.window_closed(id)?;
            } else {
                closed_apps.insert(app_key);
            }
        }
        for app_key in closed_apps {
            self.application_closed(&app_key)?;
        }
        Ok(())
    }

    /// Runs until `stop` is cancelled.
    pub async fn run(&self, interval: Duration, stop: &CancelToken) {
        info!("Autosaving every {:?}", interval);
        while !stop.is_cancelled() {
            if let Err(err) = self.sync_live_windows() {
                warn!("Failed to poll windows: {}", err);
            }
            if let Err(err) = self.tick().await {
                warn!("Autosave failed: {}", err);
            }
            tokio::time::sleep(interval).await;
        }
        info!("Autosave stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessInfoCollector, ProcessQuery, ProcessQueryError, QueryOutput};
    use crate::session::StoreOptions;
    use crate::windowing::fake::{self, FakeWindowing};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct NoProcesses;

    #[async_trait]
    impl ProcessQuery for NoProcesses {
        async fn list(&self, _: &str) -> Result<QueryOutput, ProcessQueryError> {
            Ok(QueryOutput {
                success: false,
                stdout: String::new(),
            })
        }

        async fn working_dir(&self, pid: u32) -> Result<PathBuf, ProcessQueryError> {
            Err(ProcessQueryError::WorkingDir {
                pid,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            })
        }
    }

    fn saver(ws: &Arc<FakeWindowing>) -> (AutoSaver, SessionStore, TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(StoreOptions::new(temp.path().to_path_buf()));
        let builder = SessionBuilder::new(
            ws.clone(),
            ProcessInfoCollector::new(Arc::new(NoProcesses)),
        );
        (AutoSaver::new(ws.clone(), builder, store.clone()), store, temp)
    }

    fn record_titles(store: &SessionStore) -> Vec<String> {
        let mut titles: Vec<String> = store
            .load_window_records()
            .unwrap()
            .into_iter()
            .map(|r| r.window_title)
            .collect();
        titles.sort();
        titles
    }

    #[tokio::test]
    async fn tick_saves_only_pending_windows() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        ws.add_window(app, fake::window(1, "one", "Editor"));
        ws.add_window(app, fake::window(2, "two", "Editor"));
        let (saver, store, _temp) = saver(&ws);

        saver.mark_dirty(2);
        saver.mark_dirty(2);
        assert_eq!(saver.pending_count(), 1);
        assert_eq!(saver.tick().await.unwrap(), 1);

        assert_eq!(record_titles(&store), vec!["two"]);
        assert_eq!(saver.pending_count(), 0);
        assert_eq!(saver.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sync_queues_new_and_changed_windows() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        ws.add_window(app, fake::window(1, "one", "Editor"));
        ws.add_window(app, fake::window(2, "two", "Editor"));
        let (saver, _store, _temp) = saver(&ws);

        saver.sync_live_windows().unwrap();
        assert_eq!(saver.pending_count(), 2);
        saver.tick().await.unwrap();

        saver.sync_live_windows().unwrap();
        assert_eq!(saver.pending_count(), 0);

        ws.with_state(|s| s.windows.get_mut(&2).unwrap().frame = Rect::new(0, 0, 10, 10));
        saver.sync_live_windows().unwrap();
        assert_eq!(saver.pending_count(), 1);
    }

    #[tokio::test]
    async fn closed_window_record_is_removed() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        ws.add_window(app, fake::window(1, "one", "Editor"));
        ws.add_window(app, fake::window(2, "two", "Editor"));
        let (saver, store, _temp) = saver(&ws);
        saver.sync_live_windows().unwrap();
        saver.tick().await.unwrap();

        ws.with_state(|s| {
            s.windows.remove(&1);
            s.apps[app].windows.retain(|id| *id != 1);
        });
        saver.sync_live_windows().unwrap();

        assert_eq!(record_titles(&store), vec!["two"]);
    }

    #[tokio::test]
    async fn exited_application_records_are_removed() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        ws.add_window(app, fake::window(1, "one", "Editor"));
        let (saver, store, _temp) = saver(&ws);
        saver.sync_live_windows().unwrap();
        saver.tick().await.unwrap();

        ws.with_state(|s| {
            s.windows.clear();
            s.apps.clear();
        });
        saver.sync_live_windows().unwrap();

        assert!(record_titles(&store).is_empty());
    }

    #[tokio::test]
    async fn session_close_keeps_records() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        ws.add_window(app, fake::window(1, "one", "Editor"));
        ws.add_window(app, fake::window(2, "two", "Editor"));
        let (saver, store, _temp) = saver(&ws);
        saver.sync_live_windows().unwrap();
        saver.tick().await.unwrap();

        saver.set_session_closing(true);
        assert!(!saver.window_closed(1).unwrap());
        assert_eq!(saver.application_closed("Editor").unwrap(), 0);

        assert_eq!(record_titles(&store), vec!["one", "two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_cancelled() {
        let ws = Arc::new(FakeWindowing::single_monitor());
        let app = ws.add_app("Editor", None);
        ws.add_window(app, fake::window(1, "one", "Editor"));
        let (saver, store, _temp) = saver(&ws);
        let stop = CancelToken::new();

        let run = saver.run(Duration::from_secs(5), &stop);
        let cancel = async {
            tokio::time::sleep(Duration::from_secs(12)).await;
            stop.cancel();
        };
        tokio::join!(run, cancel);

        assert_eq!(record_titles(&store), vec!["one"]);
    }
}
