//! In-memory compositor used by unit tests. Records every request it receives.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::{Application, LiveWindow, Rect, WindowEvent, WindowId, WindowingError, WindowingSystem};
use crate::session::MaximizeMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    MoveToMonitor(WindowId, i32),
    ChangeWorkspace(WindowId, i32),
    Focus(WindowId),
    MoveFrame(WindowId, i32, i32),
    MoveResize(WindowId, Rect),
    Maximize(WindowId, MaximizeMode),
    Unmaximize(WindowId, MaximizeMode),
    MakeAbove(WindowId),
    Stick(WindowId),
    AppendWorkspace(i32),
    SetPersistent(i32, bool),
    SetTilePartner(WindowId, WindowId),
}

impl Call {
    pub(crate) fn is_workspace_change(&self) -> bool {
        matches!(self, Call::ChangeWorkspace(..))
    }
}

pub(crate) struct FakeState {
    pub apps: Vec<Application>,
    pub windows: BTreeMap<WindowId, LiveWindow>,
    pub work_areas: Vec<Rect>,
    pub primary: i32,
    pub workspaces: Vec<bool>,
    pub active_workspace: i32,
    pub tiles: HashMap<WindowId, WindowId>,
    pub calls: Vec<Call>,
    pub deferred_unmaximize: bool,
    pub emit_monitor_events: bool,
    /// Mimics compositors that drop `above` when a window changes workspace.
    pub workspace_change_resets_above: bool,
    /// Active workspace of each monitor. When set, a monitor move also puts
    /// the window on that workspace, as on compositors that bind
    /// workspaces to monitors.
    pub monitor_workspaces: Vec<i32>,
    pub fail_window: Option<WindowId>,
}

pub(crate) struct FakeWindowing {
    state: Mutex<FakeState>,
    events: broadcast::Sender<WindowEvent>,
}

pub(crate) fn window(id: WindowId, title: &str, wm_class: &str) -> LiveWindow {
    LiveWindow {
        id,
        stable_id: format!("stable-{id}"),
        title: title.to_string(),
        wm_class: wm_class.to_string(),
        wm_class_instance: wm_class.to_lowercase(),
        pid: 1000 + id as u32,
        workspace: Some(0),
        on_all_workspaces: false,
        monitor: 0,
        frame: Rect::new(100, 100, 800, 600),
        maximized: MaximizeMode::None,
        above: false,
        fullscreen: false,
        ignored: false,
        focused: false,
    }
}

impl FakeWindowing {
    /// A compositor with the given monitor work areas and `workspaces` existing workspaces.
    pub(crate) fn new(work_areas: Vec<Rect>, workspaces: usize) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(FakeState {
                apps: Vec::new(),
                windows: BTreeMap::new(),
                work_areas,
                primary: 0,
                workspaces: vec![false; workspaces],
                active_workspace: 0,
                tiles: HashMap::new(),
                calls: Vec::new(),
                deferred_unmaximize: false,
                emit_monitor_events: true,
                workspace_change_resets_above: false,
                monitor_workspaces: Vec::new(),
                fail_window: None,
            }),
            events,
        }
    }

    pub(crate) fn single_monitor() -> Self {
        Self::new(vec![Rect::new(0, 27, 1920, 1053)], 4)
    }

    /// Registers an application and returns its index.
    pub(crate) fn add_app(&self, name: &str, desktop_entry_id: Option<&str>) -> usize {
        let mut state = self.state.lock().unwrap();
        state.apps.push(Application {
            name: name.to_string(),
            desktop_entry_id: desktop_entry_id.map(str::to_string),
            desktop_entry_path: desktop_entry_id
                .map(|id| format!("/usr/share/applications/{id}")),
            windows: Vec::new(),
        });
        state.apps.len() - 1
    }

    pub(crate) fn add_window(&self, app: usize, window: LiveWindow) {
        let mut state = self.state.lock().unwrap();
        state.apps[app].windows.push(window.id);
        state.windows.insert(window.id, window);
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub(crate) fn live(&self, id: WindowId) -> LiveWindow {
        self.state.lock().unwrap().windows[&id].clone()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn app(&self, index: usize) -> Application {
        self.state.lock().unwrap().apps[index].clone()
    }

    fn mutate(
        &self,
        id: WindowId,
        call: Call,
        f: impl FnOnce(&mut LiveWindow),
    ) -> Result<(), WindowingError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_window == Some(id) {
            return Err(WindowingError::Rejected(format!("{call:?}")));
        }
        state.calls.push(call);
        let window = state
            .windows
            .get_mut(&id)
            .ok_or(WindowingError::UnknownWindow(id))?;
        f(window);
        Ok(())
    }
}

impl WindowingSystem for FakeWindowing {
    fn applications(&self) -> Result<Vec<Application>, WindowingError> {
        Ok(self.state.lock().unwrap().apps.clone())
    }

    fn application_of(&self, window: WindowId) -> Result<Option<Application>, WindowingError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .apps
            .iter()
            .find(|app| app.windows.contains(&window))
            .cloned())
    }

    fn window(&self, window: WindowId) -> Result<LiveWindow, WindowingError> {
        self.state
            .lock()
            .unwrap()
            .windows
            .get(&window)
            .cloned()
            .ok_or(WindowingError::UnknownWindow(window))
    }

    fn monitor_count(&self) -> i32 {
        self.state.lock().unwrap().work_areas.len() as i32
    }

    fn primary_monitor(&self) -> i32 {
        self.state.lock().unwrap().primary
    }

    fn work_area(&self, monitor: i32) -> Option<Rect> {
        let state = self.state.lock().unwrap();
        usize::try_from(monitor)
            .ok()
            .and_then(|index| state.work_areas.get(index).copied())
    }

    fn workspace_count(&self) -> i32 {
        self.state.lock().unwrap().workspaces.len() as i32
    }

    fn active_workspace(&self) -> i32 {
        self.state.lock().unwrap().active_workspace
    }

    fn append_workspace(&self) -> Result<i32, WindowingError> {
        let mut state = self.state.lock().unwrap();
        state.workspaces.push(false);
        let index = state.workspaces.len() as i32 - 1;
        state.calls.push(Call::AppendWorkspace(index));
        Ok(index)
    }

    fn set_workspace_persistent(
        &self,
        index: i32,
        persistent: bool,
    ) -> Result<(), WindowingError> {
        let mut state = self.state.lock().unwrap();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| state.workspaces.get_mut(i))
            .ok_or(WindowingError::Workspace(index))?;
        *slot = persistent;
        state.calls.push(Call::SetPersistent(index, persistent));
        Ok(())
    }

    fn move_to_monitor(&self, window: WindowId, monitor: i32) -> Result<(), WindowingError> {
        let follows = usize::try_from(monitor).ok().and_then(|index| {
            self.state
                .lock()
                .unwrap()
                .monitor_workspaces
                .get(index)
                .copied()
        });
        self.mutate(window, Call::MoveToMonitor(window, monitor), |w| {
            w.monitor = monitor;
            if let Some(workspace) = follows {
                w.workspace = Some(workspace);
            }
        })?;
        if self.state.lock().unwrap().emit_monitor_events {
            let _ = self
                .events
                .send(WindowEvent::EnteredMonitor { window, monitor });
        }
        Ok(())
    }

    fn change_workspace(&self, window: WindowId, workspace: i32) -> Result<(), WindowingError> {
        let resets_above = self.state.lock().unwrap().workspace_change_resets_above;
        self.mutate(window, Call::ChangeWorkspace(window, workspace), |w| {
            w.workspace = Some(workspace);
            w.focused = false;
            if resets_above {
                w.above = false;
            }
        })
    }

    fn focus(&self, window: WindowId) -> Result<(), WindowingError> {
        self.mutate(window, Call::Focus(window), |w| w.focused = true)
    }

    fn move_frame(&self, window: WindowId, x: i32, y: i32) -> Result<(), WindowingError> {
        self.mutate(window, Call::MoveFrame(window, x, y), |w| {
            w.frame.x = x;
            w.frame.y = y;
        })
    }

    fn move_resize_frame(&self, window: WindowId, frame: Rect) -> Result<(), WindowingError> {
        self.mutate(window, Call::MoveResize(window, frame), |w| w.frame = frame)
    }

    fn maximize(&self, window: WindowId, mode: MaximizeMode) -> Result<(), WindowingError> {
        self.mutate(window, Call::Maximize(window, mode), |w| w.maximized = mode)
    }

    fn unmaximize(&self, window: WindowId, mode: MaximizeMode) -> Result<(), WindowingError> {
        self.mutate(window, Call::Unmaximize(window, mode), |w| {
            w.maximized = MaximizeMode::None
        })
    }

    fn make_above(&self, window: WindowId) -> Result<(), WindowingError> {
        self.mutate(window, Call::MakeAbove(window), |w| w.above = true)
    }

    fn stick(&self, window: WindowId) -> Result<(), WindowingError> {
        self.mutate(window, Call::Stick(window), |w| w.on_all_workspaces = true)
    }

    fn unmaximize_is_deferred(&self) -> bool {
        self.state.lock().unwrap().deferred_unmaximize
    }

    fn tile_match(&self, window: WindowId) -> Result<Option<WindowId>, WindowingError> {
        Ok(self.state.lock().unwrap().tiles.get(&window).copied())
    }

    fn set_tile_partner(
        &self,
        window: WindowId,
        partner: WindowId,
    ) -> Result<(), WindowingError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SetTilePartner(window, partner));
        state.tiles.insert(window, partner);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WindowEvent> {
        self.events.subscribe()
    }
}
