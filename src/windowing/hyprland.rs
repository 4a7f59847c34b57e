//! Hyprland backend driven through `hyprctl`.
//!
//! Queries use `hyprctl <query> -j`; requests use `hyprctl dispatch`.
//! Hyprland has no persistent-workspace toggle, no readable "above" flag and
//! no tile-partner concept, so those are tracked in memory for the lifetime
//! of the backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{Application, LiveWindow, Rect, WindowEvent, WindowId, WindowingError, WindowingSystem};
use crate::session::MaximizeMode;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One connected output.
#[derive(Debug, Clone, PartialEq)]
pub struct HyprMonitor {
    pub id: i32,
    pub work_area: Rect,
    pub active_workspace: i32,
    pub focused: bool,
}

pub struct Hyprland {
    events: broadcast::Sender<WindowEvent>,
    persistent: Mutex<BTreeMap<i32, bool>>,
    appended: Mutex<i32>,
    above: Mutex<HashSet<WindowId>>,
    tiles: Mutex<HashMap<WindowId, WindowId>>,
    desktop_dirs: Vec<PathBuf>,
}

impl Default for Hyprland {
    fn default() -> Self {
        Self::new()
    }
}

impl Hyprland {
    pub fn new() -> Self {
        Self::with_desktop_dirs(desktop_entry_dirs())
    }

    pub fn with_desktop_dirs(desktop_dirs: Vec<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            persistent: Mutex::new(BTreeMap::new()),
            appended: Mutex::new(0),
            above: Mutex::new(HashSet::new()),
            tiles: Mutex::new(HashMap::new()),
            desktop_dirs,
        }
    }

    /// True when `hyprctl` can reach a running compositor.
    pub fn is_available() -> bool {
        std::env::var_os("HYPRLAND_INSTANCE_SIGNATURE").is_some()
    }

    fn clients(&self) -> Result<Vec<LiveWindow>, WindowingError> {
        let json = hyprctl_json("clients")?;
        let clients = json.as_array().ok_or_else(|| {
            WindowingError::InvalidResponse("hyprctl clients did not return a list".into())
        })?;
        let above = lock(&self.above);
        clients
            .iter()
            .map(|client| {
                parse_client(client).map(|mut window| {
                    window.above = above.contains(&window.id);
                    window
                })
            })
            .collect()
    }

    fn monitors(&self) -> Result<Vec<HyprMonitor>, WindowingError> {
        let json = hyprctl_json("monitors")?;
        let monitors = json.as_array().ok_or_else(|| {
            WindowingError::InvalidResponse("hyprctl monitors did not return a list".into())
        })?;
        let mut parsed = monitors
            .iter()
            .map(parse_monitor)
            .collect::<Result<Vec<_>, _>>()?;
        parsed.sort_by_key(|monitor| monitor.id);
        Ok(parsed)
    }

    fn monitors_or_empty(&self) -> Vec<HyprMonitor> {
        self.monitors().unwrap_or_else(|err| {
            warn!("Failed to query Hyprland monitors: {}", err);
            Vec::new()
        })
    }

    fn desktop_entry(&self, class: &str) -> Option<(String, PathBuf)> {
        find_desktop_entry(&self.desktop_dirs, class)
    }

    /// Toggles maximize on `window`, which Hyprland only supports for the
    /// focused window.
    fn toggle_maximize(&self, window: WindowId) -> Result<(), WindowingError> {
        self.focus(window)?;
        dispatch("fullscreen", "1")
    }
}

impl WindowingSystem for Hyprland {
    fn applications(&self) -> Result<Vec<Application>, WindowingError> {
        let mut by_class: BTreeMap<String, Application> = BTreeMap::new();
        for client in self.clients()? {
            let class = client.wm_class.clone();
            let app = by_class.entry(class.clone()).or_insert_with(|| {
                let entry = self.desktop_entry(&class);
                Application {
                    name: entry
                        .as_ref()
                        .and_then(|(_, path)| desktop_entry_name(path))
                        .unwrap_or_else(|| class.clone()),
                    desktop_entry_id: entry.as_ref().map(|(id, _)| id.clone()),
                    desktop_entry_path: entry.map(|(_, path)| path.display().to_string()),
                    windows: Vec::new(),
                }
            });
            app.windows.push(client.id);
        }
        Ok(by_class.into_values().collect())
    }

    fn application_of(&self, window: WindowId) -> Result<Option<Application>, WindowingError> {
        Ok(self
            .applications()?
            .into_iter()
            .find(|app| app.windows.contains(&window)))
    }

    fn window(&self, window: WindowId) -> Result<LiveWindow, WindowingError> {
        self.clients()?
            .into_iter()
            .find(|client| client.id == window)
            .ok_or(WindowingError::UnknownWindow(window))
    }

    fn monitor_count(&self) -> i32 {
        self.monitors_or_empty().len() as i32
    }

    fn primary_monitor(&self) -> i32 {
        primary_of(&self.monitors_or_empty())
    }

    fn work_area(&self, monitor: i32) -> Option<Rect> {
        self.monitors_or_empty()
            .into_iter()
            .find(|m| m.id == monitor)
            .map(|m| m.work_area)
    }

    fn workspace_count(&self) -> i32 {
        let live = hyprctl_json("workspaces")
            .map(|json| max_workspace_id(&json))
            .unwrap_or_else(|err| {
                warn!("Failed to query Hyprland workspaces: {}", err);
                0
            });
        live.max(*lock(&self.appended))
    }

    fn active_workspace(&self) -> i32 {
        hyprctl_json("activeworkspace")
            .ok()
            .and_then(|json| json.get("id").and_then(Value::as_i64))
            .map(|id| id as i32 - 1)
            .unwrap_or(0)
    }

    fn append_workspace(&self) -> Result<i32, WindowingError> {
        // Hyprland creates workspaces on first use; reserve the next index.
        let index = self.workspace_count();
        *lock(&self.appended) = index + 1;
        debug!("Reserved Hyprland workspace {}", index + 1);
        Ok(index)
    }

    fn set_workspace_persistent(
        &self,
        index: i32,
        persistent: bool,
    ) -> Result<(), WindowingError> {
        lock(&self.persistent).insert(index, persistent);
        Ok(())
    }

    fn move_to_monitor(&self, window: WindowId, monitor: i32) -> Result<(), WindowingError> {
        let target = self
            .monitors()?
            .into_iter()
            .find(|m| m.id == monitor)
            .ok_or_else(|| WindowingError::Rejected(format!("monitor {monitor} not connected")))?;
        dispatch(
            "movetoworkspacesilent",
            &format!("{},{}", target.active_workspace, address_selector(window)),
        )?;

        if self.window(window)?.monitor == monitor {
            let _ = self.events.send(WindowEvent::EnteredMonitor { window, monitor });
        }
        Ok(())
    }

    fn change_workspace(&self, window: WindowId, workspace: i32) -> Result<(), WindowingError> {
        dispatch(
            "movetoworkspacesilent",
            &format!("{},{}", workspace + 1, address_selector(window)),
        )
    }

    fn focus(&self, window: WindowId) -> Result<(), WindowingError> {
        dispatch("focuswindow", &address_selector(window))
    }

    fn move_frame(&self, window: WindowId, x: i32, y: i32) -> Result<(), WindowingError> {
        dispatch(
            "movewindowpixel",
            &format!("exact {x} {y},{}", address_selector(window)),
        )
    }

    fn move_resize_frame(&self, window: WindowId, frame: Rect) -> Result<(), WindowingError> {
        let current = self.window(window)?.frame;
        for (dispatcher, argument) in frame_requests(window, current, frame) {
            dispatch(dispatcher, &argument)?;
        }
        Ok(())
    }

    fn maximize(&self, window: WindowId, mode: MaximizeMode) -> Result<(), WindowingError> {
        if mode != MaximizeMode::Both {
            debug!("Hyprland only maximizes both axes; ignoring {:?}", mode);
            return Ok(());
        }
        if self.window(window)?.maximized.is_maximized() {
            return Ok(());
        }
        self.toggle_maximize(window)
    }

    fn unmaximize(&self, window: WindowId, _mode: MaximizeMode) -> Result<(), WindowingError> {
        if !self.window(window)?.maximized.is_maximized() {
            return Ok(());
        }
        self.toggle_maximize(window)
    }

    fn make_above(&self, window: WindowId) -> Result<(), WindowingError> {
        dispatch("alterzorder", &format!("top,{}", address_selector(window)))?;
        lock(&self.above).insert(window);
        Ok(())
    }

    fn stick(&self, window: WindowId) -> Result<(), WindowingError> {
        if self.window(window)?.on_all_workspaces {
            return Ok(());
        }
        dispatch("pin", &address_selector(window))
    }

    fn unmaximize_is_deferred(&self) -> bool {
        true
    }

    fn tile_match(&self, window: WindowId) -> Result<Option<WindowId>, WindowingError> {
        Ok(lock(&self.tiles).get(&window).copied())
    }

    fn set_tile_partner(
        &self,
        window: WindowId,
        partner: WindowId,
    ) -> Result<(), WindowingError> {
        lock(&self.tiles).insert(window, partner);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WindowEvent> {
        self.events.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn hyprctl_json(query: &str) -> Result<Value, WindowingError> {
    let output = Command::new("hyprctl")
        .args([query, "-j"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WindowingError::Backend(format!(
            "hyprctl {} failed: {}",
            query,
            stderr.trim()
        )));
    }

    serde_json::from_slice(&output.stdout).map_err(|e| {
        WindowingError::InvalidResponse(format!("Failed to parse hyprctl {} output: {}", query, e))
    })
}

fn dispatch(dispatcher: &str, argument: &str) -> Result<(), WindowingError> {
    debug!("hyprctl dispatch {} {}", dispatcher, argument);
    let output = Command::new("hyprctl")
        .args(["dispatch", dispatcher, argument])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WindowingError::Backend(format!(
            "hyprctl dispatch {} failed: {}",
            dispatcher,
            stderr.trim()
        )));
    }
    if stdout.trim() != "ok" {
        return Err(WindowingError::Rejected(format!(
            "{} {}: {}",
            dispatcher,
            argument,
            stdout.trim()
        )));
    }
    Ok(())
}

fn address_selector(window: WindowId) -> String {
    format!("address:0x{window:x}")
}

/// Dispatches that turn `current` into `target`. The window is only moved
/// when its origin differs.
fn frame_requests(window: WindowId, current: Rect, target: Rect) -> Vec<(&'static str, String)> {
    let selector = address_selector(window);
    let mut requests = Vec::with_capacity(2);
    if (current.x, current.y) != (target.x, target.y) {
        requests.push((
            "movewindowpixel",
            format!("exact {} {},{}", target.x, target.y, selector),
        ));
    }
    if (current.width, current.height) != (target.width, target.height) {
        requests.push((
            "resizewindowpixel",
            format!("exact {} {},{}", target.width, target.height, selector),
        ));
    }
    requests
}

pub fn parse_address(address: &str) -> Option<WindowId> {
    let digits = address.strip_prefix("0x").unwrap_or(address);
    u64::from_str_radix(digits, 16).ok()
}

fn int_pair(json: &Value, key: &str) -> Result<(i32, i32), WindowingError> {
    let pair = json.get(key).and_then(Value::as_array).ok_or_else(|| {
        WindowingError::InvalidResponse(format!("Missing '{key}' in hyprctl output"))
    })?;
    let item = |index: usize| {
        pair.get(index)
            .and_then(Value::as_f64)
            .map(|v| v.round() as i32)
            .ok_or_else(|| {
                WindowingError::InvalidResponse(format!("Invalid '{key}[{index}]' value"))
            })
    };
    Ok((item(0)?, item(1)?))
}

fn str_field<'a>(json: &'a Value, key: &str) -> &'a str {
    json.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Parses one entry of `hyprctl clients -j`.
pub fn parse_client(client: &Value) -> Result<LiveWindow, WindowingError> {
    let address = str_field(client, "address");
    let id = parse_address(address).ok_or_else(|| {
        WindowingError::InvalidResponse(format!("Invalid client address '{address}'"))
    })?;
    let (x, y) = int_pair(client, "at")?;
    let (width, height) = int_pair(client, "size")?;

    // Special (scratchpad) workspaces have negative ids and no index.
    let workspace = client
        .get("workspace")
        .and_then(|ws| ws.get("id"))
        .and_then(Value::as_i64)
        .filter(|id| *id > 0)
        .map(|id| id as i32 - 1);

    // Newer releases report an integer state (1 = maximized, 2 = fullscreen);
    // older ones a bool plus `fullscreenMode` (1 = maximized).
    let (maximized, fullscreen) = match client.get("fullscreen") {
        Some(Value::Number(state)) => match state.as_i64() {
            Some(1) => (MaximizeMode::Both, false),
            Some(2) | Some(3) => (MaximizeMode::None, true),
            _ => (MaximizeMode::None, false),
        },
        Some(Value::Bool(true)) => {
            if client.get("fullscreenMode").and_then(Value::as_i64) == Some(1) {
                (MaximizeMode::Both, false)
            } else {
                (MaximizeMode::None, true)
            }
        }
        _ => (MaximizeMode::None, false),
    };

    let mapped = client.get("mapped").and_then(Value::as_bool).unwrap_or(true);
    let hidden = client.get("hidden").and_then(Value::as_bool).unwrap_or(false);

    Ok(LiveWindow {
        id,
        stable_id: address.to_string(),
        title: str_field(client, "title").to_string(),
        wm_class: str_field(client, "class").to_string(),
        wm_class_instance: str_field(client, "initialClass").to_string(),
        pid: client
            .get("pid")
            .and_then(Value::as_i64)
            .and_then(|pid| u32::try_from(pid).ok())
            .unwrap_or(0),
        workspace,
        on_all_workspaces: client.get("pinned").and_then(Value::as_bool).unwrap_or(false),
        monitor: client
            .get("monitor")
            .and_then(Value::as_i64)
            .map(|m| m as i32)
            .unwrap_or(-1),
        frame: Rect::new(x, y, width, height),
        maximized,
        above: false,
        fullscreen,
        ignored: !mapped || hidden,
        focused: client.get("focusHistoryID").and_then(Value::as_i64) == Some(0),
    })
}

/// Parses one entry of `hyprctl monitors -j`. The work area is in logical
/// pixels with reserved panel space removed.
pub fn parse_monitor(monitor: &Value) -> Result<HyprMonitor, WindowingError> {
    let number = |key: &str| {
        monitor.get(key).and_then(Value::as_f64).ok_or_else(|| {
            WindowingError::InvalidResponse(format!("Missing '{key}' in hyprctl monitors output"))
        })
    };
    let scale = monitor
        .get("scale")
        .and_then(Value::as_f64)
        .filter(|s| *s > 0.0)
        .unwrap_or(1.0);
    let reserved: Vec<f64> = monitor
        .get("reserved")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    let reserve = |index: usize| reserved.get(index).copied().unwrap_or(0.0);

    let x = number("x")?;
    let y = number("y")?;
    let width = number("width")? / scale;
    let height = number("height")? / scale;

    Ok(HyprMonitor {
        id: number("id")? as i32,
        work_area: Rect::new(
            (x + reserve(0)).round() as i32,
            (y + reserve(1)).round() as i32,
            (width - reserve(0) - reserve(2)).round() as i32,
            (height - reserve(1) - reserve(3)).round() as i32,
        ),
        active_workspace: monitor
            .get("activeWorkspace")
            .and_then(|ws| ws.get("id"))
            .and_then(Value::as_i64)
            .map(|id| id as i32)
            .unwrap_or(1),
        focused: monitor.get("focused").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Hyprland has no primary output; the one at the layout origin stands in.
fn primary_of(monitors: &[HyprMonitor]) -> i32 {
    monitors
        .iter()
        .find(|m| m.work_area.x <= 0 && m.work_area.y <= 0)
        .or_else(|| monitors.first())
        .map(|m| m.id)
        .unwrap_or(0)
}

fn max_workspace_id(workspaces: &Value) -> i32 {
    workspaces
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|ws| ws.get("id").and_then(Value::as_i64))
                .filter(|id| *id > 0)
                .max()
                .unwrap_or(0) as i32
        })
        .unwrap_or(0)
}

fn desktop_entry_dirs() -> Vec<PathBuf> {
    let mut dirs_found = Vec::new();
    if let Some(data) = dirs::data_dir() {
        dirs_found.push(data.join("applications"));
    }
    let system = std::env::var("XDG_DATA_DIRS")
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "/usr/local/share:/usr/share".to_string());
    dirs_found.extend(
        system
            .split(':')
            .filter(|dir| !dir.is_empty())
            .map(|dir| Path::new(dir).join("applications")),
    );
    dirs_found
}

/// Finds an installed desktop entry for a window class.
pub fn find_desktop_entry(dirs: &[PathBuf], class: &str) -> Option<(String, PathBuf)> {
    if class.is_empty() {
        return None;
    }
    let candidates = [format!("{class}.desktop"), format!("{}.desktop", class.to_lowercase())];
    dirs.iter().find_map(|dir| {
        candidates.iter().find_map(|file| {
            let path = dir.join(file);
            path.is_file().then(|| (file.clone(), path))
        })
    })
}

fn desktop_entry_name(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents
        .lines()
        .find_map(|line| line.strip_prefix("Name="))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}
