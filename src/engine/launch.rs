//! Relaunching applications of a saved session.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use log::{debug, info, warn};

use crate::session::{SavedWindowSession, SessionDocument};
use crate::windowing::{WindowingError, WindowingSystem};

/// Starts applications on behalf of the engine.
pub trait AppLauncher: Send + Sync {
    fn launch_desktop_entry(&self, desktop_entry_id: &str) -> io::Result<()>;
    fn launch_command(&self, argv: &[String], working_dir: Option<&Path>) -> io::Result<()>;
}

/// Launches desktop entries through `gtk-launch` and command lines directly.
/// Children are detached with null stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnLauncher;

impl AppLauncher for SpawnLauncher {
    fn launch_desktop_entry(&self, desktop_entry_id: &str) -> io::Result<()> {
        let id = desktop_entry_id
            .strip_suffix(".desktop")
            .unwrap_or(desktop_entry_id);
        spawn_detached(Command::new("gtk-launch").arg(id))
    }

    fn launch_command(&self, argv: &[String], working_dir: Option<&Path>) -> io::Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        spawn_detached(&mut command)
    }
}

fn spawn_detached(command: &mut Command) -> io::Result<()> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    pub launched: usize,
    pub already_running: usize,
    /// Applications with neither a desktop entry nor a command line.
    pub skipped: usize,
    pub failed: usize,
}

impl LaunchReport {
    pub fn summary(&self) -> String {
        format!(
            "{} launched, {} already running, {} skipped, {} failed",
            self.launched, self.already_running, self.skipped, self.failed
        )
    }
}

/// Launches every saved application that has no running instance, once per
/// application. Running applications are left alone.
pub fn relaunch(
    document: &SessionDocument,
    windowing: &dyn WindowingSystem,
    launcher: &dyn AppLauncher,
) -> Result<LaunchReport, WindowingError> {
    let running = windowing.applications()?;
    let running_ids: HashSet<&str> = running
        .iter()
        .filter_map(|app| app.desktop_entry_id.as_deref())
        .collect();
    let running_names: HashSet<&str> = running
        .iter()
        .filter(|app| app.is_window_backed())
        .map(|app| app.name.as_str())
        .collect();

    let mut report = LaunchReport::default();
    let mut seen = HashSet::new();
    for record in &document.records {
        if !seen.insert(record.application_key()) {
            continue;
        }

        let is_running = if record.is_window_backed() {
            running_names.contains(record.app_name.as_str())
        } else {
            running_ids.contains(record.desktop_entry_id.as_str())
        };
        if is_running {
            debug!("{} is already running", record.app_name);
            report.already_running += 1;
            continue;
        }

        match launch_record(record, launcher) {
            Some(Ok(())) => {
                info!("Launched {}", record.app_name);
                report.launched += 1;
            }
            Some(Err(err)) => {
                warn!("Failed to launch {}: {}", record.app_name, err);
                report.failed += 1;
            }
            None => {
                warn!(
                    "Cannot launch {}: no desktop entry or command line was saved",
                    record.app_name
                );
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}

fn launch_record(
    record: &SavedWindowSession,
    launcher: &dyn AppLauncher,
) -> Option<io::Result<()>> {
    if !record.desktop_entry_id.is_empty() {
        return Some(launcher.launch_desktop_entry(&record.desktop_entry_id));
    }
    record
        .process
        .cmd
        .as_deref()
        .filter(|argv| !argv.is_empty())
        .map(|argv| launcher.launch_command(argv, record.working_dir.as_deref()))
}
