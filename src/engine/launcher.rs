//! Desktop entries for applications that have none installed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::session::sanitize_identifier;

const FILE_PREFIX: &str = "winsession-";

/// A launchable descriptor built from an observed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopLauncher {
    pub name: String,
    pub exec: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub wm_class: String,
}

impl DesktopLauncher {
    /// Renders the launcher in Desktop Entry syntax.
    pub fn to_desktop_entry(&self) -> String {
        let exec = self
            .exec
            .iter()
            .map(|arg| quote_exec_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");

        let mut entry = String::from("[Desktop Entry]\n");
        entry.push_str("Type=Application\n");
        entry.push_str(&format!("Name={}\n", self.name));
        entry.push_str(&format!("Exec={exec}\n"));
        if let Some(dir) = &self.working_dir {
            entry.push_str(&format!("Path={}\n", dir.display()));
        }
        if !self.wm_class.is_empty() {
            entry.push_str(&format!("StartupWMClass={}\n", self.wm_class));
        }
        entry.push_str("NoDisplay=true\n");
        entry
    }

    pub fn file_name(&self) -> String {
        format!("{FILE_PREFIX}{}.desktop", sanitize_identifier(&self.name))
    }
}

/// True when the command is a relative path that only resolves from the
/// process working directory.
pub fn needs_working_dir(argv: &[String]) -> bool {
    argv.first().is_some_and(|command| {
        !command.starts_with('/') && !command.starts_with('~') && command.contains('/')
    })
}

/// Builds a launcher from a command line. A relative command is resolved
/// against `cwd` when one is known; otherwise it is kept unchanged.
pub fn synthesize(
    app_name: &str,
    wm_class: &str,
    argv: &[String],
    cwd: Option<&Path>,
) -> Option<DesktopLauncher> {
    let (command, args) = argv.split_first()?;
    if command.is_empty() {
        return None;
    }

    let command = match cwd {
        Some(dir) if needs_working_dir(argv) => dir.join(command).to_string_lossy().into_owned(),
        _ => command.clone(),
    };

    let mut exec = Vec::with_capacity(argv.len());
    exec.push(command);
    exec.extend(args.iter().cloned());

    Some(DesktopLauncher {
        name: if app_name.is_empty() {
            wm_class.to_string()
        } else {
            app_name.to_string()
        },
        exec,
        working_dir: cwd.map(Path::to_path_buf),
        wm_class: wm_class.to_string(),
    })
}

/// Writes the launcher into `dir`, replacing an older one for the same app.
pub fn write_launcher(dir: &Path, launcher: &DesktopLauncher) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(launcher.file_name());
    fs::write(&path, launcher.to_desktop_entry())?;
    debug!("Wrote launcher for {} to {}", launcher.name, path.display());
    Ok(path)
}

fn quote_exec_arg(arg: &str) -> String {
    const RESERVED: &[char] = &[
        ' ', '\t', '\n', '"', '\'', '\\', '>', '<', '~', '|', '&', ';', '$', '*', '?', '#', '(',
        ')', '`',
    ];

    let escaped_percent = arg.replace('%', "%%");
    if !escaped_percent.contains(RESERVED) && !escaped_percent.is_empty() {
        return escaped_percent;
    }

    let mut quoted = String::with_capacity(escaped_percent.len() + 2);
    quoted.push('"');
    for ch in escaped_percent.chars() {
        if matches!(ch, '"' | '`' | '$' | '\\') {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}
