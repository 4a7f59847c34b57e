use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};

use winsession::Config;
use winsession::engine::{
    AutoSaver, BuildScope, RestoreEngine, RestoreOptions, SessionBuilder, SpawnLauncher, relaunch,
};
use winsession::process::ProcessInfoCollector;
use winsession::session::{
    CancelToken, DEFAULT_SESSION_NAME, SaveOutcome, SessionDocument, SessionStore,
    options_from_config,
};
use winsession::windowing::WindowingSystem;
use winsession::windowing::hyprland::Hyprland;

mod notification;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("WINSESSION_GIT_HASH"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "winsession")]
#[command(version = VERSION, about = "Save and restore desktop window sessions")]
struct Cli {
    /// Use this config file instead of ~/.config/winsession/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save the current windows as a session
    Save {
        #[arg(default_value = DEFAULT_SESSION_NAME)]
        name: String,
    },
    /// Move already-running windows back to a saved session
    Restore {
        #[arg(default_value = DEFAULT_SESSION_NAME)]
        name: String,

        /// Use the per-window records kept by `watch` instead of a named session
        #[arg(long)]
        autosaved: bool,
    },
    /// Launch the applications of a session, then restore their windows
    Open {
        #[arg(default_value = DEFAULT_SESSION_NAME)]
        name: String,

        /// Use the per-window records kept by `watch` instead of a named session
        #[arg(long)]
        autosaved: bool,

        /// Seconds to wait for launched applications to map their windows
        #[arg(long, default_value_t = 5)]
        settle_secs: u64,
    },
    /// List saved sessions
    List,
    /// Print a saved session as JSON
    Show {
        #[arg(required_unless_present = "autosaved")]
        name: Option<String>,

        /// Print the per-window records kept by `watch`
        #[arg(long)]
        autosaved: bool,
    },
    /// Delete a saved session (backups are kept)
    Delete { name: String },
    /// Keep per-window records up to date until interrupted
    Watch {
        /// Seconds between autosave passes (overrides the config)
        #[arg(long)]
        interval: Option<u64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let store = SessionStore::new(options_from_config(&config.storage)?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(cli.command, config, store))
}

async fn run(command: Commands, config: Config, store: SessionStore) -> Result<()> {
    match command {
        Commands::List => list(&store),
        Commands::Show { name, autosaved } => {
            let document = load_source(&store, name.as_deref(), autosaved)?;
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        Commands::Delete { name } => {
            if !store.delete(&name)? {
                return Err(anyhow!("session '{}' does not exist", name));
            }
            println!("Deleted session '{}'", name);
            Ok(())
        }
        Commands::Save { name } => {
            let result = save(&name, &config, &store).await;
            report_failure("save", result).await
        }
        Commands::Restore { name, autosaved } => {
            let result = restore(&name, autosaved, &config, &store, None).await;
            report_failure("restore", result).await
        }
        Commands::Open {
            name,
            autosaved,
            settle_secs,
        } => {
            let result = restore(&name, autosaved, &config, &store, Some(settle_secs)).await;
            report_failure("restore", result).await
        }
        Commands::Watch { interval } => watch(&config, store, interval).await,
    }
}

async fn report_failure(operation: &str, result: Result<()>) -> Result<()> {
    if let Err(err) = &result {
        notification::notify_failure(operation, &err.to_string()).await;
    }
    result
}

fn load_source(
    store: &SessionStore,
    name: Option<&str>,
    autosaved: bool,
) -> Result<SessionDocument> {
    let document = match name {
        _ if autosaved => store.load_autosaved()?,
        Some(name) => store.load(name)?,
        None => store.load(DEFAULT_SESSION_NAME)?,
    };
    Ok(document)
}

fn connect() -> Result<Arc<dyn WindowingSystem>> {
    if !Hyprland::is_available() {
        log::error!("HYPRLAND_INSTANCE_SIGNATURE not set - winsession needs a running Hyprland session.");
        return Err(anyhow!("Hyprland session required"));
    }
    Ok(Arc::new(Hyprland::new()))
}

fn cancel_on_signals() -> Result<CancelToken> {
    let token = CancelToken::new();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, token.flag())
            .with_context(|| format!("Failed to register handler for signal {signal}"))?;
    }
    Ok(token)
}

fn builder(config: &Config, windowing: Arc<dyn WindowingSystem>) -> SessionBuilder {
    let launcher_dir = config
        .launch
        .generate_launchers
        .then(|| dirs::data_dir().map(|dir| dir.join("applications")))
        .flatten();
    SessionBuilder::new(windowing, ProcessInfoCollector::default()).with_launcher_dir(launcher_dir)
}

async fn save(name: &str, config: &Config, store: &SessionStore) -> Result<()> {
    let windowing = connect()?;
    let cancel = cancel_on_signals()?;

    let Some(document) = builder(config, windowing)
        .build(name, BuildScope::All, Some(&cancel))
        .await?
    else {
        println!("Save of '{}' cancelled", name);
        return Ok(());
    };

    match store.save(&document, Some(&cancel))? {
        SaveOutcome::Saved(path) => println!(
            "Saved {} windows to {}",
            document.records.len(),
            path.display()
        ),
        SaveOutcome::Cancelled => println!("Save of '{}' cancelled", name),
    }
    Ok(())
}

async fn restore(
    name: &str,
    autosaved: bool,
    config: &Config,
    store: &SessionStore,
    launch_first: Option<u64>,
) -> Result<()> {
    let mut document = load_source(store, Some(name), autosaved)?;
    let windowing = connect()?;

    if let Some(settle_secs) = launch_first {
        let launched = relaunch(&document, windowing.as_ref(), &SpawnLauncher)?;
        println!("Launch: {}", launched.summary());
        if launched.launched > 0 {
            tokio::time::sleep(Duration::from_secs(settle_secs)).await;
        }
    }

    let engine = RestoreEngine::new(windowing, RestoreOptions::from(&config.restore));
    let report = engine.restore_running(&mut document).await?;
    println!("Restore: {}", report.summary());

    if report.has_failures() {
        for failure in &report.failures {
            eprintln!("  {}", failure);
        }
        notification::notify_failure(
            "restore",
            &format!("{} windows could not be restored", report.failures.len()),
        )
        .await;
    }
    Ok(())
}

async fn watch(config: &Config, store: SessionStore, interval: Option<u64>) -> Result<()> {
    if !config.autosave.enabled {
        return Err(anyhow!(
            "autosave is disabled; set `enabled = true` under [autosave] in the config"
        ));
    }
    let windowing = connect()?;
    let stop = cancel_on_signals()?;
    let interval = Duration::from_secs(
        interval
            .unwrap_or(config.autosave.interval_secs)
            .max(1),
    );

    let saver = AutoSaver::new(windowing.clone(), builder(config, windowing), store);
    saver.run(interval, &stop).await;
    Ok(())
}

fn list(store: &SessionStore) -> Result<()> {
    let sessions = store.list()?;
    if sessions.is_empty() {
        println!("No saved sessions in {}", store.options().sessions_dir().display());
        return Ok(());
    }

    for session in sessions {
        let modified = session
            .modified
            .map(|time| {
                chrono::DateTime::<chrono::Local>::from(time)
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
            })
            .unwrap_or_else(|| "-".to_string());
        let windows = session
            .record_count
            .map(|count| count.to_string())
            .unwrap_or_else(|| "unreadable".to_string());
        println!("{:<24} {:>10} windows  {}", session.name, windows, modified);
    }
    Ok(())
}
