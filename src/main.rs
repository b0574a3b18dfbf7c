//! media-sync Agent
//!
//! Keeps a local media library synchronized with a remote media server,
//! driven by notifications from the host. Without a media-center host the
//! agent runs headless: notifications arrive as JSON lines on stdin.

mod config;
mod connection;
mod error;
mod heartbeat;
mod host;
mod logging;
mod router;
mod service;
mod settings;
mod state;
mod sync;
mod ui;
mod update;

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use config::Config;
use host::headless::{HeadlessUi, HttpServerRegistry, LoggingLibrary};
use router::{create_notification_channel, RawNotification};
use service::{Collaborators, HostMonitor, Service, ServiceHandle};
use update::HttpPatchInstaller;

/// Profile used when none is given on the command line
const DEFAULT_PROFILE: &str = "master";

fn main() -> Result<()> {
    let (_log_guard, log_level) = logging::init_logging()?;

    info!("media-sync Agent starting...");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let profile = parse_profile(&args)?.unwrap_or_else(|| DEFAULT_PROFILE.to_string());

    let config = Config::load()?;
    let config_path = config.config_path()?;
    info!("Configuration loaded from {:?}", config_path);
    match config.server(None) {
        Some(server) => info!("Default server: {} ({})", server.id, server.address),
        None => warn!("No [[servers]] configured, the agent will stay offline"),
    }

    let runtime = tokio::runtime::Runtime::new()?;

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let channel = create_notification_channel();
    let collaborators = Collaborators {
        ui: Arc::new(HeadlessUi::new(&profile)),
        registry: Arc::new(HttpServerRegistry::new(
            client.clone(),
            config.servers.clone(),
            &config.ping_path,
            channel.0.clone(),
        )),
        library: Arc::new(LoggingLibrary),
        patches: Arc::new(HttpPatchInstaller::new(
            client,
            &config.update.patch_base_url,
            Config::patch_dir()?,
        )),
    };

    let (service, handle) = Service::new(config, collaborators, channel, Some(log_level));

    // Ctrl+C aborts the heartbeat, which runs the orderly shutdown
    let ctrl_c = handle.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        ctrl_c.abort();
    })?;

    // Settings saves reach the reactor through the config watcher
    let _watcher = match watch_config(config_path, handle.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Config watcher unavailable: {:#}. Settings changes need a restart.", e);
            None
        }
    };

    spawn_stdin_reader(handle);

    let exit = runtime.block_on(service.run());

    info!("Shutdown complete ({:?})", exit);
    Ok(())
}

fn parse_profile(args: &[String]) -> Result<Option<String>> {
    let Some(position) = args.iter().position(|a| a == "--profile" || a == "-p") else {
        return Ok(None);
    };

    args.get(position + 1)
        .cloned()
        .map(Some)
        .context("--profile needs a value")
}

/// Forward every settings save in `config.toml` to the service
fn watch_config(path: PathBuf, handle: ServiceHandle) -> Result<notify::RecommendedWatcher> {
    let dir = path
        .parent()
        .map(PathBuf::from)
        .context("Config path has no parent directory")?;
    let watched = path.clone();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("Config watch error: {}", e);
                return;
            }
        };

        if !(event.kind.is_modify() || event.kind.is_create()) {
            return;
        }
        if !event.paths.iter().any(|p| p.file_name() == watched.file_name()) {
            return;
        }

        match Config::load_from(&watched) {
            Ok(config) => handle.on_settings_changed(config.settings),
            // Editors often save in several steps; the next event carries the full file
            Err(e) => debug!("Skipping partial config write: {:#}", e),
        }
    })
    .context("Failed to create config watcher")?;

    // Watch the directory, editors replace the file on save
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {:?}", dir))?;
    info!("Watching {:?} for settings changes", path);

    Ok(watcher)
}

/// Read `{"sender", "method", "data"}` JSON lines from stdin
fn spawn_stdin_reader(handle: ServiceHandle) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<RawNotification>(&line) {
                Ok(raw) => handle.on_notification(&raw.sender, &raw.method, &raw.data),
                Err(e) => warn!("Ignoring malformed notification line: {}", e),
            }
        }
        debug!("stdin closed, no more notifications");
    });
}

fn print_help() {
    println!("media-sync Agent - Keeps a local library in sync with a media server");
    println!();
    println!("USAGE:");
    println!("    media-sync-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help              Print this help message");
    println!("    -p, --profile <NAME>    Host profile to run under (default: {})", DEFAULT_PROFILE);
    println!();
    println!("INPUT:");
    println!("    Notifications are read from stdin, one JSON object per line:");
    println!(r#"    {{"sender": "xbmc", "method": "System.OnQuit", "data": "{{}}"}}"#);
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG              Set log level (e.g., debug, info, warn)");
    println!("    MEDIA_SYNC_LOG_PATH   Override the log directory");
}
