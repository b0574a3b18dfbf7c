use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

const LOG_FILE_BASENAME: &str = "media-sync.log";
const LOG_DIR_ENV: &str = "MEDIA_SYNC_LOG_PATH";
const LOG_RETENTION_DAYS: u64 = 7;

/// Subsystem for macOS unified logging (os_log)
#[cfg(target_os = "macos")]
const OSLOG_SUBSYSTEM: &str = "media.emby.media-sync";

/// Swaps the active log filter when the add-on log level changes
#[derive(Clone)]
pub struct LogLevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    /// `RUST_LOG` at startup, takes precedence over the add-on level
    env_directives: Option<String>,
}

impl LogLevelHandle {
    /// Apply an add-on log level ("0", "1" or "2")
    pub fn set_level(&self, level: &str) -> Result<()> {
        if let Some(directives) = &self.env_directives {
            info!("RUST_LOG={} overrides add-on log level {}", directives, level);
            return Ok(());
        }

        let directives = filter_directives(level, None);
        self.handle
            .reload(EnvFilter::new(&directives))
            .context("Failed to reload log filter")?;
        info!("Log level set to {}", directives);
        Ok(())
    }
}

/// Directives for the active filter: `RUST_LOG` when set, else the add-on level
fn filter_directives(level: &str, env_directives: Option<&str>) -> String {
    match env_directives.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => directives.to_string(),
        None => level_directive(level).to_string(),
    }
}

/// Filter directive for an add-on log level. Unknown values log at info.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim() {
        "0" => "warn",
        "2" => "debug",
        _ => "info",
    }
}

pub fn init_logging() -> Result<(WorkerGuard, LogLevelHandle)> {
    let log_dir = resolve_log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

    prune_old_logs(
        &log_dir,
        Duration::from_secs(60 * 60 * 24 * LOG_RETENTION_DAYS),
    );

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_BASENAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_directives = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|d| !d.trim().is_empty() && EnvFilter::try_new(d).is_ok());
    let env_filter = EnvFilter::new(filter_directives("1", env_directives.as_deref()));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    #[cfg(target_os = "macos")]
    {
        // Logs also show up in Console.app under the subsystem
        let oslog_layer = tracing_oslog::OsLogger::new(OSLOG_SUBSYSTEM, "default");

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(file_layer)
            .with(stderr_layer)
            .with(oslog_layer)
            .init();
    }

    #[cfg(not(target_os = "macos"))]
    {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    }

    info!("Logging to {:?}", log_dir);
    Ok((
        guard,
        LogLevelHandle {
            handle,
            env_directives,
        },
    ))
}

fn resolve_log_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(LOG_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }

    #[cfg(target_os = "macos")]
    {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .context("Failed to determine home directory for log path")?;
        return Ok(home.join("Library").join("Logs").join("media-sync"));
    }

    let proj_dirs = ProjectDirs::from("media", "emby", "media-sync")
        .context("Failed to determine project directories for log path")?;

    #[cfg(target_os = "windows")]
    {
        return Ok(proj_dirs.data_local_dir().join("Logs"));
    }

    #[cfg(target_os = "linux")]
    {
        let base = proj_dirs
            .state_dir()
            .unwrap_or_else(|| proj_dirs.data_local_dir());
        return Ok(base.join("logs"));
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        return Ok(proj_dirs.data_local_dir().join("logs"));
    }
}

fn prune_old_logs(log_dir: &Path, max_age: Duration) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };

    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_BASENAME));
        if !is_log {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|metadata| metadata.modified()) else {
            continue;
        };

        if modified < cutoff {
            let _ = std::fs::remove_file(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("0"), "warn");
        assert_eq!(level_directive("1"), "info");
        assert_eq!(level_directive(" 2 "), "debug");
        assert_eq!(level_directive("verbose"), "info");
    }

    #[test]
    fn test_rust_log_wins_over_addon_level() {
        assert_eq!(filter_directives("2", None), "debug");
        assert_eq!(filter_directives("0", Some("  ")), "warn");
        assert_eq!(
            filter_directives("2", Some("warn,media_sync_agent=trace")),
            "warn,media_sync_agent=trace"
        );
    }

    #[test]
    fn test_set_level_keeps_env_filter() {
        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("trace"));

        let overridden = LogLevelHandle {
            handle: handle.clone(),
            env_directives: Some("trace".to_string()),
        };
        overridden.set_level("0").unwrap();
        assert_eq!(handle.with_current(|f| f.to_string()).unwrap(), "trace");

        let addon = LogLevelHandle {
            handle: handle.clone(),
            env_directives: None,
        };
        addon.set_level("0").unwrap();
        assert_eq!(handle.with_current(|f| f.to_string()).unwrap(), "warn");
    }

    #[test]
    fn test_prune_keeps_recent_and_foreign_files() {
        let dir = std::env::temp_dir().join(format!("media-sync-logs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let log = dir.join(format!("{}.2024-01-01", LOG_FILE_BASENAME));
        let other = dir.join("notes.txt");
        std::fs::write(&log, "x").unwrap();
        std::fs::write(&other, "x").unwrap();

        prune_old_logs(&dir, Duration::from_secs(3600));
        assert!(log.exists());

        std::thread::sleep(Duration::from_millis(20));
        prune_old_logs(&dir, Duration::ZERO);
        assert!(!log.exists());
        assert!(other.exists());

        let _ = std::fs::remove_dir_all(dir);
    }
}
