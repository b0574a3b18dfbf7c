//! Configuration management for the media-sync agent

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Add-on settings saved by the host
    #[serde(default)]
    pub settings: AddonSettings,

    /// Loop cadence and retry delays
    #[serde(default)]
    pub timing: TimingConfig,

    /// Update check configuration
    #[serde(default)]
    pub update: UpdateConfig,

    /// Servers known to the headless host
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Path probed to check a server is reachable
    #[serde(default = "default_ping_path")]
    pub ping_path: String,

    /// Timeout for server and update requests (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

/// How playback paths are resolved for synced items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Stream through the add-on
    #[default]
    Addon,
    /// Play straight from the server's file paths
    Direct,
}

/// Settings the user edits through the host's settings screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSettings {
    /// "0" warnings only, "1" info, "2" debug
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub enable_context: bool,

    #[serde(default)]
    pub enable_context_transcode: bool,

    #[serde(default)]
    pub playback_mode: PlaybackMode,

    /// Server-side companion plugin integration
    #[serde(default)]
    pub companion: bool,

    /// Show a toast when the server announces a restart
    #[serde(default = "default_true")]
    pub restart_message: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Heartbeat poll interval (seconds)
    #[serde(default = "default_heartbeat")]
    pub heartbeat: u64,

    /// Minimum gap between playback progress reports (seconds)
    #[serde(default = "default_progress_report")]
    pub progress_report: u64,

    /// Gap after which a progress report is escalated to a full report (seconds)
    #[serde(default = "default_full_progress_report")]
    pub full_progress_report: u64,

    #[serde(default = "default_unauthorized_backoff")]
    pub unauthorized_backoff: u64,

    #[serde(default = "default_restarting_backoff")]
    pub restarting_backoff: u64,

    #[serde(default = "default_unreachable_backoff")]
    pub unreachable_backoff: u64,

    /// Delay after wake before reconnecting, lets the network come back up
    #[serde(default = "default_wake_settle")]
    pub wake_settle: u64,

    /// Delay after the screensaver goes away before a fast resync
    #[serde(default = "default_screensaver_settle")]
    pub screensaver_settle: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// JSON manifest mapping host builds to "<label>-<zipfile>"
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    /// Base URL patches are downloaded from
    #[serde(default = "default_patch_base_url")]
    pub patch_base_url: String,

    /// Label of the currently installed objects patch
    #[serde(default)]
    pub objects_version: Option<String>,

    /// Add-on version the installed objects patch expects
    #[serde(default)]
    pub required_addon_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Base address, e.g. "http://192.168.1.10:8096"
    pub address: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "1".to_string()
}

fn default_ping_path() -> String {
    "/System/Info/Public".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_heartbeat() -> u64 {
    1
}

fn default_progress_report() -> u64 {
    10
}

fn default_full_progress_report() -> u64 {
    250
}

fn default_unauthorized_backoff() -> u64 {
    5
}

fn default_restarting_backoff() -> u64 {
    15
}

fn default_unreachable_backoff() -> u64 {
    20
}

fn default_wake_settle() -> u64 {
    10
}

fn default_screensaver_settle() -> u64 {
    5
}

fn default_manifest_url() -> String {
    "http://kodi.emby.media/Public%20testing/Dependencies/databases.json".to_string()
}

fn default_patch_base_url() -> String {
    "http://kodi.emby.media/Public%20testing/Dependencies".to_string()
}

impl Default for AddonSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_context: true,
            enable_context_transcode: false,
            playback_mode: PlaybackMode::default(),
            companion: false,
            restart_message: true,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat: default_heartbeat(),
            progress_report: default_progress_report(),
            full_progress_report: default_full_progress_report(),
            unauthorized_backoff: default_unauthorized_backoff(),
            restarting_backoff: default_restarting_backoff(),
            unreachable_backoff: default_unreachable_backoff(),
            wake_settle: default_wake_settle(),
            screensaver_settle: default_screensaver_settle(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            manifest_url: default_manifest_url(),
            patch_base_url: default_patch_base_url(),
            objects_version: None,
            required_addon_version: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: AddonSettings::default(),
            timing: TimingConfig::default(),
            update: UpdateConfig::default(),
            servers: Vec::new(),
            ping_path: default_ping_path(),
            request_timeout_secs: default_request_timeout(),
            config_path: None,
        }
    }
}

impl TimingConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat)
    }

    pub fn wake_settle(&self) -> Duration {
        Duration::from_secs(self.wake_settle)
    }

    pub fn screensaver_settle(&self) -> Duration {
        Duration::from_secs(self.screensaver_settle)
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("media", "emby", "media-sync")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Directory downloaded patches are stored in
    pub fn patch_dir() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("media", "emby", "media-sync")
            .context("Failed to determine data directory")?;

        Ok(proj_dirs.data_dir().join("patches"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Look up a configured server, or the default (first) one
    pub fn server(&self, server_id: Option<&str>) -> Option<&ServerConfig> {
        match server_id {
            Some(id) => self.servers.iter().find(|server| server.id == id),
            None => self.servers.first(),
        }
    }
}
