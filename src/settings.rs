//! Settings reactor
//!
//! Invoked whenever the host saves the add-on settings. Compares the saved
//! values with the ones cached at startup and applies whatever changed.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{AddonSettings, PlaybackMode};
use crate::host::HostUi;
use crate::logging::LogLevelHandle;
use crate::state::ProcessState;
use crate::sync::SyncWorkerSupervisor;
use crate::ui::{Dialog, Message};

/// A tracked setting that changed on save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingChange {
    LogLevel(String),
    ContextMenu(bool),
    TranscodeContextMenu(bool),
    PlaybackMode(PlaybackMode),
    Companion(bool),
}

pub struct SettingsReactor {
    state: Arc<ProcessState>,
    supervisor: Arc<SyncWorkerSupervisor>,
    ui: Arc<dyn HostUi>,
    cached: AddonSettings,
    /// The playback mode prompt is shown at most once per run
    mode_warned: bool,
    log_level: Option<LogLevelHandle>,
    publish: watch::Sender<AddonSettings>,
}

impl SettingsReactor {
    pub fn new(
        state: Arc<ProcessState>,
        supervisor: Arc<SyncWorkerSupervisor>,
        ui: Arc<dyn HostUi>,
        cached: AddonSettings,
        log_level: Option<LogLevelHandle>,
        publish: watch::Sender<AddonSettings>,
    ) -> Self {
        Self {
            state,
            supervisor,
            ui,
            cached,
            mode_warned: false,
            log_level,
            publish,
        }
    }

    #[cfg(test)]
    pub fn cached(&self) -> &AddonSettings {
        &self.cached
    }

    /// Apply a settings save. Returns the tracked settings that changed.
    pub async fn on_settings_changed(&mut self, live: &AddonSettings) -> Vec<SettingChange> {
        self.publish.send_replace(live.clone());

        if self.state.should_stop() {
            debug!("Stopping, ignoring settings change");
            return Vec::new();
        }

        let mut changes = Vec::new();

        if live.log_level != self.cached.log_level {
            info!(
                "New log level: {} -> {}",
                self.cached.log_level, live.log_level
            );
            self.cached.log_level = live.log_level.clone();
            self.state.set_log_level(&live.log_level);
            if let Some(handle) = &self.log_level {
                if let Err(e) = handle.set_level(&live.log_level) {
                    error!("Failed to apply log level: {}", e);
                }
            }
            changes.push(SettingChange::LogLevel(live.log_level.clone()));
        }

        if live.enable_context != self.cached.enable_context {
            info!("New context setting: {}", live.enable_context);
            self.cached.enable_context = live.enable_context;
            self.state.set_context_menu(live.enable_context);
            changes.push(SettingChange::ContextMenu(live.enable_context));
        }

        if live.enable_context_transcode != self.cached.enable_context_transcode {
            info!(
                "New context transcode setting: {}",
                live.enable_context_transcode
            );
            self.cached.enable_context_transcode = live.enable_context_transcode;
            self.state
                .set_transcode_context_menu(live.enable_context_transcode);
            changes.push(SettingChange::TranscodeContextMenu(
                live.enable_context_transcode,
            ));
        }

        if live.playback_mode != self.cached.playback_mode && self.supervisor.worker_started().await {
            warn!(
                "New playback mode: {:?} -> {:?}",
                self.cached.playback_mode, live.playback_mode
            );
            self.cached.playback_mode = live.playback_mode;
            if !self.mode_warned {
                self.mode_warned = true;
                self.ui.show(Dialog::yes_no(Message::PlaybackModeChanged));
            }
            changes.push(SettingChange::PlaybackMode(live.playback_mode));
        }

        if live.companion != self.cached.companion {
            info!("New companion setting: {}", live.companion);
            self.cached.companion = live.companion;
            if !live.companion {
                self.ui.show(Dialog::ok(Message::CompanionDisabled));
            }
            changes.push(SettingChange::Companion(live.companion));
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{RecordingLibrary, RecordingUi};
    use crate::ui::DialogKind;

    struct Harness {
        reactor: SettingsReactor,
        state: Arc<ProcessState>,
        supervisor: Arc<SyncWorkerSupervisor>,
        ui: Arc<RecordingUi>,
        settings: watch::Receiver<AddonSettings>,
    }

    fn harness() -> Harness {
        let state = Arc::new(ProcessState::new());
        let supervisor = Arc::new(SyncWorkerSupervisor::new(
            Arc::new(RecordingLibrary::default()),
            state.clone(),
        ));
        let ui = Arc::new(RecordingUi::default());
        let (tx, rx) = watch::channel(AddonSettings::default());
        let reactor = SettingsReactor::new(
            state.clone(),
            supervisor.clone(),
            ui.clone(),
            AddonSettings::default(),
            None,
            tx,
        );
        Harness {
            reactor,
            state,
            supervisor,
            ui,
            settings: rx,
        }
    }

    async fn wait_started(supervisor: &SyncWorkerSupervisor) {
        for _ in 0..1000 {
            if supervisor.worker_started().await {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_unchanged_save_is_quiet() {
        let mut h = harness();
        let changes = h.reactor.on_settings_changed(&AddonSettings::default()).await;
        assert!(changes.is_empty());
        assert!(h.state.snapshot().is_empty());
        assert!(h.ui.dialogs().is_empty());
    }

    #[tokio::test]
    async fn test_log_level_and_context_flags() {
        let mut h = harness();
        let live = AddonSettings {
            log_level: "2".to_string(),
            enable_context: false,
            enable_context_transcode: true,
            ..AddonSettings::default()
        };

        let changes = h.reactor.on_settings_changed(&live).await;

        assert_eq!(
            changes,
            vec![
                SettingChange::LogLevel("2".to_string()),
                SettingChange::ContextMenu(false),
                SettingChange::TranscodeContextMenu(true),
            ]
        );
        assert_eq!(h.state.log_level().as_deref(), Some("2"));
        assert_eq!(h.reactor.cached(), &live);

        // Same save again changes nothing
        assert!(h.reactor.on_settings_changed(&live).await.is_empty());
    }

    #[tokio::test]
    async fn test_should_stop_skips_everything() {
        let mut h = harness();
        h.state.set_should_stop(true);
        let live = AddonSettings {
            log_level: "0".to_string(),
            companion: true,
            restart_message: false,
            ..AddonSettings::default()
        };

        assert!(h.reactor.on_settings_changed(&live).await.is_empty());
        assert_eq!(h.state.log_level(), None);
        // Live settings still reach the router
        assert!(!h.settings.borrow().restart_message);
    }

    #[tokio::test]
    async fn test_playback_mode_requires_started_worker_and_prompts_once() {
        let mut h = harness();
        let direct = AddonSettings {
            playback_mode: PlaybackMode::Direct,
            ..AddonSettings::default()
        };

        assert!(h.reactor.on_settings_changed(&direct).await.is_empty());
        assert_eq!(h.reactor.cached().playback_mode, PlaybackMode::Addon);

        h.supervisor.start().await;
        wait_started(&h.supervisor).await;

        assert_eq!(
            h.reactor.on_settings_changed(&direct).await,
            vec![SettingChange::PlaybackMode(PlaybackMode::Direct)]
        );
        assert_eq!(
            h.reactor.on_settings_changed(&AddonSettings::default()).await,
            vec![SettingChange::PlaybackMode(PlaybackMode::Addon)]
        );
        h.supervisor.stop().await;

        let dialogs = h.ui.dialogs();
        assert_eq!(dialogs.len(), 1);
        assert_eq!(dialogs[0].kind, DialogKind::YesNo);
        assert_eq!(dialogs[0].message, Message::PlaybackModeChanged);
    }

    #[tokio::test]
    async fn test_companion_off_shows_notice() {
        let mut h = harness();
        let on = AddonSettings {
            companion: true,
            ..AddonSettings::default()
        };

        h.reactor.on_settings_changed(&on).await;
        assert!(h.ui.dialogs().is_empty());

        let changes = h.reactor.on_settings_changed(&AddonSettings::default()).await;
        assert_eq!(changes, vec![SettingChange::Companion(false)]);
        assert_eq!(h.ui.dialogs()[0].message, Message::CompanionDisabled);
        assert_eq!(h.ui.dialogs()[0].kind, DialogKind::Ok);
    }
}
