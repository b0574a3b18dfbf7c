//! Orchestrator service
//!
//! Wires the router, connection state machine, worker supervisor, heartbeat
//! and settings reactor together, runs them until the heartbeat ends, and
//! performs the orderly shutdown. The host talks to a running service only
//! through [`HostMonitor`].

mod device;

pub use device::derive_device_id;

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AddonSettings, Config};
use crate::connection::{ConnectionStateMachine, RetryPolicy};
use crate::heartbeat::{HeartbeatLoop, LoopExit};
use crate::host::{HostUi, LibrarySync, PatchInstaller, ServerRegistry};
use crate::logging::LogLevelHandle;
use crate::router::{
    NotificationReceiver, NotificationRouter, NotificationSender, RawNotification, SettleDelays,
};
use crate::settings::SettingsReactor;
use crate::state::{ProcessState, StateKey};
use crate::sync::SyncWorkerSupervisor;
use crate::update::{UpdateChecker, ADDON_VERSION};

/// Name logged in the start and exit banners
pub const ADDON_NAME: &str = "Emby for Kodi";

/// Interface the host uses to drive a running service
pub trait HostMonitor: Send + Sync {
    /// Deliver a notification from the host or the add-on
    fn on_notification(&self, sender: &str, method: &str, data: &str);

    /// The add-on settings were saved
    fn on_settings_changed(&self, settings: AddonSettings);

    /// The host is going away; stop as soon as possible
    fn abort(&self);
}

/// External collaborators the service runs against
#[derive(Clone)]
pub struct Collaborators {
    pub ui: Arc<dyn HostUi>,
    pub registry: Arc<dyn ServerRegistry>,
    pub library: Arc<dyn LibrarySync>,
    pub patches: Arc<dyn PatchInstaller>,
}

/// Cloneable handle feeding a running [`Service`]
#[derive(Clone)]
pub struct ServiceHandle {
    notifications: NotificationSender,
    settings: mpsc::UnboundedSender<AddonSettings>,
    abort: CancellationToken,
}

impl HostMonitor for ServiceHandle {
    fn on_notification(&self, sender: &str, method: &str, data: &str) {
        if self
            .notifications
            .send(RawNotification::new(sender, method, data))
            .is_err()
        {
            debug!("Service stopped, dropping {}: {}", sender, method);
        }
    }

    fn on_settings_changed(&self, settings: AddonSettings) {
        if self.settings.send(settings).is_err() {
            debug!("Service stopped, dropping settings change");
        }
    }

    fn abort(&self) {
        info!("Abort requested");
        self.abort.cancel();
    }
}

pub struct Service {
    config: Config,
    state: Arc<ProcessState>,
    ui: Arc<dyn HostUi>,
    supervisor: Arc<SyncWorkerSupervisor>,
    connection: Arc<ConnectionStateMachine>,
    router: Arc<NotificationRouter>,
    updates: Arc<UpdateChecker>,
    log_level: Option<LogLevelHandle>,
    reactor: Mutex<Option<SettingsReactor>>,
    notifications: Mutex<Option<NotificationReceiver>>,
    settings_rx: Mutex<Option<mpsc::UnboundedReceiver<AddonSettings>>>,
    /// Quit, abort and fatal exits; every backoff wait observes it
    shutdown: CancellationToken,
    /// Stops the router and settings tasks
    listener: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    /// Build a service around an existing notification channel.
    ///
    /// The channel is created by the caller so collaborators such as the
    /// server registry can raise notifications of their own.
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        channel: (NotificationSender, NotificationReceiver),
        log_level: Option<LogLevelHandle>,
    ) -> (Self, ServiceHandle) {
        let (notifications_tx, notifications_rx) = channel;
        let (settings_tx, settings_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let state = Arc::new(ProcessState::new());
        let supervisor = Arc::new(SyncWorkerSupervisor::new(
            collaborators.library.clone(),
            state.clone(),
        ));
        let connection = Arc::new(ConnectionStateMachine::new(
            collaborators.registry.clone(),
            supervisor.clone(),
            state.clone(),
            collaborators.ui.clone(),
            RetryPolicy::from_timing(&config.timing),
            shutdown.clone(),
        ));
        let updates = Arc::new(UpdateChecker::new(
            config.update.clone(),
            config.request_timeout(),
            collaborators.ui.clone(),
            collaborators.patches.clone(),
        ));

        let (live_tx, live_rx) = watch::channel(config.settings.clone());
        let router = Arc::new(NotificationRouter::new(
            state.clone(),
            connection.clone(),
            supervisor.clone(),
            collaborators.ui.clone(),
            updates.clone(),
            live_rx,
            SettleDelays {
                wake: config.timing.wake_settle(),
                screensaver: config.timing.screensaver_settle(),
            },
            shutdown.clone(),
        ));
        let reactor = SettingsReactor::new(
            state.clone(),
            supervisor.clone(),
            collaborators.ui.clone(),
            config.settings.clone(),
            log_level.clone(),
            live_tx,
        );

        let handle = ServiceHandle {
            notifications: notifications_tx,
            settings: settings_tx,
            abort: shutdown.clone(),
        };

        let service = Self {
            config,
            state,
            ui: collaborators.ui,
            supervisor,
            connection,
            router,
            updates,
            log_level,
            reactor: Mutex::new(Some(reactor)),
            notifications: Mutex::new(Some(notifications_rx)),
            settings_rx: Mutex::new(Some(settings_rx)),
            shutdown,
            listener: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };

        (service, handle)
    }

    /// Run until the heartbeat ends, then shut down
    pub async fn run(&self) -> LoopExit {
        self.startup().await;
        self.spawn_listeners().await;

        self.connection.start_default().await;

        let heartbeat = HeartbeatLoop::new(
            self.state.clone(),
            self.supervisor.clone(),
            self.ui.clone(),
            &self.config.timing,
            self.shutdown.clone(),
        );
        let exit = heartbeat.run().await;
        if exit == LoopExit::ProfileSwitch {
            info!("[ profile switch ] {:?}", self.state.profile());
        }

        self.shutdown().await;
        exit
    }

    /// Publish the initial process state and run the update check
    async fn startup(&self) {
        let settings = &self.config.settings;
        let profile = self.ui.current_profile();

        self.state.set_should_stop(false);
        self.state.set_profile(&profile);
        self.state.set_log_level(&settings.log_level);
        if let Some(handle) = &self.log_level {
            if let Err(e) = handle.set_level(&settings.log_level) {
                warn!("Failed to apply log level: {}", e);
            }
        }
        if settings.enable_context {
            self.state.set_context_menu(true);
        }
        if settings.enable_context_transcode {
            self.state.set_transcode_context_menu(true);
        }
        self.state.set_device_id(&derive_device_id(&profile));

        warn!("--->>>[ {} ]", ADDON_NAME);
        warn!("Version: {}", ADDON_VERSION);
        warn!("Host version: {}", self.ui.build_version());
        warn!("Platform: {}/{}", std::env::consts::OS, std::env::consts::ARCH);
        warn!("Playback mode: {:?}", settings.playback_mode);
        warn!("Log level: {}", self.state.log_level().unwrap_or_default());
        info!("Device id: {}", self.state.device_id().unwrap_or_default());

        self.state.set_flag(StateKey::Connected, true);
        self.updates.run().await;
    }

    async fn spawn_listeners(&self) {
        let mut tasks = self.tasks.lock().await;

        if let Some(rx) = self.notifications.lock().await.take() {
            let router = self.router.clone();
            let stop = self.listener.clone();
            tasks.push(tokio::spawn(async move {
                router.listen(rx, stop).await;
            }));
        }

        let reactor = self.reactor.lock().await.take();
        let settings_rx = self.settings_rx.lock().await.take();
        if let (Some(mut reactor), Some(mut rx)) = (reactor, settings_rx) {
            let stop = self.listener.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        settings = rx.recv() => {
                            let Some(settings) = settings else {
                                break;
                            };
                            let changes = reactor.on_settings_changed(&settings).await;
                            debug!("Settings saved, {} tracked changes", changes.len());
                        }
                    }
                }
            }));
        }
    }

    /// Orderly shutdown. Safe to call more than once.
    pub async fn shutdown(&self) {
        info!("---<[ EXITING ]");

        self.shutdown.cancel();
        self.listener.cancel();

        debug!("Connection at exit: {:?}", self.connection.snapshot());
        match serde_json::to_string(&self.state.snapshot()) {
            Ok(snapshot) => debug!("Process state at exit: {}", snapshot),
            Err(e) => debug!("Process state unavailable: {}", e),
        }

        self.state.clear_all(&StateKey::SHUTDOWN_CLEARED);
        self.connection.shutdown();
        self.supervisor.close().await;

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Listener task failed: {}", e);
            }
        }

        warn!("---<<<[ {} ]", ADDON_NAME);
    }
}
