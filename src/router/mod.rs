//! Notification router
//!
//! Central hub for every notification delivered by the host or raised by the
//! add-on. Notifications are handled one at a time, in arrival order; a
//! handler failure is logged and never reaches the host.

mod event;

pub use event::{EventKind, Notification, APPLICATION_SENDER, HOST_SENDER};

use event::is_host_quit;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::AddonSettings;
use crate::connection::{wait_unless_cancelled, ConnectionStateMachine, WaitOutcome};
use crate::error::DecodeError;
use crate::host::HostUi;
use crate::state::ProcessState;
use crate::sync::{SelectionMode, SyncWorkerSupervisor};
use crate::ui::{Dialog, Message};
use crate::update::{UpdateChecker, UpdateOutcome};

/// A notification as delivered by the host, before decoding
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawNotification {
    pub sender: String,
    pub method: String,
    /// Payload text. Structured JSON is accepted and kept in its text form.
    #[serde(default, deserialize_with = "payload_text")]
    pub data: String,
}

fn payload_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl RawNotification {
    pub fn new(sender: &str, method: &str, data: &str) -> Self {
        Self {
            sender: sender.to_string(),
            method: method.to_string(),
            data: data.to_string(),
        }
    }
}

pub type NotificationSender = mpsc::UnboundedSender<RawNotification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<RawNotification>;

/// Create the channel notifications are delivered through
pub fn create_notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}

/// Delays applied by host lifecycle handlers
#[derive(Debug, Clone, Copy)]
pub struct SettleDelays {
    pub wake: Duration,
    pub screensaver: Duration,
}

pub struct NotificationRouter {
    state: Arc<ProcessState>,
    connection: Arc<ConnectionStateMachine>,
    supervisor: Arc<SyncWorkerSupervisor>,
    ui: Arc<dyn HostUi>,
    updates: Arc<UpdateChecker>,
    settings: watch::Receiver<AddonSettings>,
    delays: SettleDelays,
    shutdown: CancellationToken,
}

impl NotificationRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<ProcessState>,
        connection: Arc<ConnectionStateMachine>,
        supervisor: Arc<SyncWorkerSupervisor>,
        ui: Arc<dyn HostUi>,
        updates: Arc<UpdateChecker>,
        settings: watch::Receiver<AddonSettings>,
        delays: SettleDelays,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            connection,
            supervisor,
            ui,
            updates,
            settings,
            delays,
            shutdown,
        }
    }

    /// Decode and handle one notification. Never fails outward.
    pub async fn route(&self, sender: &str, method: &str, data: &str) {
        let notification = match Notification::decode(sender, method, data) {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                trace!("Ignoring notification {}: {}", sender, method);
                return;
            }
            Err(e) => {
                warn!("[ {}: {} ] dropped, {}", sender, method, e);
                return;
            }
        };

        debug!(
            "[ {:?} {:?} ] {}",
            notification.origin,
            notification.kind,
            notification.payload.summary()
        );

        let kind = notification.kind;
        if let Err(e) = self.dispatch(notification).await {
            error!("[ {:?} ] handler failed: {}", kind, e);
        }
    }

    /// Process notifications until the channel closes or `stop` fires.
    ///
    /// Handlers run one at a time. Notifications arriving while a handler is
    /// busy are queued behind it, except that a host quit also signals
    /// shutdown on arrival so a pending backoff is abandoned.
    pub async fn listen(&self, mut rx: NotificationReceiver, stop: CancellationToken) {
        let mut pending = VecDeque::new();
        let mut closed = false;

        loop {
            if stop.is_cancelled() {
                break;
            }

            let raw = match pending.pop_front() {
                Some(raw) => raw,
                None if closed => break,
                None => tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    raw = rx.recv() => match raw {
                        Some(raw) => raw,
                        None => break,
                    },
                },
            };

            let route = self.route(&raw.sender, &raw.method, &raw.data);
            tokio::pin!(route);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut route => break,
                    next = rx.recv(), if !closed => match next {
                        Some(next) => {
                            self.signal_early_quit(&next);
                            pending.push_back(next);
                        }
                        None => closed = true,
                    },
                }
            }
        }
        debug!("Notification listener stopped");
    }

    fn signal_early_quit(&self, raw: &RawNotification) {
        if is_host_quit(&raw.sender, &raw.method) && !self.shutdown.is_cancelled() {
            info!("[ quit ] while busy, cancelling pending waits");
            self.state.set_should_stop(true);
            self.shutdown.cancel();
        }
    }

    async fn dispatch(&self, notification: Notification) -> Result<(), DecodeError> {
        let payload = notification.payload;
        let scope = payload.scope();

        match notification.kind {
            EventKind::ServerOnline => self.connection.on_server_online(&scope).await,
            EventKind::ServerUnreachable | EventKind::ServerShuttingDown => {
                self.connection.on_unreachable(&scope).await
            }
            EventKind::Unauthorized => self.connection.on_unauthorized(&scope).await,
            EventKind::ServerRestarting => {
                let notify = self.settings.borrow().restart_message;
                self.connection.on_restarting(&scope, notify).await
            }
            EventKind::ServerConnect => self.connection.connect(payload.id()).await,
            EventKind::EmbyConnect => self.connection.login_connect().await,
            EventKind::AddServer => self.connection.add_server().await,
            EventKind::UpdateServer => self.connection.update_server().await,
            EventKind::RemoveServer => {
                let server_id = payload.require_id()?;
                self.connection.remove_server(server_id).await
            }
            EventKind::UserDataChanged => {
                if !scope.is_global() {
                    return Ok(());
                }
                let user_data = payload
                    .user_data_list
                    .ok_or(DecodeError::MissingField("UserDataList"))?;
                info!("[ UserDataChanged ] {} entries", user_data.len());
                self.supervisor.user_data_changed(user_data).await
            }
            EventKind::LibraryChanged => {
                if !scope.is_global() {
                    return Ok(());
                }
                let updated = payload
                    .items_updated
                    .ok_or(DecodeError::MissingField("ItemsUpdated"))?;
                let added = payload
                    .items_added
                    .ok_or(DecodeError::MissingField("ItemsAdded"))?;
                let removed = payload
                    .items_removed
                    .ok_or(DecodeError::MissingField("ItemsRemoved"))?;
                info!(
                    "[ LibraryChanged ] updated={} added={} removed={}",
                    updated.len(),
                    added.len(),
                    removed.len()
                );
                self.supervisor.library_changed(updated, added, removed).await
            }
            EventKind::SyncLibrarySelection => {
                self.supervisor.select_libraries(SelectionMode::Sync).await
            }
            EventKind::RepairLibrarySelection => {
                self.supervisor.select_libraries(SelectionMode::Repair).await
            }
            EventKind::AddLibrarySelection => {
                self.supervisor.select_libraries(SelectionMode::Add).await
            }
            EventKind::SyncLibrary => {
                let Some(library_id) = payload.id() else {
                    debug!("[ SyncLibrary ] no library id");
                    return Ok(());
                };
                self.supervisor.add_library(library_id).await;
                self.ui.refresh_container();
            }
            EventKind::RepairLibrary => {
                let Some(library_ids) = payload.id() else {
                    debug!("[ RepairLibrary ] no library id");
                    return Ok(());
                };
                self.supervisor.repair_libraries(library_ids).await;
                self.ui.refresh_container();
            }
            EventKind::RemoveLibrary => {
                let library_ids = payload.require_id()?;
                self.supervisor.remove_libraries(library_ids).await;
                self.ui.refresh_container();
            }
            EventKind::UserConfigurationUpdated => {
                if scope.is_global() {
                    self.ui.rebuild_views();
                }
            }
            EventKind::CheckUpdate => {
                if self.updates.run().await != UpdateOutcome::PatchInstalled {
                    self.ui.show(Dialog::quiet_toast(Message::NoUpdates));
                }
            }
            EventKind::Quit => {
                info!("[ quit ]");
                self.state.set_should_stop(true);
                self.shutdown.cancel();
            }
            EventKind::Sleep => self.connection.sleep().await,
            EventKind::Wake => self.connection.wake(self.delays.wake).await,
            EventKind::ScreensaverDeactivated => {
                info!("--<[ screensaver ]");
                if wait_unless_cancelled(&self.shutdown, self.delays.screensaver).await
                    == WaitOutcome::Elapsed
                {
                    self.supervisor.fast_sync().await;
                }
            }
            EventKind::Unknown => {}
        }

        Ok(())
    }
}
