//! Connection and authorization state machine
//!
//! Drives registration against the remote server and reacts to reachability,
//! authorization and restart signals. A global (unscoped) failure tears the
//! whole session down, waits the trigger's backoff and registers again; a
//! shutdown during the wait abandons the retry.

mod retry;

pub use retry::{wait_unless_cancelled, RetryPolicy, RetryTrigger, WaitOutcome};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ConnectError;
use crate::host::{HostUi, ServerRegistry};
use crate::state::ProcessState;
use crate::sync::SyncWorkerSupervisor;
use crate::ui::{Dialog, Message};

/// Which servers an event applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// No server id: the event concerns the whole agent
    Global,
    /// A single server in a multi-server setup
    Server(String),
}

impl Scope {
    pub fn from_server_id(server_id: Option<&str>) -> Self {
        match server_id {
            Some(id) => Scope::Server(id.to_string()),
            None => Scope::Global,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Registering,
    Online,
    Unreachable,
    Unauthorized,
    Restarting,
}

/// Relationship to the active server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    pub state: ConnectionState,
    /// Server of the last successful registration, `None` for the default
    pub server_id: Option<String>,
    pub authorized: bool,
    pub reachable: bool,
    /// The next global outage surfaces a warning; reset when the server is online
    pub warn: bool,
    /// The next global unauthorized event triggers a teardown and retry
    pub auth_check: bool,
}

impl Default for ConnectionSession {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            server_id: None,
            authorized: false,
            reachable: false,
            warn: true,
            auth_check: true,
        }
    }
}

pub struct ConnectionStateMachine {
    registry: Arc<dyn ServerRegistry>,
    supervisor: Arc<SyncWorkerSupervisor>,
    state: Arc<ProcessState>,
    ui: Arc<dyn HostUi>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
    session: Mutex<ConnectionSession>,
}

impl ConnectionStateMachine {
    pub fn new(
        registry: Arc<dyn ServerRegistry>,
        supervisor: Arc<SyncWorkerSupervisor>,
        state: Arc<ProcessState>,
        ui: Arc<dyn HostUi>,
        policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            supervisor,
            state,
            ui,
            policy,
            shutdown,
            session: Mutex::new(ConnectionSession::default()),
        }
    }

    fn session(&self) -> MutexGuard<'_, ConnectionSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> ConnectionSession {
        self.session().clone()
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.session().state
    }

    /// Attempt to (re)establish the connection. A failure leaves the state untouched.
    pub async fn register(&self, server_id: Option<&str>) -> Result<(), ConnectError> {
        debug!("Registering with server {:?}", server_id);

        match self.registry.register(server_id).await {
            Ok(()) => {
                let mut session = self.session();
                if session.state != ConnectionState::Online {
                    session.state = ConnectionState::Registering;
                }
                session.server_id = server_id.map(str::to_string);
                Ok(())
            }
            Err(e) => {
                warn!("Registration with server {:?} failed: {}", server_id, e);
                Err(e)
            }
        }
    }

    /// Register with the default server, logging any failure
    pub async fn start_default(&self) {
        if let Err(e) = self.register(None).await {
            error!("Unable to connect to the default server: {}", e);
        }
    }

    /// Drop the online flag, close every session and stop the worker
    async fn teardown(&self, next: ConnectionState) {
        self.state.set_online(false);
        self.registry.close_all();
        self.supervisor.stop().await;

        let mut session = self.session();
        session.state = next;
        session.reachable = false;
    }

    /// Wait out the trigger's backoff, then register again unless shutdown intervened
    async fn retry_after(&self, trigger: RetryTrigger) {
        let delay = self.policy.delay_for(trigger);
        info!("Retrying connection in {:?} ({:?})", delay, trigger);

        match wait_unless_cancelled(&self.shutdown, delay).await {
            WaitOutcome::Cancelled => info!("Shutdown requested, abandoning {:?} retry", trigger),
            WaitOutcome::Elapsed => self.start_default().await,
        }
    }

    pub async fn on_server_online(&self, scope: &Scope) {
        if !scope.is_global() {
            debug!("[ ServerOnline ] {:?}", scope);
            return;
        }

        self.state.set_online(true);
        {
            let mut session = self.session();
            session.state = ConnectionState::Online;
            session.reachable = true;
            session.authorized = true;
            session.warn = true;
            session.auth_check = true;
        }

        self.supervisor.start().await;
    }

    /// Server unreachable or shutting down
    pub async fn on_unreachable(&self, scope: &Scope) {
        let scoped = !scope.is_global();
        let should_warn = {
            let mut session = self.session();
            if session.warn || scoped {
                session.warn = scoped;
                true
            } else {
                false
            }
        };

        if should_warn {
            let message = if scoped {
                Message::ScopedServerUnreachable
            } else {
                Message::ServerUnreachable
            };
            self.ui.show(Dialog::error_toast(message));
        }

        if scoped {
            return;
        }

        self.teardown(ConnectionState::Unreachable).await;
        self.retry_after(RetryTrigger::Unreachable).await;
    }

    pub async fn on_unauthorized(&self, scope: &Scope) {
        let message = if scope.is_global() {
            Message::Unauthorized
        } else {
            Message::ScopedUnauthorized
        };
        self.ui.show(Dialog::error_toast(message));

        if !scope.is_global() {
            return;
        }

        let first_since_check = {
            let mut session = self.session();
            session.authorized = false;
            std::mem::replace(&mut session.auth_check, false)
        };
        if !first_since_check {
            return;
        }

        self.teardown(ConnectionState::Unauthorized).await;
        self.retry_after(RetryTrigger::Unauthorized).await;
    }

    pub async fn on_restarting(&self, scope: &Scope, notify: bool) {
        if !scope.is_global() {
            return;
        }

        if notify {
            self.ui.show(Dialog::toast(Message::ServerRestarting));
        }

        self.teardown(ConnectionState::Restarting).await;
        self.retry_after(RetryTrigger::Restarting).await;
    }

    /// Explicit connect request from the UI
    pub async fn connect(&self, server_id: Option<&str>) {
        if let Err(e) = self.register(server_id).await {
            error!("Unable to connect to server {:?}: {}", server_id, e);
        }
        self.ui.refresh_container();
    }

    pub async fn login_connect(&self) {
        if let Err(e) = self.registry.login_connect().await {
            error!("Connect login failed: {}", e);
        }
    }

    pub async fn add_server(&self) {
        if let Err(e) = self.registry.add_server().await {
            error!("Unable to add server: {}", e);
        }
        self.ui.refresh_container();
    }

    pub async fn update_server(&self) {
        self.ui.show(Dialog::ok(Message::UpdateServerNotice));
        if let Err(e) = self.registry.update_server().await {
            error!("Unable to update server: {}", e);
        }
        self.ui.refresh_container();
    }

    pub async fn remove_server(&self, server_id: &str) {
        if let Err(e) = self.registry.remove_server(server_id).await {
            error!("Unable to remove server {}: {}", server_id, e);
        }
        self.ui.refresh_container();
    }

    /// Host is going to sleep: tear everything down and idle the registry
    pub async fn sleep(&self) {
        info!("-->[ sleep ]");
        self.state.set_should_stop(true);
        self.supervisor.stop().await;
        self.registry.close_all();
        self.registry.set_suspended(true);

        let mut session = self.session();
        session.state = ConnectionState::Disconnected;
        session.reachable = false;
    }

    /// Host woke up: let the network settle, then reconnect
    pub async fn wake(&self, settle: Duration) {
        info!("--<[ sleep ]");
        if wait_unless_cancelled(&self.shutdown, settle).await == WaitOutcome::Cancelled {
            return;
        }

        self.registry.set_suspended(false);
        self.state.set_should_stop(false);
        self.start_default().await;
    }

    /// Close every server session for good
    pub fn shutdown(&self) {
        self.registry.close_all();
        let mut session = self.session();
        session.state = ConnectionState::Disconnected;
        session.reachable = false;
    }
}
