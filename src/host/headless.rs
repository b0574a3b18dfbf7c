//! Headless host bindings
//!
//! Used when the agent runs as a standalone process rather than inside a
//! media-center host. Dialogs and UI requests are logged, servers come from
//! the config file, and registration probes the server over HTTP and feeds
//! the outcome back into the notification stream like the add-on would.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::{HostUi, LibrarySync, ServerRegistry};
use crate::config::ServerConfig;
use crate::error::ConnectError;
use crate::router::{NotificationSender, RawNotification, APPLICATION_SENDER};
use crate::sync::WorkerCommand;
use crate::ui::{Dialog, DialogKind};

/// Build identifier reported when no media-center host is present
pub const HEADLESS_BUILD: &str = "19.4 Headless";

pub struct HeadlessUi {
    profile: String,
}

impl HeadlessUi {
    pub fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
        }
    }
}

impl HostUi for HeadlessUi {
    fn show(&self, dialog: Dialog) {
        match dialog.kind {
            DialogKind::Toast { .. } => info!("[ {} ] {}", dialog.heading, dialog.message),
            DialogKind::Ok | DialogKind::YesNo => {
                warn!("[ {} ] {}", dialog.heading, dialog.message)
            }
        }
    }

    fn refresh_container(&self) {
        debug!("Container refresh requested");
    }

    fn rebuild_views(&self) {
        info!("View rebuild requested");
    }

    fn restart_app(&self) {
        warn!("Host restart requested, restart the agent to apply");
    }

    fn report_progress(&self, full: bool) {
        debug!("Progress report requested (full: {})", full);
    }

    fn is_playing(&self) -> bool {
        false
    }

    fn current_profile(&self) -> String {
        self.profile.clone()
    }

    fn build_version(&self) -> String {
        HEADLESS_BUILD.to_string()
    }
}

/// Server registry backed by the `[[servers]]` config entries
pub struct HttpServerRegistry {
    client: Client,
    servers: Mutex<Vec<ServerConfig>>,
    ping_path: String,
    notify: NotificationSender,
    suspended: AtomicBool,
    active: Mutex<Option<String>>,
}

impl HttpServerRegistry {
    pub fn new(
        client: Client,
        servers: Vec<ServerConfig>,
        ping_path: &str,
        notify: NotificationSender,
    ) -> Self {
        Self {
            client,
            servers: Mutex::new(servers),
            ping_path: ping_path.to_string(),
            notify,
            suspended: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    pub fn active_server(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_active(&self, server_id: Option<String>) {
        *self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = server_id;
    }

    /// Resolve a server and whether it is the default one
    fn lookup(&self, server_id: Option<&str>) -> Result<(ServerConfig, bool), ConnectError> {
        let servers = self
            .servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let default_id = servers.first().map(|server| server.id.clone());

        let server = match server_id {
            Some(id) => servers.iter().find(|server| server.id == id),
            None => servers.first(),
        }
        .cloned()
        .ok_or_else(|| match server_id {
            Some(id) => ConnectError::Config(format!("unknown server {}", id)),
            None => ConnectError::Config("no server configured".to_string()),
        })?;

        let is_default = default_id.as_deref() == Some(server.id.as_str());
        Ok((server, is_default))
    }

    /// Raise an add-on notification, scoped unless it concerns the default server
    fn raise(&self, event: &str, server: &ServerConfig, is_default: bool) {
        let server_id = if is_default {
            serde_json::Value::Null
        } else {
            json!(server.id)
        };
        let data = json!([{ "ServerId": server_id }]).to_string();

        let notification =
            RawNotification::new(APPLICATION_SENDER, &format!("emby.{}", event), &data);
        if self.notify.send(notification).is_err() {
            debug!("Notification channel closed, dropping {}", event);
        }
    }

    fn interactive(&self, action: &str) -> ConnectError {
        ConnectError::Config(format!(
            "{} needs an interactive host, edit the config file instead",
            action
        ))
    }
}

#[async_trait]
impl ServerRegistry for HttpServerRegistry {
    async fn register(&self, server_id: Option<&str>) -> Result<(), ConnectError> {
        if self.suspended.load(Ordering::SeqCst) {
            return Err(ConnectError::Config("registry is suspended".to_string()));
        }

        let (server, is_default) = self.lookup(server_id)?;
        let url = format!(
            "{}{}",
            server.address.trim_end_matches('/'),
            self.ping_path
        );
        debug!("Probing {}", url);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                self.raise("ServerUnreachable", &server, is_default);
                return Err(e.into());
            }
        };
        match response.status() {
            status if status.is_success() => {
                info!(
                    "Server {} online at {}",
                    server.name.as_deref().unwrap_or(&server.id),
                    server.address
                );
                self.set_active(Some(server.id.clone()));
                self.raise("ServerOnline", &server, is_default);
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                self.raise("Unauthorized", &server, is_default);
                Ok(())
            }
            status => {
                self.raise("ServerUnreachable", &server, is_default);
                Err(ConnectError::Transport(format!(
                    "{} answered {}",
                    server.address, status
                )))
            }
        }
    }

    async fn login_connect(&self) -> Result<(), ConnectError> {
        Err(self.interactive("Connect login"))
    }

    async fn add_server(&self) -> Result<(), ConnectError> {
        Err(self.interactive("Adding a server"))
    }

    async fn update_server(&self) -> Result<(), ConnectError> {
        Err(self.interactive("Updating a server"))
    }

    async fn remove_server(&self, server_id: &str) -> Result<(), ConnectError> {
        let mut servers = self
            .servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = servers.len();
        servers.retain(|server| server.id != server_id);
        if servers.len() == before {
            return Err(ConnectError::Config(format!("unknown server {}", server_id)));
        }
        drop(servers);

        if self.active_server().as_deref() == Some(server_id) {
            self.set_active(None);
        }
        info!("Removed server {}", server_id);
        Ok(())
    }

    fn close_all(&self) {
        if let Some(server_id) = self.active_server() {
            info!("Closing session with server {}", server_id);
        }
        self.set_active(None);
    }

    fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::SeqCst);
        if suspended {
            self.set_active(None);
        }
    }
}

/// Library collaborator that only records what it would sync
#[derive(Default)]
pub struct LoggingLibrary;

#[async_trait]
impl LibrarySync for LoggingLibrary {
    async fn startup(&self) -> Result<()> {
        info!("Library startup reconciliation");
        Ok(())
    }

    async fn apply(&self, command: WorkerCommand) -> Result<()> {
        match &command {
            WorkerCommand::Updated(ids) => info!("Library: {} items updated", ids.len()),
            WorkerCommand::Removed(ids) => info!("Library: {} items removed", ids.len()),
            WorkerCommand::UserData(entries) => {
                info!("Library: {} user data entries", entries.len())
            }
            other => info!("Library: {:?}", other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::create_notification_channel;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer a single HTTP request with `status`
    async fn serve_once(status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}",
                status
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        address
    }

    fn server(id: &str, address: &str) -> ServerConfig {
        ServerConfig {
            id: id.to_string(),
            name: None,
            address: address.to_string(),
        }
    }

    #[tokio::test]
    async fn test_online_server_raises_global_notification() {
        let address = serve_once("200 OK").await;
        let (tx, mut rx) = create_notification_channel();
        let registry = HttpServerRegistry::new(
            Client::new(),
            vec![server("abc", &address)],
            "/System/Info/Public",
            tx,
        );

        registry.register(None).await.unwrap();

        let raised = rx.recv().await.unwrap();
        assert_eq!(raised.method, "emby.ServerOnline");
        assert_eq!(raised.data, r#"[{"ServerId":null}]"#);
        assert_eq!(registry.active_server().as_deref(), Some("abc"));

        registry.close_all();
        assert_eq!(registry.active_server(), None);
    }

    #[tokio::test]
    async fn test_rejected_credentials_raise_scoped_unauthorized() {
        let address = serve_once("401 Unauthorized").await;
        let (tx, mut rx) = create_notification_channel();
        let registry = HttpServerRegistry::new(
            Client::new(),
            vec![server("abc", "http://127.0.0.1:9"), server("def", &address)],
            "/System/Info/Public",
            tx,
        );

        registry.register(Some("def")).await.unwrap();

        let raised = rx.recv().await.unwrap();
        assert_eq!(raised.method, "emby.Unauthorized");
        assert_eq!(raised.data, r#"[{"ServerId":"def"}]"#);
        assert_eq!(registry.active_server(), None);
    }

    #[tokio::test]
    async fn test_unreachable_server_raises_notification() {
        let (tx, mut rx) = create_notification_channel();
        let registry = HttpServerRegistry::new(
            Client::new(),
            vec![server("abc", "http://127.0.0.1:9")],
            "/System/Info/Public",
            tx,
        );

        assert!(matches!(
            registry.register(None).await,
            Err(ConnectError::Transport(_))
        ));

        let raised = rx.recv().await.unwrap();
        assert_eq!(raised.method, "emby.ServerUnreachable");
        assert_eq!(raised.data, r#"[{"ServerId":null}]"#);
        assert_eq!(registry.active_server(), None);
    }

    #[tokio::test]
    async fn test_server_error_raises_scoped_unreachable() {
        let address = serve_once("503 Service Unavailable").await;
        let (tx, mut rx) = create_notification_channel();
        let registry = HttpServerRegistry::new(
            Client::new(),
            vec![server("abc", "http://127.0.0.1:9"), server("def", &address)],
            "/System/Info/Public",
            tx,
        );

        assert!(registry.register(Some("def")).await.is_err());

        let raised = rx.recv().await.unwrap();
        assert_eq!(raised.method, "emby.ServerUnreachable");
        assert_eq!(raised.data, r#"[{"ServerId":"def"}]"#);
    }

    #[tokio::test]
    async fn test_register_errors() {
        let (tx, mut rx) = create_notification_channel();
        let registry = HttpServerRegistry::new(
            Client::new(),
            vec![server("abc", "http://127.0.0.1:9")],
            "/System/Info/Public",
            tx,
        );

        assert!(matches!(
            registry.register(Some("zzz")).await,
            Err(ConnectError::Config(_))
        ));
        assert!(matches!(
            registry.register(None).await,
            Err(ConnectError::Transport(_))
        ));

        registry.set_suspended(true);
        assert!(matches!(
            registry.register(None).await,
            Err(ConnectError::Config(_))
        ));

        // Only the transport failure is reported back
        assert_eq!(rx.recv().await.unwrap().method, "emby.ServerUnreachable");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_server() {
        let (tx, _rx) = create_notification_channel();
        let registry = HttpServerRegistry::new(
            Client::new(),
            vec![server("abc", "http://127.0.0.1:9")],
            "/System/Info/Public",
            tx,
        );

        registry.remove_server("abc").await.unwrap();
        assert!(registry.remove_server("abc").await.is_err());
        assert!(matches!(
            registry.register(None).await,
            Err(ConnectError::Config(_))
        ));
        assert!(registry.add_server().await.is_err());
    }
}
