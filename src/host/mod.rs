//! Boundary to the host application
//!
//! Everything the orchestrator needs from the outside world goes through one
//! of these traits: rendering dialogs, the connection registry for remote
//! servers, the library sync algorithm run by the worker, and patch downloads.

use async_trait::async_trait;

use crate::error::ConnectError;
use crate::sync::WorkerCommand;
use crate::ui::Dialog;

pub mod headless;
#[cfg(test)]
pub mod testing;

/// UI and playback surface of the host. Calls are fire-and-forget.
pub trait HostUi: Send + Sync {
    /// Display a dialog or toast
    fn show(&self, dialog: Dialog);

    /// Refresh the container currently displayed
    fn refresh_container(&self);

    /// Rebuild the library views after the server-side user configuration changed
    fn rebuild_views(&self);

    /// Restart the host application
    fn restart_app(&self);

    /// Ask the player to report playback progress, `full` for a complete report
    fn report_progress(&self, full: bool);

    fn is_playing(&self) -> bool;

    /// Identity of the host profile currently loaded
    fn current_profile(&self) -> String;

    /// Host build identifier, e.g. "18.9 Git:20201023"
    fn build_version(&self) -> String;
}

/// Registry of remote server connections
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    /// Establish the connection to `server_id`, or to the default server
    async fn register(&self, server_id: Option<&str>) -> Result<(), ConnectError>;

    /// Sign in through the server vendor's connect service
    async fn login_connect(&self) -> Result<(), ConnectError>;

    /// Interactive setup of a new server
    async fn add_server(&self) -> Result<(), ConnectError>;

    /// Interactive update of the known server's address
    async fn update_server(&self) -> Result<(), ConnectError>;

    async fn remove_server(&self, server_id: &str) -> Result<(), ConnectError>;

    /// Close every open server session
    fn close_all(&self);

    /// While suspended the registry holds no servers and accepts no work
    fn set_suspended(&self, suspended: bool);
}

/// The library synchronization algorithm executed by the worker
#[async_trait]
pub trait LibrarySync: Send + Sync {
    /// Initial reconciliation run when the worker starts
    async fn startup(&self) -> anyhow::Result<()>;

    /// Apply a single forwarded change
    async fn apply(&self, command: WorkerCommand) -> anyhow::Result<()>;
}

/// Downloads and installs objects patches
#[async_trait]
pub trait PatchInstaller: Send + Sync {
    /// Returns `Ok(false)` when no patch could be installed
    async fn install(&self, zipfile: &str, label: &str) -> anyhow::Result<bool>;

    /// Label of the last patch installed, if any
    async fn installed(&self) -> Option<String>;
}
