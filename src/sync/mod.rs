//! Library synchronization worker and its supervisor

mod supervisor;
mod worker;

pub use supervisor::SyncWorkerSupervisor;
pub use worker::SyncWorker;

/// Library selection flows the user can trigger from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Sync,
    Repair,
    Add,
}

/// Commands forwarded to the running worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    /// Items updated or added on the server
    Updated(Vec<String>),
    /// Items removed on the server
    Removed(Vec<String>),
    /// Per-user data (watched state, resume points, ...) changed
    UserData(Vec<serde_json::Value>),
    /// Sync one library, or several as a comma-separated id list
    AddLibrary(String),
    /// Drop a single library
    RemoveLibrary(String),
    /// Re-evaluate which libraries are synced
    SelectLibraries(SelectionMode),
    /// Quick catch-up without a full reconciliation
    FastSync,
}

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}
