//! Owns the single live sync worker
//!
//! Every interaction with the worker goes through here. Forwarding calls are
//! no-ops while no worker is live, and `stop()` holds the worker slot until
//! the task has exited so no command can reach a half-stopped worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{SelectionMode, SyncWorker, WorkerCommand};
use crate::host::LibrarySync;
use crate::state::ProcessState;

pub struct SyncWorkerSupervisor {
    library: Arc<dyn LibrarySync>,
    state: Arc<ProcessState>,
    worker: Mutex<Option<SyncWorker>>,
    /// Set by shutdown; no worker may be started afterwards
    closed: AtomicBool,
}

impl SyncWorkerSupervisor {
    pub fn new(library: Arc<dyn LibrarySync>, state: Arc<ProcessState>) -> Self {
        Self {
            library,
            state,
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Start a worker unless one is already live. Returns true if one was created.
    pub async fn start(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Supervisor closed, not starting a worker");
            return false;
        }

        let mut slot = self.worker.lock().await;
        if slot.is_some() {
            return false;
        }

        *slot = Some(SyncWorker::start(self.library.clone(), self.state.clone()));
        info!("Sync worker started");
        true
    }

    /// Stop the live worker, if any, and release it
    pub async fn stop(&self) {
        let mut slot = self.worker.lock().await;
        let Some(worker) = slot.take() else {
            return;
        };

        debug!("Stopping sync worker ({:?})", worker.state());
        if let Err(e) = worker.stop().await {
            error!("Sync worker did not stop cleanly: {}", e);
        } else {
            info!("Sync worker stopped");
        }
    }

    /// Stop the worker and refuse any later start
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop().await;
    }

    pub async fn is_live(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Whether the live worker finished its initial reconciliation
    pub async fn worker_started(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(SyncWorker::started)
            .unwrap_or(false)
    }

    async fn forward(&self, commands: impl IntoIterator<Item = WorkerCommand>) {
        let slot = self.worker.lock().await;
        let Some(worker) = slot.as_ref() else {
            debug!("No sync worker, dropping forwarded change");
            return;
        };

        for command in commands {
            if let Err(e) = worker.forward(command) {
                warn!("Failed to forward to sync worker: {}", e);
                return;
            }
        }
    }

    /// Forward a library delta: updated and added ids go together, removals separately
    pub async fn library_changed(&self, updated: Vec<String>, added: Vec<String>, removed: Vec<String>) {
        let mut changed = updated;
        for id in added {
            if !changed.contains(&id) {
                changed.push(id);
            }
        }

        self.forward([WorkerCommand::Updated(changed), WorkerCommand::Removed(removed)])
            .await;
    }

    pub async fn user_data_changed(&self, user_data: Vec<serde_json::Value>) {
        self.forward([WorkerCommand::UserData(user_data)]).await;
    }

    pub async fn add_library(&self, library_id: &str) {
        self.forward([WorkerCommand::AddLibrary(library_id.to_string())])
            .await;
    }

    /// Remove every library in a comma-separated id list
    pub async fn remove_libraries(&self, library_ids: &str) {
        self.forward(split_ids(library_ids).map(WorkerCommand::RemoveLibrary))
            .await;
    }

    /// Remove every listed library, then add the whole set back in one go
    pub async fn repair_libraries(&self, library_ids: &str) {
        let commands = split_ids(library_ids)
            .map(WorkerCommand::RemoveLibrary)
            .chain(std::iter::once(WorkerCommand::AddLibrary(
                library_ids.to_string(),
            )));
        self.forward(commands).await;
    }

    pub async fn select_libraries(&self, mode: SelectionMode) {
        self.forward([WorkerCommand::SelectLibraries(mode)]).await;
    }

    pub async fn fast_sync(&self) {
        self.forward([WorkerCommand::FastSync]).await;
    }
}

fn split_ids(ids: &str) -> impl Iterator<Item = String> + '_ {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
