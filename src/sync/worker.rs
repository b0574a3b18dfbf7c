//! Background synchronization worker
//!
//! The worker runs on its own task and only receives work through its
//! command channel. `stop()` cancels the task and waits for it to finish, so
//! once it returns nothing is left running.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{WorkerCommand, WorkerState};
use crate::error::WorkerError;
use crate::host::LibrarySync;
use crate::state::ProcessState;

/// Worker state shared between the task and its handle
#[derive(Debug)]
pub struct WorkerStatus {
    state: AtomicU8,
    started: AtomicBool,
}

impl WorkerStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(encode(WorkerState::NotStarted)),
            started: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> WorkerState {
        decode(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(encode(state), Ordering::SeqCst);
    }

    /// True once the initial reconciliation finished
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

fn encode(state: WorkerState) -> u8 {
    match state {
        WorkerState::NotStarted => 0,
        WorkerState::Running => 1,
        WorkerState::Stopping => 2,
        WorkerState::Stopped => 3,
    }
}

fn decode(value: u8) -> WorkerState {
    match value {
        0 => WorkerState::NotStarted,
        1 => WorkerState::Running,
        2 => WorkerState::Stopping,
        _ => WorkerState::Stopped,
    }
}

/// Handle to a running worker task
pub struct SyncWorker {
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    status: Arc<WorkerStatus>,
}

impl SyncWorker {
    /// Spawn the worker task. Must be called from within a tokio runtime.
    pub fn start(library: Arc<dyn LibrarySync>, state: Arc<ProcessState>) -> Self {
        let (cmd_tx, cmd_rx) = create_worker_channel();
        let cancel = CancellationToken::new();
        let status = Arc::new(WorkerStatus::new());
        status.set_state(WorkerState::Running);

        let handle = tokio::spawn(run(
            library,
            state,
            cmd_rx,
            cancel.clone(),
            status.clone(),
        ));

        Self {
            cmd_tx,
            cancel,
            handle,
            status,
        }
    }

    pub fn forward(&self, command: WorkerCommand) -> Result<(), WorkerError> {
        self.cmd_tx.send(command).map_err(|_| WorkerError::Closed)
    }

    pub fn state(&self) -> WorkerState {
        self.status.state()
    }

    pub fn started(&self) -> bool {
        self.status.started()
    }

    /// Request a cooperative stop and wait until the task has exited
    pub async fn stop(self) -> Result<(), WorkerError> {
        self.status.set_state(WorkerState::Stopping);
        self.cancel.cancel();
        let result = self.handle.await;
        self.status.set_state(WorkerState::Stopped);
        result.map_err(WorkerError::from)
    }
}

async fn run(
    library: Arc<dyn LibrarySync>,
    state: Arc<ProcessState>,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    cancel: CancellationToken,
    status: Arc<WorkerStatus>,
) {
    info!("--->[ library sync ]");

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Library sync cancelled before startup completed");
            return;
        }
        result = library.startup() => {
            if let Err(e) = result {
                error!("Library startup failed: {:#}", e);
            }
        }
    }
    status.started.store(true, Ordering::SeqCst);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };

                if state.should_stop() {
                    debug!("Skipping {:?}, agent is stopping", cmd);
                    continue;
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = library.apply(cmd) => {
                        if let Err(e) = result {
                            error!("Library sync command failed: {:#}", e);
                        }
                    }
                }
            }
        }
    }

    info!("---<[ library sync ]");
}

/// Create the command channel feeding a worker
pub fn create_worker_channel() -> (
    mpsc::UnboundedSender<WorkerCommand>,
    mpsc::UnboundedReceiver<WorkerCommand>,
) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingLibrary;

    #[tokio::test]
    async fn test_worker_applies_commands_in_order() {
        let library = Arc::new(RecordingLibrary::default());
        let worker = SyncWorker::start(library.clone(), Arc::new(ProcessState::new()));

        worker.forward(WorkerCommand::AddLibrary("1".into())).unwrap();
        worker.forward(WorkerCommand::FastSync).unwrap();

        let commands = library.wait_for(2).await;
        assert_eq!(
            commands,
            vec![WorkerCommand::AddLibrary("1".into()), WorkerCommand::FastSync]
        );
        assert!(worker.started());
        assert_eq!(worker.state(), WorkerState::Running);

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_waits_for_task_exit() {
        let library = Arc::new(RecordingLibrary::default());
        let worker = SyncWorker::start(library.clone(), Arc::new(ProcessState::new()));
        let status = worker.status.clone();

        worker.stop().await.unwrap();

        assert_eq!(status.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_commands_skipped_while_stopping() {
        let library = Arc::new(RecordingLibrary::default());
        let state = Arc::new(ProcessState::new());
        let worker = SyncWorker::start(library.clone(), state.clone());

        state.set_should_stop(true);
        worker.forward(WorkerCommand::FastSync).unwrap();
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert!(library.commands().is_empty());

        state.set_should_stop(false);
        worker.forward(WorkerCommand::Removed(vec!["9".into()])).unwrap();

        let commands = library.wait_for(1).await;
        worker.stop().await.unwrap();

        assert_eq!(commands, vec![WorkerCommand::Removed(vec!["9".into()])]);
    }
}
