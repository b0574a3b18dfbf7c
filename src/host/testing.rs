//! Recording fakes for the host traits

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{HostUi, LibrarySync, PatchInstaller, ServerRegistry};
use crate::error::ConnectError;
use crate::sync::WorkerCommand;
use crate::ui::Dialog;

#[derive(Default)]
pub struct RecordingUi {
    pub dialogs: Mutex<Vec<Dialog>>,
    pub refreshes: AtomicUsize,
    pub view_rebuilds: AtomicUsize,
    pub restarts: AtomicUsize,
    pub reports: Mutex<Vec<bool>>,
    pub playing: AtomicBool,
    pub profile: Mutex<String>,
}

impl RecordingUi {
    pub fn dialogs(&self) -> Vec<Dialog> {
        self.dialogs.lock().unwrap().clone()
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<bool> {
        self.reports.lock().unwrap().clone()
    }

    pub fn set_profile(&self, profile: &str) {
        *self.profile.lock().unwrap() = profile.to_string();
    }
}

impl HostUi for RecordingUi {
    fn show(&self, dialog: Dialog) {
        self.dialogs.lock().unwrap().push(dialog);
    }

    fn refresh_container(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn rebuild_views(&self) {
        self.view_rebuilds.fetch_add(1, Ordering::SeqCst);
    }

    fn restart_app(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }

    fn report_progress(&self, full: bool) {
        self.reports.lock().unwrap().push(full);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn current_profile(&self) -> String {
        self.profile.lock().unwrap().clone()
    }

    fn build_version(&self) -> String {
        "18.9 Git:20201023".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Register(Option<String>),
    LoginConnect,
    AddServer,
    UpdateServer,
    RemoveServer(String),
    CloseAll,
    Suspended(bool),
}

#[derive(Default)]
pub struct FakeRegistry {
    pub calls: Mutex<Vec<RegistryCall>>,
    pub fail_register: AtomicBool,
}

impl FakeRegistry {
    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn register_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RegistryCall::Register(_)))
            .count()
    }

    fn record(&self, call: RegistryCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ServerRegistry for FakeRegistry {
    async fn register(&self, server_id: Option<&str>) -> Result<(), ConnectError> {
        self.record(RegistryCall::Register(server_id.map(str::to_string)));
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(ConnectError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    async fn login_connect(&self) -> Result<(), ConnectError> {
        self.record(RegistryCall::LoginConnect);
        Ok(())
    }

    async fn add_server(&self) -> Result<(), ConnectError> {
        self.record(RegistryCall::AddServer);
        Ok(())
    }

    async fn update_server(&self) -> Result<(), ConnectError> {
        self.record(RegistryCall::UpdateServer);
        Ok(())
    }

    async fn remove_server(&self, server_id: &str) -> Result<(), ConnectError> {
        self.record(RegistryCall::RemoveServer(server_id.to_string()));
        Ok(())
    }

    fn close_all(&self) {
        self.record(RegistryCall::CloseAll);
    }

    fn set_suspended(&self, suspended: bool) {
        self.record(RegistryCall::Suspended(suspended));
    }
}

#[derive(Default)]
pub struct RecordingLibrary {
    pub commands: Mutex<Vec<WorkerCommand>>,
    pub startups: AtomicUsize,
}

impl RecordingLibrary {
    pub fn commands(&self) -> Vec<WorkerCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Wait until the worker has applied at least `count` commands
    pub async fn wait_for(&self, count: usize) -> Vec<WorkerCommand> {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let commands = self.commands();
            if commands.len() >= count || std::time::Instant::now() >= deadline {
                return commands;
            }
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl LibrarySync for RecordingLibrary {
    async fn startup(&self) -> anyhow::Result<()> {
        self.startups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn apply(&self, command: WorkerCommand) -> anyhow::Result<()> {
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePatches {
    pub installs: Mutex<Vec<(String, String)>>,
    pub succeed: AtomicBool,
    pub current: Mutex<Option<String>>,
}

#[async_trait]
impl PatchInstaller for FakePatches {
    async fn install(&self, zipfile: &str, label: &str) -> anyhow::Result<bool> {
        self.installs
            .lock()
            .unwrap()
            .push((zipfile.to_string(), label.to_string()));
        let succeed = self.succeed.load(Ordering::SeqCst);
        if succeed {
            *self.current.lock().unwrap() = Some(label.to_string());
        }
        Ok(succeed)
    }

    async fn installed(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }
}
