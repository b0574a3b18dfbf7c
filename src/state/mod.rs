//! Process-wide key/value state
//!
//! Flags and identifiers that other parts of the host read to coordinate with
//! the agent. Every key is guarded by the same lock, so a single read or write
//! is never torn; components use the typed accessors instead of raw keys.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Known process-wide keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Online,
    Connected,
    ShouldStop,
    Profile,
    LogLevel,
    Context,
    ContextTranscode,
    State,
    ServerStatus,
    SyncRunning,
    DbCheck,
    CurrentUser,
    DbScan,
    InitialScan,
    Play,
    Resume,
    External,
    ExternalCheck,
    DeviceId,
    DbCheckSecondary,
    PathVerified,
}

impl StateKey {
    /// Keys cleared on orderly shutdown
    pub const SHUTDOWN_CLEARED: [StateKey; 16] = [
        StateKey::State,
        StateKey::ServerStatus,
        StateKey::SyncRunning,
        StateKey::DbCheck,
        StateKey::CurrentUser,
        StateKey::DbScan,
        StateKey::InitialScan,
        StateKey::Play,
        StateKey::Online,
        StateKey::Connected,
        StateKey::Resume,
        StateKey::External,
        StateKey::ExternalCheck,
        StateKey::DeviceId,
        StateKey::DbCheckSecondary,
        StateKey::PathVerified,
    ];

    /// Property name as seen by the host
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Online => "emby_online",
            StateKey::Connected => "emby.connected",
            StateKey::ShouldStop => "emby_should_stop",
            StateKey::Profile => "emby_kodiProfile",
            StateKey::LogLevel => "emby_logLevel",
            StateKey::Context => "emby_context",
            StateKey::ContextTranscode => "emby_context_transcode",
            StateKey::State => "emby_state",
            StateKey::ServerStatus => "emby_serverStatus",
            StateKey::SyncRunning => "emby_syncRunning",
            StateKey::DbCheck => "emby_dbCheck",
            StateKey::CurrentUser => "emby_currUser",
            StateKey::DbScan => "emby_dbScan",
            StateKey::InitialScan => "emby_initialScan",
            StateKey::Play => "emby_play",
            StateKey::Resume => "emby.resume",
            StateKey::External => "emby.external",
            StateKey::ExternalCheck => "emby.external_check",
            StateKey::DeviceId => "emby_deviceId",
            StateKey::DbCheckSecondary => "emby_db_check",
            StateKey::PathVerified => "emby_pathverified",
        }
    }
}

/// Scalar stored under a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Text(String),
}

#[derive(Debug, Default)]
pub struct ProcessState {
    values: RwLock<HashMap<StateKey, StateValue>>,
}

impl ProcessState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<StateKey, StateValue>> {
        self.values.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<StateKey, StateValue>> {
        self.values.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: StateKey) -> Option<StateValue> {
        self.read().get(&key).cloned()
    }

    pub fn set(&self, key: StateKey, value: StateValue) {
        self.write().insert(key, value);
    }

    pub fn clear(&self, key: StateKey) {
        self.write().remove(&key);
    }

    /// Clear a group of keys under a single lock acquisition
    pub fn clear_all(&self, keys: &[StateKey]) {
        let mut values = self.write();
        for key in keys {
            values.remove(key);
        }
    }

    /// Missing keys and non-boolean values read as `false`
    pub fn flag(&self, key: StateKey) -> bool {
        matches!(self.get(key), Some(StateValue::Bool(true)))
    }

    pub fn set_flag(&self, key: StateKey, value: bool) {
        self.set(key, StateValue::Bool(value));
    }

    pub fn text(&self, key: StateKey) -> Option<String> {
        match self.get(key) {
            Some(StateValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn set_text(&self, key: StateKey, value: impl Into<String>) {
        self.set(key, StateValue::Text(value.into()));
    }

    pub fn is_online(&self) -> bool {
        self.flag(StateKey::Online)
    }

    /// Online is either set or absent; going offline clears the key.
    pub fn set_online(&self, online: bool) {
        if online {
            self.set_flag(StateKey::Online, true);
        } else {
            self.clear(StateKey::Online);
        }
    }

    pub fn should_stop(&self) -> bool {
        self.flag(StateKey::ShouldStop)
    }

    pub fn set_should_stop(&self, stop: bool) {
        if stop {
            self.set_flag(StateKey::ShouldStop, true);
        } else {
            self.clear(StateKey::ShouldStop);
        }
    }

    pub fn profile(&self) -> Option<String> {
        self.text(StateKey::Profile)
    }

    pub fn set_profile(&self, profile: &str) {
        self.set_text(StateKey::Profile, profile);
    }

    pub fn log_level(&self) -> Option<String> {
        self.text(StateKey::LogLevel)
    }

    pub fn set_log_level(&self, level: &str) {
        self.set_text(StateKey::LogLevel, level);
    }

    pub fn set_context_menu(&self, enabled: bool) {
        self.set_flag(StateKey::Context, enabled);
    }

    pub fn set_transcode_context_menu(&self, enabled: bool) {
        self.set_flag(StateKey::ContextTranscode, enabled);
    }

    pub fn device_id(&self) -> Option<String> {
        self.text(StateKey::DeviceId)
    }

    pub fn set_device_id(&self, device_id: &str) {
        self.set_text(StateKey::DeviceId, device_id);
    }

    /// Host-facing view of every set key, ordered by property name
    pub fn snapshot(&self) -> BTreeMap<&'static str, StateValue> {
        self.read()
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_flag_reads_false() {
        let state = ProcessState::new();
        assert!(!state.is_online());
        assert!(!state.should_stop());
        state.set_text(StateKey::Online, "yes");
        assert!(!state.is_online());
    }

    #[test]
    fn test_going_offline_clears_key() {
        let state = ProcessState::new();
        state.set_online(true);
        assert!(state.is_online());
        state.set_online(false);
        assert_eq!(state.get(StateKey::Online), None);
    }

    #[test]
    fn test_clear_all_leaves_other_keys() {
        let state = ProcessState::new();
        state.set_online(true);
        state.set_device_id("abc");
        state.set_profile("master");
        state.set_should_stop(true);

        state.clear_all(&StateKey::SHUTDOWN_CLEARED);

        assert!(!state.is_online());
        assert_eq!(state.device_id(), None);
        assert_eq!(state.profile().as_deref(), Some("master"));
        assert!(state.should_stop());
    }

    #[test]
    fn test_snapshot_uses_host_property_names() {
        let state = ProcessState::new();
        state.set_log_level("2");
        state.set_context_menu(true);

        let json = serde_json::to_string(&state.snapshot()).unwrap();
        assert_eq!(json, r#"{"emby_context":true,"emby_logLevel":"2"}"#);
    }

    #[test]
    fn test_concurrent_writers_do_not_tear() {
        let state = std::sync::Arc::new(ProcessState::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        state.set_text(StateKey::CurrentUser, format!("user-{}", i));
                        let value = state.text(StateKey::CurrentUser).unwrap();
                        assert!(value.starts_with("user-"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
