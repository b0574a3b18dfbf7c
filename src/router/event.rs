//! Notification decoding
//!
//! Raw `(sender, method, data)` triples are turned into a typed
//! [`Notification`]. Unknown senders and methods decode to `None` and are
//! dropped without side effects.

use serde::Deserialize;
use serde_json::Value;

use crate::connection::Scope;
use crate::error::DecodeError;

/// Sender name of notifications raised by the add-on itself
pub const APPLICATION_SENDER: &str = "plugin.video.emby";

/// Sender name of host lifecycle notifications
pub const HOST_SENDER: &str = "xbmc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Application,
    HostSystem,
}

impl Origin {
    pub fn from_sender(sender: &str) -> Option<Self> {
        if sender.eq_ignore_ascii_case(APPLICATION_SENDER) {
            Some(Origin::Application)
        } else if sender.eq_ignore_ascii_case(HOST_SENDER) {
            Some(Origin::HostSystem)
        } else {
            None
        }
    }
}

/// Recognized notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Application
    ServerUnreachable,
    ServerShuttingDown,
    UserDataChanged,
    ServerConnect,
    LibraryChanged,
    ServerOnline,
    SyncLibrary,
    RepairLibrary,
    RemoveLibrary,
    EmbyConnect,
    SyncLibrarySelection,
    RepairLibrarySelection,
    AddServer,
    Unauthorized,
    UpdateServer,
    UserConfigurationUpdated,
    ServerRestarting,
    RemoveServer,
    AddLibrarySelection,
    CheckUpdate,
    // Host
    Quit,
    Sleep,
    Wake,
    ScreensaverDeactivated,
    /// Anything else; discarded
    Unknown,
}

impl EventKind {
    /// Resolve a method name for the given origin
    pub fn parse(origin: Origin, method: &str) -> Self {
        match origin {
            Origin::Application => {
                // "<namespace>.<event>": only the last segment is significant
                let event = method.rsplit('.').next().unwrap_or(method);
                Self::parse_application(event)
            }
            Origin::HostSystem => match method {
                "System.OnQuit" => EventKind::Quit,
                "System.OnSleep" => EventKind::Sleep,
                "System.OnWake" => EventKind::Wake,
                "GUI.OnScreensaverDeactivated" => EventKind::ScreensaverDeactivated,
                _ => EventKind::Unknown,
            },
        }
    }

    fn parse_application(event: &str) -> Self {
        match event {
            "ServerUnreachable" => EventKind::ServerUnreachable,
            "ServerShuttingDown" => EventKind::ServerShuttingDown,
            "UserDataChanged" => EventKind::UserDataChanged,
            "ServerConnect" => EventKind::ServerConnect,
            "LibraryChanged" => EventKind::LibraryChanged,
            "ServerOnline" => EventKind::ServerOnline,
            "SyncLibrary" => EventKind::SyncLibrary,
            "RepairLibrary" => EventKind::RepairLibrary,
            "RemoveLibrary" => EventKind::RemoveLibrary,
            "EmbyConnect" => EventKind::EmbyConnect,
            "SyncLibrarySelection" => EventKind::SyncLibrarySelection,
            "RepairLibrarySelection" => EventKind::RepairLibrarySelection,
            "AddServer" => EventKind::AddServer,
            "Unauthorized" => EventKind::Unauthorized,
            "UpdateServer" => EventKind::UpdateServer,
            "UserConfigurationUpdated" => EventKind::UserConfigurationUpdated,
            "ServerRestarting" => EventKind::ServerRestarting,
            "RemoveServer" => EventKind::RemoveServer,
            "AddLibrarySelection" => EventKind::AddLibrarySelection,
            "CheckUpdate" => EventKind::CheckUpdate,
            _ => EventKind::Unknown,
        }
    }
}

/// Host quit, recognized without decoding the payload
pub fn is_host_quit(sender: &str, method: &str) -> bool {
    Origin::from_sender(sender) == Some(Origin::HostSystem)
        && EventKind::parse(Origin::HostSystem, method) == EventKind::Quit
}

/// Fields consumed from notification payloads
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payload {
    #[serde(default)]
    pub server_id: Option<String>,

    /// Server or library id, sometimes a comma-separated list
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub user_data_list: Option<Vec<Value>>,

    #[serde(default)]
    pub items_updated: Option<Vec<String>>,

    #[serde(default)]
    pub items_added: Option<Vec<String>>,

    #[serde(default)]
    pub items_removed: Option<Vec<String>>,
}

impl Payload {
    pub fn scope(&self) -> Scope {
        Scope::from_server_id(self.server_id.as_deref())
    }

    /// Non-empty `Id`, if any
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn require_id(&self) -> Result<&str, DecodeError> {
        self.id().ok_or(DecodeError::MissingField("Id"))
    }

    /// Short description for logs; lists are reported by length only
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(server_id) = &self.server_id {
            parts.push(format!("server={}", server_id));
        }
        if let Some(id) = &self.id {
            parts.push(format!("id={}", id));
        }
        if let Some(user_data) = &self.user_data_list {
            parts.push(format!("user_data={}", user_data.len()));
        }
        for (name, items) in [
            ("updated", &self.items_updated),
            ("added", &self.items_added),
            ("removed", &self.items_removed),
        ] {
            if let Some(items) = items {
                parts.push(format!("{}={}", name, items.len()));
            }
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub origin: Origin,
    pub kind: EventKind,
    pub payload: Payload,
}

impl Notification {
    /// Decode a raw notification. `Ok(None)` means the notification is not ours.
    pub fn decode(sender: &str, method: &str, data: &str) -> Result<Option<Self>, DecodeError> {
        let Some(origin) = Origin::from_sender(sender) else {
            return Ok(None);
        };

        let kind = EventKind::parse(origin, method);
        if kind == EventKind::Unknown {
            return Ok(None);
        }

        let payload = match origin {
            Origin::Application => decode_wrapped(data)?,
            Origin::HostSystem => decode_plain(data)?,
        };

        Ok(Some(Self {
            origin,
            kind,
            payload,
        }))
    }
}

/// Application payloads are a single-record array
fn decode_wrapped(data: &str) -> Result<Payload, DecodeError> {
    let value: Value = serde_json::from_str(data)?;
    let Value::Array(mut records) = value else {
        return Err(DecodeError::NotWrapped);
    };
    if records.is_empty() {
        return Err(DecodeError::NotWrapped);
    }

    Ok(serde_json::from_value(records.swap_remove(0))?)
}

/// Host payloads are a plain object, often empty or null
fn decode_plain(data: &str) -> Result<Payload, DecodeError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(Payload::default());
    }

    match serde_json::from_str::<Value>(data)? {
        Value::Object(map) => Ok(serde_json::from_value(Value::Object(map))?),
        _ => Ok(Payload::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_sender_is_dropped() {
        let decoded = Notification::decode("plugin.video.other", "emby.ServerOnline", "[{}]").unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_host_quit_is_recognized_before_decoding() {
        assert!(is_host_quit("xbmc", "System.OnQuit"));
        assert!(is_host_quit("XBMC", "System.OnQuit"));
        assert!(!is_host_quit("plugin.video.emby", "System.OnQuit"));
        assert!(!is_host_quit("xbmc", "System.OnSleep"));
    }

    #[test]
    fn test_summary_counts_lists() {
        let payload = Payload {
            server_id: Some("abc".to_string()),
            user_data_list: Some(vec![Value::Null, Value::Null]),
            items_updated: Some(vec!["1".to_string()]),
            items_removed: Some(Vec::new()),
            ..Payload::default()
        };
        assert_eq!(payload.summary(), "server=abc user_data=2 updated=1 removed=0");
        assert_eq!(Payload::default().summary(), "");
    }

    #[test]
    fn test_sender_match_ignores_case() {
        assert_eq!(Origin::from_sender("XBMC"), Some(Origin::HostSystem));
        assert_eq!(
            Origin::from_sender("Plugin.Video.Emby"),
            Some(Origin::Application)
        );
    }

    #[test]
    fn test_application_uses_last_segment() {
        assert_eq!(
            EventKind::parse(Origin::Application, "plugin.video.emby.LibraryChanged"),
            EventKind::LibraryChanged
        );
        assert_eq!(
            EventKind::parse(Origin::Application, "Other.ServerOnline"),
            EventKind::ServerOnline
        );
        assert_eq!(
            EventKind::parse(Origin::Application, "Other.Nope"),
            EventKind::Unknown
        );
    }

    #[test]
    fn test_host_events_are_not_namespaced_application_events() {
        assert_eq!(
            EventKind::parse(Origin::HostSystem, "Other.ServerOnline"),
            EventKind::Unknown
        );
        assert_eq!(
            EventKind::parse(Origin::Application, "System.OnQuit"),
            EventKind::Unknown
        );
        assert_eq!(
            EventKind::parse(Origin::HostSystem, "GUI.OnScreensaverDeactivated"),
            EventKind::ScreensaverDeactivated
        );
    }

    #[test]
    fn test_unwraps_single_record() {
        let notification = Notification::decode(
            APPLICATION_SENDER,
            "emby.LibraryChanged",
            r#"[{"ServerId": null, "ItemsUpdated": ["1"], "ItemsAdded": [], "ItemsRemoved": ["2"]}]"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(notification.kind, EventKind::LibraryChanged);
        assert_eq!(notification.payload.scope(), Scope::Global);
        assert_eq!(notification.payload.items_updated, Some(vec!["1".to_string()]));
        assert_eq!(notification.payload.items_removed, Some(vec!["2".to_string()]));
    }

    #[test]
    fn test_scoped_payload() {
        let notification =
            Notification::decode(APPLICATION_SENDER, "emby.Unauthorized", r#"[{"ServerId": "abc"}]"#)
                .unwrap()
                .unwrap();
        assert_eq!(notification.payload.scope(), Scope::Server("abc".into()));
    }

    #[test]
    fn test_malformed_application_payloads() {
        assert!(matches!(
            Notification::decode(APPLICATION_SENDER, "emby.ServerOnline", "{}"),
            Err(DecodeError::NotWrapped)
        ));
        assert!(matches!(
            Notification::decode(APPLICATION_SENDER, "emby.ServerOnline", "[]"),
            Err(DecodeError::NotWrapped)
        ));
        assert!(matches!(
            Notification::decode(APPLICATION_SENDER, "emby.ServerOnline", "[{"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_host_payload_may_be_empty() {
        for data in ["", "{}", "null", r#"{"shuttingdown": true}"#] {
            let notification = Notification::decode(HOST_SENDER, "System.OnSleep", data)
                .unwrap()
                .unwrap();
            assert_eq!(notification.kind, EventKind::Sleep);
            assert_eq!(notification.payload, Payload::default());
        }
    }

    #[test]
    fn test_empty_id_is_missing() {
        let payload = Payload {
            id: Some(String::new()),
            ..Payload::default()
        };
        assert!(payload.id().is_none());
        assert!(matches!(payload.require_id(), Err(DecodeError::MissingField("Id"))));
    }
}
