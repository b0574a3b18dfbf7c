//! Dialog and toast model for messages surfaced to the user
//!
//! The orchestrator never renders anything itself. It builds a [`Dialog`] and
//! hands it to the host, which decides how to display it.

use std::fmt;

/// Heading used for every dialog raised by the agent
pub const HEADING: &str = "Emby";

/// Icon shown next to a toast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastIcon {
    Addon,
    Error,
}

/// How the host should present a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    /// Modal with a single acknowledge button
    Ok,
    /// Modal asking the user to confirm
    YesNo,
    /// Transient notification
    Toast { icon: ToastIcon, sound: bool },
}

/// Localized messages, keyed by their string id in the add-on catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ServerUnreachable,
    ScopedServerUnreachable,
    Unauthorized,
    ScopedUnauthorized,
    ServerRestarting,
    UpdateServerNotice,
    PlaybackModeChanged,
    CompanionDisabled,
    PatchInstalled,
    PatchUnavailable,
    AddonOutdated { required: String },
    NoUpdates,
}

impl Message {
    /// String id in the add-on language catalog
    pub fn string_id(&self) -> u32 {
        match self {
            Message::ServerRestarting => 33006,
            Message::PlaybackModeChanged => 33118,
            Message::PatchInstalled => 33135,
            Message::CompanionDisabled => 33138,
            Message::ServerUnreachable => 33146,
            Message::Unauthorized => 33147,
            Message::ScopedUnauthorized => 33148,
            Message::ScopedServerUnreachable => 33149,
            Message::UpdateServerNotice => 33151,
            Message::PatchUnavailable => 33156,
            Message::AddonOutdated { .. } => 33160,
            Message::NoUpdates => 21341,
        }
    }

    /// Fallback English text for hosts without the catalog
    pub fn text(&self) -> String {
        match self {
            Message::ServerUnreachable => "Server is unreachable".to_string(),
            Message::ScopedServerUnreachable => "A secondary server is unreachable".to_string(),
            Message::Unauthorized => "Access to the server was denied".to_string(),
            Message::ScopedUnauthorized => {
                "Access to a secondary server was denied".to_string()
            }
            Message::ServerRestarting => "Server is restarting".to_string(),
            Message::UpdateServerNotice => {
                "Update the server address, then sign in again".to_string()
            }
            Message::PlaybackModeChanged => {
                "Changing the playback mode requires a full library reset. Continue?".to_string()
            }
            Message::CompanionDisabled => {
                "Make sure to disable the companion plugin on the server".to_string()
            }
            Message::PatchInstalled => "A patch was installed, restarting".to_string(),
            Message::PatchUnavailable => "Unable to download the latest patch".to_string(),
            Message::AddonOutdated { required } => {
                format!("Please update the add-on to version {}", required)
            }
            Message::NoUpdates => "No updates available".to_string(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.text(), self.string_id())
    }
}

/// A dialog request handed to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    pub kind: DialogKind,
    pub heading: &'static str,
    pub message: Message,
}

impl Dialog {
    pub fn ok(message: Message) -> Self {
        Self {
            kind: DialogKind::Ok,
            heading: HEADING,
            message,
        }
    }

    pub fn yes_no(message: Message) -> Self {
        Self {
            kind: DialogKind::YesNo,
            heading: HEADING,
            message,
        }
    }

    pub fn toast(message: Message) -> Self {
        Self {
            kind: DialogKind::Toast {
                icon: ToastIcon::Addon,
                sound: true,
            },
            heading: HEADING,
            message,
        }
    }

    /// Silent toast, used for background checks
    pub fn quiet_toast(message: Message) -> Self {
        Self {
            kind: DialogKind::Toast {
                icon: ToastIcon::Addon,
                sound: false,
            },
            heading: HEADING,
            message,
        }
    }

    pub fn error_toast(message: Message) -> Self {
        Self {
            kind: DialogKind::Toast {
                icon: ToastIcon::Error,
                sound: true,
            },
            heading: HEADING,
            message,
        }
    }
}
