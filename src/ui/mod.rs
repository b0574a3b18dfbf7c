//! User-facing dialogs and notifications

pub mod notifications;

pub use notifications::{Dialog, DialogKind, Message};
