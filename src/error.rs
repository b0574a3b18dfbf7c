//! Error types shared across the orchestrator

use thiserror::Error;

/// Outcome of a failed connection registration attempt
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server could not be reached or answered with a transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// No usable server configuration (unknown id, nothing configured, ...)
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ConnectError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A notification payload that could not be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a single-record array payload")]
    NotWrapped,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker command channel closed")]
    Closed,

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("manifest request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to store patch: {0}")]
    Io(#[from] std::io::Error),

    #[error("build {0} incompatible")]
    Incompatible(String),

    #[error("malformed manifest entry: {0}")]
    Malformed(String),
}
