use thiserror::Error;

use crate::protocol::ErrorShape;

#[derive(Debug, Error)]
pub enum ClawPwaError {
    #[error("Config error: {0}")]
    Config(String),

    /// `connect` was answered with `ok: false`. Fatal to the connection.
    #[error("Authentication failed: {0}")]
    Auth(ErrorShape),

    /// Any other request answered with `ok: false`. Local to that request.
    #[error("Request {method} failed: {error}")]
    Request { method: String, error: ErrorShape },

    /// The active run reported a terminal error.
    #[error("Run {run_id} failed: {error}")]
    RunFailed { run_id: String, error: ErrorShape },

    #[error("Transport error: {0}")]
    Transport(String),

    /// Client-side watchdog expired; the gateway never acknowledged anything.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A request other than `connect` was attempted before the handshake finished.
    #[error("Connection not ready (state: {0})")]
    NotReady(String),

    #[error("Connection closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClawPwaError>;
