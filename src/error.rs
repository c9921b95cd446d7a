use thiserror::Error;

use crate::protocol::Status;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(Status),

    #[error("Unsupported stream: expected {expected}, got {actual}")]
    StreamUnsupported { expected: String, actual: String },

    #[error("Clipboard access denied: {0}")]
    PermissionDenied(String),

    #[error("Transfer error: {0}")]
    TransferError(String),

    #[error("Remote filesystem is not available")]
    FilesystemUnavailable,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("No failure is awaiting an operator decision")]
    NoPendingDecision,

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;
