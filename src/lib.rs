pub mod clipboard;
pub mod config;
pub mod error;
pub mod events;
pub mod filesystem;
pub mod host;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transfer;
pub mod transport;
pub mod viewport;

mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use clipboard::{ClipboardBridge, LocalClipboard, SystemClipboard};
pub use config::{BridgeSettings, ConfigManager, ProtocolKind, SessionConfig};
pub use error::{AppError, Result};
pub use filesystem::{DownloadDirectory, FileTransferBridge, Listing, RemoteFileEntry};
pub use session::{
    RetryDecision, SessionController, SessionFailure, SessionHost, SessionObserver, SessionState,
};
pub use transfer::{FileResult, TransferBatch, TransferProgress, UploadProgress};
pub use transport::{DuplexReconnectSocket, SocketHandler};
pub use utils::init_tracing;
pub use viewport::{RefreshOnConnect, ViewportController, ViewportGeometry};
