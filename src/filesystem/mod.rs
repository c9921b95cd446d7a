//! Remote filesystem access over named-object streams.

pub mod bridge;
pub mod listing;
pub mod sink;

pub use bridge::{DroppedFile, FileTransferBridge};
pub use listing::{EntryKind, Listing, RemoteFileEntry};
pub use sink::{DownloadDirectory, FileSink};
