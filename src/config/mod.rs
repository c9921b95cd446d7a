pub mod manager;
pub mod session;

pub use manager::{BridgeSettings, Config, ConfigManager, SessionProfile};
pub use session::{FileTransferConfig, ProtocolKind, RemoteTarget, SessionConfig};
