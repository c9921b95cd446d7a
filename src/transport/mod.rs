//! Generic auto-reconnecting WebSocket transport.

mod backoff;
mod socket;

pub use backoff::{BACKOFF_FACTOR, Backoff, MAX_RECONNECT_DELAY};
pub use socket::{DuplexReconnectSocket, Message, SocketHandler};
