//! The seam to the remote-display protocol library.
//!
//! The wire codec and renderer live behind [`ProtocolClient`]; this crate only
//! consumes its lifecycle callbacks, display accessor, input senders and the
//! clipboard / filesystem sub-channels.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::stream::{InputStream, OutputStream};

/// Endpoint the gateway exposes for session tunnels.
pub const DEFAULT_TUNNEL_ENDPOINT: &str = "api/remote/conn";

/// MIME type a filesystem object returns when the requested path is a directory.
pub const STREAM_INDEX_MIMETYPE: &str = "application/vnd.glyptodon.guacamole.stream-index+json";

pub mod keysym {
    pub const CONTROL_LEFT: u32 = 0xFFE3;
    pub const ALT_LEFT: u32 = 0xFFE9;
    pub const DELETE: u32 = 0xFFFF;
}

/// Remote-display status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Unsupported,
    ServerError,
    ServerBusy,
    UpstreamTimeout,
    UpstreamError,
    ResourceNotFound,
    ResourceConflict,
    ResourceClosed,
    UpstreamNotFound,
    UpstreamUnavailable,
    SessionConflict,
    SessionTimeout,
    SessionClosed,
    ClientBadRequest,
    ClientUnauthorized,
    ClientForbidden,
    ClientTimeout,
    ClientOverrun,
    ClientBadType,
    ClientTooMany,
    Other(u16),
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        match self {
            StatusCode::Success => 0x0000,
            StatusCode::Unsupported => 0x0100,
            StatusCode::ServerError => 0x0200,
            StatusCode::ServerBusy => 0x0201,
            StatusCode::UpstreamTimeout => 0x0202,
            StatusCode::UpstreamError => 0x0203,
            StatusCode::ResourceNotFound => 0x0204,
            StatusCode::ResourceConflict => 0x0205,
            StatusCode::ResourceClosed => 0x0206,
            StatusCode::UpstreamNotFound => 0x0207,
            StatusCode::UpstreamUnavailable => 0x0208,
            StatusCode::SessionConflict => 0x0209,
            StatusCode::SessionTimeout => 0x020A,
            StatusCode::SessionClosed => 0x020B,
            StatusCode::ClientBadRequest => 0x0300,
            StatusCode::ClientUnauthorized => 0x0301,
            StatusCode::ClientForbidden => 0x0303,
            StatusCode::ClientTimeout => 0x0308,
            StatusCode::ClientOverrun => 0x030D,
            StatusCode::ClientBadType => 0x030F,
            StatusCode::ClientTooMany => 0x031D,
            StatusCode::Other(code) => code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            0x0000 => StatusCode::Success,
            0x0100 => StatusCode::Unsupported,
            0x0200 => StatusCode::ServerError,
            0x0201 => StatusCode::ServerBusy,
            0x0202 => StatusCode::UpstreamTimeout,
            0x0203 => StatusCode::UpstreamError,
            0x0204 => StatusCode::ResourceNotFound,
            0x0205 => StatusCode::ResourceConflict,
            0x0206 => StatusCode::ResourceClosed,
            0x0207 => StatusCode::UpstreamNotFound,
            0x0208 => StatusCode::UpstreamUnavailable,
            0x0209 => StatusCode::SessionConflict,
            0x020A => StatusCode::SessionTimeout,
            0x020B => StatusCode::SessionClosed,
            0x0300 => StatusCode::ClientBadRequest,
            0x0301 => StatusCode::ClientUnauthorized,
            0x0303 => StatusCode::ClientForbidden,
            0x0308 => StatusCode::ClientTimeout,
            0x030D => StatusCode::ClientOverrun,
            0x030F => StatusCode::ClientBadType,
            0x031D => StatusCode::ClientTooMany,
            other => StatusCode::Other(other),
        }
    }

    pub fn is_error(self) -> bool {
        self != StatusCode::Success
    }
}

/// Status reported by the protocol library, with an optional human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub message: Option<String>,
}

impl Status {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} (0x{:04X})", message, self.code.as_u16()),
            None => write!(f, "status 0x{:04X}", self.code.as_u16()),
        }
    }
}

/// Connection states of the underlying client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Waiting,
    Connected,
    Disconnecting,
    Disconnected,
}

pub mod mouse_button {
    pub const LEFT: u8 = 1;
    pub const MIDDLE: u8 = 2;
    pub const RIGHT: u8 = 4;
    pub const SCROLL_UP: u8 = 8;
    pub const SCROLL_DOWN: u8 = 16;
}

/// Raw pointer state forwarded to the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseState {
    pub x: i32,
    pub y: i32,
    /// Button bitmask, see [`mouse_button`].
    pub buttons: u8,
}

impl MouseState {
    pub fn new(x: i32, y: i32, buttons: u8) -> Self {
        Self { x, y, buttons }
    }

    pub fn is_pressed(&self, button: u8) -> bool {
        self.buttons & button != 0
    }
}

/// Callbacks raised by the protocol client, delivered in order on one channel.
pub enum ClientEvent {
    StateChanged(ClientState),
    /// Protocol-level error from the remote-display session.
    Error(Status),
    /// Socket-level error from the tunnel.
    TunnelError(Status),
    Clipboard {
        stream: InputStream,
        mimetype: String,
    },
    Filesystem {
        object: Arc<dyn FilesystemObject>,
        name: String,
    },
}

impl fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::StateChanged(state) => f.debug_tuple("StateChanged").field(state).finish(),
            ClientEvent::Error(status) => f.debug_tuple("Error").field(status).finish(),
            ClientEvent::TunnelError(status) => f.debug_tuple("TunnelError").field(status).finish(),
            ClientEvent::Clipboard { mimetype, .. } => f
                .debug_struct("Clipboard")
                .field("mimetype", mimetype)
                .finish_non_exhaustive(),
            ClientEvent::Filesystem { name, .. } => f
                .debug_struct("Filesystem")
                .field("name", name)
                .finish_non_exhaustive(),
        }
    }
}

/// Sender side the client uses to raise [`ClientEvent`]s.
pub type ClientListener = mpsc::UnboundedSender<ClientEvent>;

/// Rendered display surface owned by the protocol client.
pub trait Display: Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn scale(&self, factor: f64);
    fn show_cursor(&self, visible: bool);
}

pub trait ProtocolClient: Send + Sync {
    /// Start the session, sending `handshake` as the tunnel negotiation parameter.
    fn connect(&self, handshake: &str) -> Result<()>;

    fn disconnect(&self);

    /// Register (or with `None`, clear) the single listener for every callback.
    fn set_listener(&self, listener: Option<ClientListener>);

    fn send_key_event(&self, pressed: bool, keysym: u32);

    fn send_mouse_state(&self, state: MouseState);

    /// Open an outbound stream on the clipboard channel.
    fn create_clipboard_stream(&self, mimetype: &str) -> OutputStream;

    fn display(&self) -> &dyn Display;
}

/// Builds a fresh transport endpoint and client for one connection attempt.
pub trait ClientFactory: Send + Sync {
    fn create(&self, endpoint: &str) -> Result<Arc<dyn ProtocolClient>>;
}

/// Input stream granted by a filesystem object, with the MIME type the server declared.
pub struct IncomingStream {
    pub stream: InputStream,
    pub mimetype: String,
}

/// Resolves once the server answers a stream request. A dropped sender means the
/// request was never answered (the session went away).
pub type PendingStream = oneshot::Receiver<IncomingStream>;

/// Tree-structured remote filesystem exposed over named-object streams.
pub trait FilesystemObject: Send + Sync {
    fn request_input_stream(&self, path: &str) -> PendingStream;

    fn create_output_stream(&self, mimetype: &str, path: &str) -> Result<OutputStream>;
}
