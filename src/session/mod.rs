//! Session lifecycle: connect, teardown, operator retry decisions, input.

mod controller;
mod input;

use std::fmt;
use std::sync::Arc;

pub use controller::{SessionController, SessionGeometry};
pub use input::TouchEmulator;

use crate::clipboard::{LocalClipboard, SystemClipboard};
use crate::config::BridgeSettings;
use crate::events::EventSource;
use crate::filesystem::{DownloadDirectory, FileSink};
use crate::host::{DisplayContainer, WindowFocus};
use crate::protocol::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Why the session stopped and now needs an operator decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// The remote session reported it disconnected.
    Disconnected,
    /// The tunnel failed at the socket level.
    Transport(Status),
    /// The remote-display protocol reported an error.
    Protocol(Status),
}

impl SessionFailure {
    /// Text shown to the operator alongside the retry/cancel choice.
    pub fn message(&self) -> String {
        match self {
            SessionFailure::Disconnected => {
                "Connection closed. Reconnect?".to_string()
            }
            SessionFailure::Transport(status) | SessionFailure::Protocol(status) => {
                match &status.message {
                    Some(message) => format!("Service error, connection failed: {message}"),
                    None => "Service error, connection failed".to_string(),
                }
            }
        }
    }

    pub fn status(&self) -> Option<&Status> {
        match self {
            SessionFailure::Disconnected => None,
            SessionFailure::Transport(status) | SessionFailure::Protocol(status) => Some(status),
        }
    }
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abandon,
}

/// Notifications raised towards the surrounding shell.
pub trait SessionObserver: Send + Sync {
    fn connection_attempted(&self) {}

    fn connection_established(&self) {}

    fn connection_cancelled(&self) {}

    /// The session failed; answer with [`SessionController::resolve_failure`].
    fn decision_required(&self, _failure: &SessionFailure) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Everything a session borrows from the host shell.
#[derive(Clone)]
pub struct SessionHost {
    pub container: Arc<dyn DisplayContainer>,
    pub window_focus: Arc<dyn EventSource<WindowFocus>>,
    pub clipboard: Arc<dyn LocalClipboard>,
    pub file_sink: Arc<dyn FileSink>,
    pub observer: Arc<dyn SessionObserver>,
}

impl SessionHost {
    /// Host backed by the OS clipboard, saving downloads into the
    /// configured download directory.
    pub fn system(
        container: Arc<dyn DisplayContainer>,
        window_focus: Arc<dyn EventSource<WindowFocus>>,
        observer: Arc<dyn SessionObserver>,
        settings: &BridgeSettings,
    ) -> Self {
        Self {
            container,
            window_focus,
            clipboard: Arc::new(SystemClipboard),
            file_sink: Arc::new(DownloadDirectory::from_settings(settings)),
            observer,
        }
    }
}
