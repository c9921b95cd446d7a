//! Two-way clipboard sync between the local environment and the remote session.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::events::{EventSource, ListenerHandle};
use crate::host::WindowFocus;
use crate::protocol::ProtocolClient;
use crate::stream::{InputStream, read_text};

/// MIME type used for every clipboard push to the remote session.
pub const CLIPBOARD_TEXT_MIMETYPE: &str = "text/plain";

/// Local clipboard access. Failures map to [`AppError::PermissionDenied`].
pub trait LocalClipboard: Send + Sync {
    fn read_text(&self) -> Result<String>;
    fn write_text(&self, text: &str) -> Result<()>;
}

/// The OS clipboard through `arboard`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl LocalClipboard for SystemClipboard {
    fn read_text(&self) -> Result<String> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| AppError::PermissionDenied(e.to_string()))?;
        match clipboard.get_text() {
            Ok(text) => Ok(text),
            // nothing textual on the clipboard
            Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
            Err(e) => Err(AppError::PermissionDenied(e.to_string())),
        }
    }

    fn write_text(&self, text: &str) -> Result<()> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| AppError::PermissionDenied(e.to_string()))?;
        clipboard
            .set_text(text.to_string())
            .map_err(|e| AppError::PermissionDenied(e.to_string()))
    }
}

/// One clipboard transfer in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardPayload {
    pub mimetype: String,
    pub data: String,
}

impl ClipboardPayload {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            mimetype: CLIPBOARD_TEXT_MIMETYPE.to_string(),
            data: data.into(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.mimetype.starts_with("text/")
    }
}

/// Clipboard sync for one session. Holds the client weakly; the session owns it.
pub struct ClipboardBridge {
    client: Weak<dyn ProtocolClient>,
    clipboard: Arc<dyn LocalClipboard>,
    focus_listener: Option<ListenerHandle>,
    alive: CancellationToken,
}

impl ClipboardBridge {
    pub fn new(client: Weak<dyn ProtocolClient>, clipboard: Arc<dyn LocalClipboard>) -> Self {
        Self {
            client,
            clipboard,
            focus_listener: None,
            alive: CancellationToken::new(),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.focus_listener.is_some()
    }

    /// Push the local clipboard every time the host window regains focus.
    pub fn install(&mut self, window_focus: &dyn EventSource<WindowFocus>) {
        if self.focus_listener.is_some() {
            return;
        }

        let token = self.alive.child_token();
        let (mut focus, guard) = window_focus.subscribe().into_parts();
        let client = self.client.clone();
        let clipboard = Arc::clone(&self.clipboard);
        let listener = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = listener.cancelled() => break,
                    event = focus.recv() => match event {
                        Some(WindowFocus) => push_local(&client, clipboard.as_ref()),
                        None => break,
                    },
                }
            }
            debug!("Clipboard focus listener stopped");
        });

        self.focus_listener = Some(ListenerHandle::new(token).with(guard));
    }

    pub fn uninstall(&mut self) {
        self.focus_listener = None;
    }

    /// Send the current local clipboard text to the remote session.
    pub fn sync_local_to_remote(&self) {
        push_local(&self.client, self.clipboard.as_ref());
    }

    /// Accept clipboard data pushed by the remote session. Returns `false` for
    /// non-text MIME types, which are ignored.
    pub fn receive_remote(&self, mut stream: InputStream, mimetype: &str) -> bool {
        if !mimetype.starts_with("text/") {
            debug!("Ignoring remote clipboard data of type {}", mimetype);
            return false;
        }

        let clipboard = Arc::clone(&self.clipboard);
        let alive = self.alive.clone();
        let mimetype = mimetype.to_string();
        tokio::spawn(async move {
            let payload = tokio::select! {
                _ = alive.cancelled() => return,
                text = read_text(&mut stream) => match text {
                    Ok(data) => ClipboardPayload { mimetype, data },
                    Err(e) => {
                        warn!("Remote clipboard stream failed: {}", e);
                        return;
                    }
                },
            };
            if alive.is_cancelled() {
                return;
            }
            if let Err(e) = clipboard.write_text(&payload.data) {
                warn!("Could not write local clipboard: {}", e);
            }
        });
        true
    }
}

impl Drop for ClipboardBridge {
    fn drop(&mut self) {
        self.uninstall();
        self.alive.cancel();
    }
}

fn push_local(client: &Weak<dyn ProtocolClient>, clipboard: &dyn LocalClipboard) {
    let payload = match clipboard.read_text() {
        Ok(text) if text.is_empty() => return,
        Ok(text) => ClipboardPayload::text(text),
        Err(e) => {
            warn!("Could not read local clipboard: {}", e);
            return;
        }
    };

    let Some(client) = client.upgrade() else {
        return;
    };

    let mut stream = client.create_clipboard_stream(&payload.mimetype);
    if let Err(e) = stream.write(Bytes::from(payload.data)) {
        warn!("Could not send clipboard to remote: {}", e);
    }
    stream.end();
}
