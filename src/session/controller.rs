use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::input::InputAdapters;
use super::{RetryDecision, SessionFailure, SessionHost, SessionState};
use crate::clipboard::ClipboardBridge;
use crate::config::{BridgeSettings, ProtocolKind, SessionConfig};
use crate::error::{AppError, Result};
use crate::filesystem::FileTransferBridge;
use crate::protocol::{ClientEvent, ClientFactory, ClientState, ProtocolClient, Status, StatusCode, keysym};
use crate::viewport::{DisplayGeometry, DisplaySize};

type SharedClient = Arc<RwLock<Option<Arc<dyn ProtocolClient>>>>;

/// Display access that survives reconnects; reads whichever client is current.
#[derive(Clone)]
pub struct SessionGeometry {
    client: SharedClient,
}

impl DisplayGeometry for SessionGeometry {
    fn display_size(&self) -> DisplaySize {
        match current(&self.client) {
            Some(client) => {
                let display = client.display();
                DisplaySize::new(display.width(), display.height())
            }
            None => DisplaySize::default(),
        }
    }

    fn set_scale(&self, scale: f64) {
        if let Some(client) = current(&self.client) {
            client.display().scale(scale);
        }
    }
}

fn current(client: &SharedClient) -> Option<Arc<dyn ProtocolClient>> {
    client
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Owns the protocol client of one session and everything riding on it.
pub struct SessionController {
    factory: Arc<dyn ClientFactory>,
    host: SessionHost,
    settings: BridgeSettings,
    state: SessionState,
    config: Option<SessionConfig>,
    client: SharedClient,
    events: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    clipboard: Option<ClipboardBridge>,
    filesystem: Option<FileTransferBridge>,
    input: Option<InputAdapters>,
    pending_failure: Option<SessionFailure>,
}

impl SessionController {
    pub fn new(factory: Arc<dyn ClientFactory>, host: SessionHost, settings: BridgeSettings) -> Self {
        Self {
            factory,
            host,
            settings,
            state: SessionState::Idle,
            config: None,
            client: Arc::new(RwLock::new(None)),
            events: None,
            clipboard: None,
            filesystem: None,
            input: None,
            pending_failure: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    pub fn pending_failure(&self) -> Option<&SessionFailure> {
        self.pending_failure.as_ref()
    }

    pub fn is_active(&self) -> bool {
        current(&self.client).is_some()
    }

    pub fn geometry(&self) -> SessionGeometry {
        SessionGeometry {
            client: Arc::clone(&self.client),
        }
    }

    /// Open a new session. Any existing one is torn down first. The config is
    /// kept verbatim for later reconnects.
    pub fn connect(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        let handshake = config.handshake_param()?;

        if self.is_active() {
            self.disconnect();
        }
        self.pending_failure = None;

        let client = self.factory.create(&self.settings.endpoint)?;
        let (listener, events) = mpsc::unbounded_channel();
        client.set_listener(Some(listener));
        self.events = Some(events);

        let mut clipboard =
            ClipboardBridge::new(Arc::downgrade(&client), Arc::clone(&self.host.clipboard));
        clipboard.install(self.host.window_focus.as_ref());
        self.clipboard = Some(clipboard);

        self.state = SessionState::Connecting;
        info!(
            "Connecting session {} ({:?} {}:{})",
            config.id,
            config.protocol(),
            config.remote.host,
            config.remote.port
        );
        self.host.observer.connection_attempted();

        self.filesystem = Some(FileTransferBridge::new(Arc::clone(&self.host.file_sink)));

        *self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&client));
        self.config = Some(config);

        if let Err(e) = client.connect(&handshake) {
            error!("Could not start session: {}", e);
            self.state = SessionState::Failed;
            self.raise(SessionFailure::Transport(Status::with_message(
                StatusCode::UpstreamUnavailable,
                e.to_string(),
            )));
            return Err(e);
        }
        Ok(())
    }

    /// Tear the session down. Calling it again does nothing.
    pub fn disconnect(&mut self) {
        let had_session = self.clipboard.is_some()
            || self.filesystem.is_some()
            || self.is_active()
            || self.input.is_some();

        if let Some(mut clipboard) = self.clipboard.take() {
            clipboard.uninstall();
        }

        if let Some(filesystem) = self.filesystem.take() {
            filesystem.teardown();
        }

        let client = self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(client) = client {
            // no callback may reach a half-destroyed session
            client.set_listener(None);
            client.disconnect();
        }
        self.events = None;

        if let Some(mut input) = self.input.take() {
            input.teardown();
        }

        if had_session {
            if self.state != SessionState::Failed {
                self.state = SessionState::Disconnected;
            }
            info!("Session disconnected");
        }
    }

    pub fn reconnect(&mut self, config: SessionConfig) -> Result<()> {
        self.disconnect();
        self.connect(config)
    }

    /// Answer the pending failure: reconnect with the same config, or tear
    /// down for good and notify the shell.
    pub fn resolve_failure(&mut self, decision: RetryDecision) -> Result<()> {
        let failure = self
            .pending_failure
            .take()
            .ok_or(AppError::NoPendingDecision)?;

        match decision {
            RetryDecision::Retry => {
                info!("Operator chose to reconnect after: {}", failure);
                let config = self.config.clone().ok_or_else(|| {
                    AppError::ValidationError("no session config to reconnect with".to_string())
                })?;
                self.reconnect(config)
            }
            RetryDecision::Abandon => {
                info!("Operator abandoned the session after: {}", failure);
                self.disconnect();
                self.host.observer.connection_cancelled();
                self.state = SessionState::Idle;
                Ok(())
            }
        }
    }

    /// Send Ctrl+Alt+Del, releasing keys in reverse press order.
    pub fn send_system_interrupt(&self) {
        let Some(client) = current(&self.client) else {
            debug!("No session for Ctrl+Alt+Del");
            return;
        };
        client.send_key_event(true, keysym::CONTROL_LEFT);
        client.send_key_event(true, keysym::ALT_LEFT);
        client.send_key_event(true, keysym::DELETE);
        client.send_key_event(false, keysym::DELETE);
        client.send_key_event(false, keysym::ALT_LEFT);
        client.send_key_event(false, keysym::CONTROL_LEFT);
    }

    /// Last known size of the rendered surface, zero before a display exists.
    pub fn get_display_size(&self) -> DisplaySize {
        self.geometry().display_size()
    }

    pub fn set_scale(&self, factor: f64) {
        self.geometry().set_scale(factor);
    }

    pub fn get_file_transfer_handle(&self) -> Option<FileTransferBridge> {
        self.filesystem.clone()
    }

    /// Wait for the next callback of the current client. `None` once no
    /// session is active.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Handle every callback that has already arrived, returning how many.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events.as_mut().and_then(|events| events.try_recv().ok()) {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::StateChanged(ClientState::Connected) => self.on_connected(),
            ClientEvent::StateChanged(ClientState::Disconnected) => {
                if !self.is_active() || self.pending_failure.is_some() {
                    debug!("Ignoring disconnect notification");
                    return;
                }
                self.state = SessionState::Disconnected;
                self.raise(SessionFailure::Disconnected);
            }
            ClientEvent::StateChanged(state) => debug!("Client state {:?}", state),
            ClientEvent::Error(status) => {
                self.state = SessionState::Failed;
                self.raise(SessionFailure::Protocol(status));
            }
            ClientEvent::TunnelError(status) => {
                self.state = SessionState::Failed;
                self.raise(SessionFailure::Transport(status));
            }
            ClientEvent::Clipboard { stream, mimetype } => {
                if let Some(clipboard) = &self.clipboard {
                    clipboard.receive_remote(stream, &mimetype);
                }
            }
            ClientEvent::Filesystem { object, name } => {
                if let Some(filesystem) = &self.filesystem {
                    filesystem.attach_filesystem(object, &name);
                }
            }
        }
    }

    fn on_connected(&mut self) {
        let Some(client) = current(&self.client) else {
            return;
        };
        if self.input.is_none() {
            let protocol = self
                .config
                .as_ref()
                .map_or(ProtocolKind::Rdp, SessionConfig::protocol);
            self.input = Some(InputAdapters::activate(
                &client,
                self.host.container.as_ref(),
                protocol,
                self.settings.long_press(),
            ));
        }
        self.state = SessionState::Connected;
        info!("Session connected");
        self.host.observer.connection_established();
    }

    /// Surface a failure to the operator once; later failures wait for the
    /// pending decision.
    fn raise(&mut self, failure: SessionFailure) {
        if self.pending_failure.is_some() {
            debug!("Decision already pending, ignoring: {}", failure);
            return;
        }
        warn!("Session needs a decision: {}", failure);
        self.host.observer.decision_required(&failure);
        self.pending_failure = Some(failure);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
    }
}
