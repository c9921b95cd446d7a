use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use tokio_tungstenite::tungstenite::Message;

use super::backoff::Backoff;
use crate::error::{AppError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Callbacks for one [`DuplexReconnectSocket`]. All run on the socket's driver task.
pub trait SocketHandler: Send + 'static {
    fn on_open(&mut self) {}

    fn on_message(&mut self, _message: Message) {}

    fn on_error(&mut self, _error: &AppError) {}

    /// Called after every closure with the delay the next attempt would wait.
    /// Returning `false` makes the disconnect final.
    fn on_close(&mut self, _reconnect_delay: Duration) -> bool {
        true
    }
}

enum PumpOutcome {
    Closed,
    Failed(AppError),
    Cancelled,
}

/// Full-duplex WebSocket wrapper that reopens itself with exponential backoff.
pub struct DuplexReconnectSocket {
    base_delay: Duration,
    url: Option<String>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl DuplexReconnectSocket {
    /// A zero `base_delay` disables automatic reconnection.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            url: None,
            outbound: None,
            cancel: None,
            task: None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Open `url`, replacing (and detaching from) any previous socket.
    pub fn connect<H: SocketHandler>(&mut self, url: &str, handler: H) {
        self.detach();

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive(
            url.to_string(),
            handler,
            Backoff::new(self.base_delay),
            rx,
            cancel.clone(),
        ));

        self.url = Some(url.to_string());
        self.outbound = Some(tx);
        self.cancel = Some(cancel);
        self.task = Some(task);
    }

    /// Queue a message for the current (or next) open socket.
    pub fn send(&self, message: Message) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| AppError::TransportError("socket is not connected".to_string()))?;
        outbound
            .send(message)
            .map_err(|_| AppError::TransportError("socket driver has stopped".to_string()))
    }

    /// Cancel any pending reconnect, detach the handler and close the socket.
    pub fn disconnect(&mut self) {
        if self.detach() {
            info!("Socket to {:?} disconnected", self.url);
        }
    }

    fn detach(&mut self) -> bool {
        self.outbound = None;
        let had_driver = self.task.is_some();
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        // the driver closes the socket itself once it observes the cancellation
        self.task = None;
        had_driver
    }
}

impl Drop for DuplexReconnectSocket {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn drive<H: SocketHandler>(
    url: String,
    mut handler: H,
    mut backoff: Backoff,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        debug!("Opening socket to {}", url);
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_async(url.as_str()) => result,
        };

        match attempt {
            Ok((ws, _response)) => {
                backoff.reset();
                info!("Socket to {} open", url);
                handler.on_open();

                match pump(ws, &mut handler, &mut outbound, &cancel).await {
                    PumpOutcome::Cancelled => return,
                    PumpOutcome::Closed => debug!("Socket to {} closed by peer", url),
                    PumpOutcome::Failed(error) => {
                        warn!("Socket to {} failed: {}", url, error);
                        handler.on_error(&error);
                    }
                }
            }
            Err(error) => {
                let error = AppError::from(error);
                warn!("Socket to {} could not open: {}", url, error);
                handler.on_error(&error);
            }
        }

        if cancel.is_cancelled() {
            return;
        }

        if !handler.on_close(backoff.current()) {
            info!("Socket to {} closed for good", url);
            return;
        }

        if !backoff.is_enabled() {
            return;
        }

        let delay = backoff.next_delay();
        info!("Reconnecting to {} in {:.1}s", url, delay.as_secs_f64());
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn pump<H: SocketHandler>(
    ws: WsStream,
    handler: &mut H,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    cancel: &CancellationToken,
) -> PumpOutcome {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                return PumpOutcome::Cancelled;
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = sink.close().await;
                    return PumpOutcome::Cancelled;
                };
                if let Err(e) = sink.send(message).await {
                    return PumpOutcome::Failed(e.into());
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => return PumpOutcome::Closed,
                Some(Ok(message)) => handler.on_message(message),
                Some(Err(e)) => return PumpOutcome::Failed(e.into()),
            },
        }
    }
}
