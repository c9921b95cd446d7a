//! Test doubles for the protocol seam and the host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::clipboard::LocalClipboard;
use crate::config::{BridgeSettings, ProtocolKind, RemoteTarget, SessionConfig};
use crate::error::{AppError, Result};
use crate::events::{EventHub, EventSource, Subscription};
use crate::filesystem::FileSink;
use crate::host::{
    ContainerFocus, DisplayContainer, InputSink, KeyEvent, MouseAdapterEvent, TouchAdapterEvent,
    VirtualContainer, WindowFocus,
};
use crate::protocol::{
    ClientEvent, ClientFactory, ClientListener, ClientState, Display, FilesystemObject,
    IncomingStream, MouseState, PendingStream, ProtocolClient, STREAM_INDEX_MIMETYPE, Status,
    StatusCode,
};
use crate::session::{SessionController, SessionFailure, SessionHost, SessionObserver};
use crate::stream::{InputStream, InputStreamFeed, OutboundFrame, OutputStream, OutputStreamSink, StreamAck};

pub fn sample_config(protocol: ProtocolKind) -> SessionConfig {
    SessionConfig::new(
        "lab-host",
        RemoteTarget {
            host: "192.168.1.20".to_string(),
            port: 3389,
            username: "operator".to_string(),
            password: "hunter2".to_string(),
            protocol,
            width: Some(1280),
            height: Some(720),
        },
    )
}

/// Poll `check` until it holds, failing the test after about a second.
pub async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Ordered record of side effects shared by several doubles.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Event source over an [`EventHub`] that logs `"<label> unsubscribed"`
/// once a registration is dropped.
pub struct LoggedSource<E> {
    hub: EventHub<E>,
    label: &'static str,
    log: CallLog,
}

impl<E: Clone + Send + 'static> LoggedSource<E> {
    pub fn new(hub: EventHub<E>, label: &'static str, log: CallLog) -> Self {
        Self { hub, label, log }
    }
}

fn logged<E: Clone + Send + 'static>(
    hub: &EventHub<E>,
    label: &'static str,
    log: &CallLog,
) -> Subscription<E> {
    let (receiver, guard) = hub.subscribe().into_parts();
    let log = log.clone();
    Subscription::new(receiver, move || {
        drop(guard);
        log.push(format!("{label} unsubscribed"));
    })
}

impl<E: Clone + Send + 'static> EventSource<E> for LoggedSource<E> {
    fn subscribe(&self) -> Subscription<E> {
        logged(&self.hub, self.label, &self.log)
    }
}

/// [`VirtualContainer`] whose registrations and input sink report to a [`CallLog`].
pub struct LoggedContainer {
    inner: VirtualContainer,
    log: CallLog,
}

impl LoggedContainer {
    pub fn new(inner: VirtualContainer, log: CallLog) -> Self {
        Self { inner, log }
    }
}

struct LoggedInputSink {
    inner: Box<dyn InputSink>,
    log: CallLog,
}

impl InputSink for LoggedInputSink {
    fn focus(&self) {
        self.inner.focus();
    }
}

impl Drop for LoggedInputSink {
    fn drop(&mut self) {
        self.log.push("input sink removed");
    }
}

impl DisplayContainer for LoggedContainer {
    fn mouse_events(&self) -> Subscription<MouseAdapterEvent> {
        logged(&self.inner.mouse, "mouse", &self.log)
    }

    fn touch_events(&self) -> Subscription<TouchAdapterEvent> {
        logged(&self.inner.touch, "touch", &self.log)
    }

    fn key_events(&self) -> Subscription<KeyEvent> {
        logged(&self.inner.keys, "keys", &self.log)
    }

    fn focus_events(&self) -> Subscription<ContainerFocus> {
        logged(&self.inner.focus, "container focus", &self.log)
    }

    fn set_focusable(&self, focusable: bool) {
        self.inner.set_focusable(focusable);
    }

    fn attach_input_sink(&self) -> Box<dyn InputSink> {
        Box::new(LoggedInputSink {
            inner: self.inner.attach_input_sink(),
            log: self.log.clone(),
        })
    }
}

#[derive(Default)]
pub struct MockDisplay {
    width: AtomicU32,
    height: AtomicU32,
    scales: Mutex<Vec<f64>>,
    cursor_visible: Mutex<Option<bool>>,
}

impl MockDisplay {
    pub fn set_size(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::SeqCst);
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn scales(&self) -> Vec<f64> {
        self.scales.lock().unwrap().clone()
    }

    pub fn cursor_visible(&self) -> Option<bool> {
        *self.cursor_visible.lock().unwrap()
    }
}

impl Display for MockDisplay {
    fn width(&self) -> u32 {
        self.width.load(Ordering::SeqCst)
    }

    fn height(&self) -> u32 {
        self.height.load(Ordering::SeqCst)
    }

    fn scale(&self, factor: f64) {
        self.scales.lock().unwrap().push(factor);
    }

    fn show_cursor(&self, visible: bool) {
        *self.cursor_visible.lock().unwrap() = Some(visible);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    Connect(String),
    Disconnect,
    SetListener(bool),
    Key(bool, u32),
    Mouse(MouseState),
    ClipboardStream(String),
}

#[derive(Default)]
pub struct MockClient {
    calls: Mutex<Vec<ClientCall>>,
    listener: Mutex<Option<ClientListener>>,
    clipboard_sinks: Mutex<Vec<(String, OutputStreamSink)>>,
    clipboard_streams: AtomicU32,
    fail_connect: AtomicBool,
    display: MockDisplay,
    log: Option<CallLog>,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn key_events(&self) -> Vec<(bool, u32)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ClientCall::Key(pressed, keysym) => Some((pressed, keysym)),
                _ => None,
            })
            .collect()
    }

    pub fn mouse_states(&self) -> Vec<MouseState> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ClientCall::Mouse(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    /// Raise a callback; `false` when no listener is registered.
    pub fn emit(&self, event: ClientEvent) -> bool {
        match self.listener.lock().unwrap().as_ref() {
            Some(listener) => listener.send(event).is_ok(),
            None => false,
        }
    }

    pub fn set_state(&self, state: ClientState) -> bool {
        self.emit(ClientEvent::StateChanged(state))
    }

    pub fn clipboard_stream_count(&self) -> u32 {
        self.clipboard_streams.load(Ordering::SeqCst)
    }

    pub fn take_clipboard_sinks(&self) -> Vec<(String, OutputStreamSink)> {
        std::mem::take(&mut *self.clipboard_sinks.lock().unwrap())
    }

    pub fn display_mock(&self) -> &MockDisplay {
        &self.display
    }

    fn record(&self, call: ClientCall) {
        if let Some(log) = &self.log {
            log.push(format!("client {call:?}"));
        }
        self.calls.lock().unwrap().push(call);
    }
}

impl ProtocolClient for MockClient {
    fn connect(&self, handshake: &str) -> Result<()> {
        self.record(ClientCall::Connect(handshake.to_string()));
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AppError::TransportError("tunnel refused".to_string()));
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.record(ClientCall::Disconnect);
    }

    fn set_listener(&self, listener: Option<ClientListener>) {
        self.record(ClientCall::SetListener(listener.is_some()));
        *self.listener.lock().unwrap() = listener;
    }

    fn send_key_event(&self, pressed: bool, keysym: u32) {
        self.record(ClientCall::Key(pressed, keysym));
    }

    fn send_mouse_state(&self, state: MouseState) {
        self.record(ClientCall::Mouse(state));
    }

    fn create_clipboard_stream(&self, mimetype: &str) -> OutputStream {
        self.record(ClientCall::ClipboardStream(mimetype.to_string()));
        let index = self.clipboard_streams.fetch_add(1, Ordering::SeqCst);
        let (stream, sink) = OutputStream::pair(index, mimetype);
        self.clipboard_sinks
            .lock()
            .unwrap()
            .push((mimetype.to_string(), sink));
        stream
    }

    fn display(&self) -> &dyn Display {
        &self.display
    }
}

#[derive(Default)]
pub struct MockFactory {
    clients: Mutex<Vec<Arc<MockClient>>>,
    endpoints: Mutex<Vec<String>>,
    fail_connect: bool,
    log: Option<CallLog>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every client it builds refuses `connect`.
    pub fn failing_connect() -> Arc<Self> {
        Arc::new(Self {
            fail_connect: true,
            ..Self::default()
        })
    }

    /// Clients it builds also record their calls into `log`.
    pub fn with_log(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log: Some(log),
            ..Self::default()
        })
    }

    pub fn clients(&self) -> Vec<Arc<MockClient>> {
        self.clients.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<MockClient> {
        self.clients().pop().expect("no client created")
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

impl ClientFactory for MockFactory {
    fn create(&self, endpoint: &str) -> Result<Arc<dyn ProtocolClient>> {
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        let client = Arc::new(MockClient {
            fail_connect: AtomicBool::new(self.fail_connect),
            log: self.log.clone(),
            ..MockClient::default()
        });
        self.clients.lock().unwrap().push(Arc::clone(&client));
        Ok(client)
    }
}

/// Scripted answer of [`MockFilesystem`] for one path.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// A directory index with the given path -> mimetype object.
    Index(Value),
    /// File content delivered as these blobs.
    File(Vec<Vec<u8>>),
    /// Directory index that aborts before ending.
    BrokenIndex,
    /// File stream that aborts after one blob.
    BrokenFile,
    /// The request is dropped without an answer.
    Unanswered,
    /// The request is never answered but stays open.
    Pending,
}

#[derive(Debug, Clone, Default)]
pub struct UploadRecord {
    pub mimetype: String,
    pub data: Vec<u8>,
    pub ended: bool,
}

#[derive(Default)]
pub struct MockFilesystem {
    scripts: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<String>>,
    feeds: Mutex<Vec<(String, InputStreamFeed)>>,
    acks: Mutex<Vec<(String, StreamAck)>>,
    pending: Mutex<Vec<oneshot::Sender<IncomingStream>>>,
    upload_ack: Mutex<Option<Status>>,
    uploads: Arc<Mutex<HashMap<String, UploadRecord>>>,
    next_index: AtomicU32,
}

impl MockFilesystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, path: &str, answer: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .insert(path.to_string(), answer);
    }

    pub fn ack_uploads_with(&self, status: Status) {
        *self.upload_ack.lock().unwrap() = Some(status);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Acknowledgements sent so far on streams opened for `path`.
    pub fn acks_for(&self, path: &str) -> Vec<StreamAck> {
        let mut feeds = self.feeds.lock().unwrap();
        let mut acks = self.acks.lock().unwrap();
        for (feed_path, feed) in feeds.iter_mut() {
            while let Some(ack) = feed.try_next_ack() {
                acks.push((feed_path.clone(), ack));
            }
        }
        acks.iter()
            .filter(|(ack_path, _)| ack_path == path)
            .map(|(_, ack)| ack.clone())
            .collect()
    }

    pub fn upload(&self, path: &str) -> Option<UploadRecord> {
        self.uploads.lock().unwrap().get(path).cloned()
    }
}

impl FilesystemObject for MockFilesystem {
    fn request_input_stream(&self, path: &str) -> PendingStream {
        self.requests.lock().unwrap().push(path.to_string());
        let (tx, rx) = oneshot::channel();
        let script = self.scripts.lock().unwrap().get(path).cloned();
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);

        let (stream, feed) = InputStream::pair(index);
        let mimetype = match script {
            Some(Scripted::Index(value)) => {
                let json = serde_json::to_vec(&value).unwrap();
                let (head, tail) = json.split_at(json.len() / 2);
                feed.blob(Bytes::copy_from_slice(head));
                feed.blob(Bytes::copy_from_slice(tail));
                feed.end();
                STREAM_INDEX_MIMETYPE
            }
            Some(Scripted::File(blobs)) => {
                for blob in blobs {
                    feed.blob(blob);
                }
                feed.end();
                "application/octet-stream"
            }
            Some(Scripted::BrokenIndex) => {
                feed.blob(&b"{\"/trunc"[..]);
                feed.abort(Status::new(StatusCode::ResourceClosed));
                STREAM_INDEX_MIMETYPE
            }
            Some(Scripted::BrokenFile) => {
                feed.blob(&b"par"[..]);
                feed.abort(Status::with_message(StatusCode::UpstreamError, "read failed"));
                "application/octet-stream"
            }
            Some(Scripted::Pending) => {
                self.pending.lock().unwrap().push(tx);
                return rx;
            }
            Some(Scripted::Unanswered) | None => return rx,
        };

        self.feeds.lock().unwrap().push((path.to_string(), feed));
        let _ = tx.send(IncomingStream {
            stream,
            mimetype: mimetype.to_string(),
        });
        rx
    }

    fn create_output_stream(&self, mimetype: &str, path: &str) -> Result<OutputStream> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let (stream, mut sink) = OutputStream::pair(index, mimetype);
        let status = self
            .upload_ack
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Status::new(StatusCode::Success));

        let uploads = Arc::clone(&self.uploads);
        let path = path.to_string();
        uploads.lock().unwrap().insert(
            path.clone(),
            UploadRecord {
                mimetype: mimetype.to_string(),
                ..UploadRecord::default()
            },
        );

        tokio::spawn(async move {
            while let Some(frame) = sink.next_frame().await {
                let mut records = uploads.lock().unwrap();
                let Some(record) = records.get_mut(&path) else {
                    break;
                };
                match frame {
                    OutboundFrame::Blob(data) => {
                        record.data.extend_from_slice(&data);
                        sink.ack(status.clone());
                    }
                    OutboundFrame::End => {
                        record.ended = true;
                        break;
                    }
                }
            }
        });

        Ok(stream)
    }
}

#[derive(Default)]
pub struct MockClipboard {
    text: Mutex<String>,
    denied: AtomicBool,
    writes: Mutex<Vec<String>>,
}

impl MockClipboard {
    pub fn with_text(text: &str) -> Arc<Self> {
        let clipboard = Self::default();
        *clipboard.text.lock().unwrap() = text.to_string();
        Arc::new(clipboard)
    }

    pub fn set_text(&self, text: &str) {
        *self.text.lock().unwrap() = text.to_string();
    }

    pub fn deny(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

impl LocalClipboard for MockClipboard {
    fn read_text(&self) -> Result<String> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(AppError::PermissionDenied("clipboard-read".to_string()));
        }
        Ok(self.text.lock().unwrap().clone())
    }

    fn write_text(&self, text: &str) -> Result<()> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(AppError::PermissionDenied("clipboard-write".to_string()));
        }
        self.writes.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<(String, Bytes)>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn saved(&self) -> Vec<(String, Bytes)> {
        self.saved.lock().unwrap().clone()
    }
}

impl FileSink for MemorySink {
    fn save(&self, name: &str, content: Bytes) -> Result<()> {
        self.saved.lock().unwrap().push((name.to_string(), content));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Attempted,
    Established,
    Cancelled,
    Decision(SessionFailure),
}

#[derive(Default)]
pub struct RecordingObserver {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    fn push(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

impl SessionObserver for RecordingObserver {
    fn connection_attempted(&self) {
        self.push(Notice::Attempted);
    }

    fn connection_established(&self) {
        self.push(Notice::Established);
    }

    fn connection_cancelled(&self) {
        self.push(Notice::Cancelled);
    }

    fn decision_required(&self, failure: &SessionFailure) {
        self.push(Notice::Decision(failure.clone()));
    }
}

/// Handles a test keeps on the host side of a [`SessionController`].
pub struct Parts {
    pub factory: Arc<MockFactory>,
    pub observer: Arc<RecordingObserver>,
    pub container: VirtualContainer,
    pub focus: EventHub<WindowFocus>,
    pub clipboard: Arc<MockClipboard>,
    pub sink: Arc<MemorySink>,
}

pub fn harness() -> (SessionController, Parts) {
    harness_with(MockFactory::new(), RecordingObserver::new())
}

pub fn harness_with(
    factory: Arc<MockFactory>,
    observer: Arc<RecordingObserver>,
) -> (SessionController, Parts) {
    let container = VirtualContainer::new();
    let focus = EventHub::new();
    let clipboard = MockClipboard::with_text("");
    let sink = MemorySink::new();

    let host = SessionHost {
        container: Arc::new(container.clone()),
        window_focus: Arc::new(focus.clone()),
        clipboard: clipboard.clone(),
        file_sink: sink.clone(),
        observer: observer.clone(),
    };
    let controller = SessionController::new(factory.clone(), host, BridgeSettings::default());

    (
        controller,
        Parts {
            factory,
            observer,
            container,
            focus,
            clipboard,
            sink,
        },
    )
}
