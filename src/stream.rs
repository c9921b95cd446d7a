//! Named-object streams and the reader/writer adapters layered on them.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::protocol::{Status, StatusCode};

/// Largest blob a [`write_blob`] call puts on the wire at once.
pub const BLOB_CHUNK_SIZE: usize = 6048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Blob(Bytes),
    End,
    Abort(Status),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAck {
    pub index: u32,
    pub message: String,
    pub code: StatusCode,
}

/// Inbound half of a named-object stream.
pub struct InputStream {
    index: u32,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    acks: mpsc::UnboundedSender<StreamAck>,
}

impl InputStream {
    pub fn new(
        index: u32,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        acks: mpsc::UnboundedSender<StreamAck>,
    ) -> Self {
        Self {
            index,
            events,
            acks,
        }
    }

    /// Build a stream together with the feed a protocol implementation drives it with.
    pub fn pair(index: u32) -> (InputStream, InputStreamFeed) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        (
            InputStream::new(index, event_rx, ack_tx),
            InputStreamFeed {
                events: event_tx,
                acks: ack_rx,
            },
        )
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn send_ack(&self, message: &str, code: StatusCode) {
        debug!("stream {} ack: {} ({:?})", self.index, message, code);
        let _ = self.acks.send(StreamAck {
            index: self.index,
            message: message.to_string(),
            code,
        });
    }

    /// Next blob, `Ok(None)` at end of stream.
    pub async fn next_blob(&mut self) -> Result<Option<Bytes>> {
        match self.events.recv().await {
            Some(StreamEvent::Blob(data)) => Ok(Some(data)),
            Some(StreamEvent::End) => Ok(None),
            Some(StreamEvent::Abort(status)) => Err(AppError::TransferError(format!(
                "stream {} aborted: {}",
                self.index, status
            ))),
            None => Err(AppError::TransferError(format!(
                "stream {} closed before end",
                self.index
            ))),
        }
    }
}

/// Producer side of an [`InputStream`].
pub struct InputStreamFeed {
    events: mpsc::UnboundedSender<StreamEvent>,
    acks: mpsc::UnboundedReceiver<StreamAck>,
}

impl InputStreamFeed {
    pub fn blob(&self, data: impl Into<Bytes>) -> bool {
        self.events.send(StreamEvent::Blob(data.into())).is_ok()
    }

    pub fn end(&self) -> bool {
        self.events.send(StreamEvent::End).is_ok()
    }

    pub fn abort(&self, status: Status) -> bool {
        self.events.send(StreamEvent::Abort(status)).is_ok()
    }

    pub async fn next_ack(&mut self) -> Option<StreamAck> {
        self.acks.recv().await
    }

    pub fn try_next_ack(&mut self) -> Option<StreamAck> {
        self.acks.try_recv().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Blob(Bytes),
    End,
}

/// Outbound half of a named-object stream.
pub struct OutputStream {
    index: u32,
    mimetype: String,
    frames: mpsc::UnboundedSender<OutboundFrame>,
    acks: mpsc::UnboundedReceiver<Status>,
    ended: bool,
}

impl OutputStream {
    pub fn new(
        index: u32,
        mimetype: impl Into<String>,
        frames: mpsc::UnboundedSender<OutboundFrame>,
        acks: mpsc::UnboundedReceiver<Status>,
    ) -> Self {
        Self {
            index,
            mimetype: mimetype.into(),
            frames,
            acks,
            ended: false,
        }
    }

    /// Build a stream together with the sink a protocol implementation drains it with.
    pub fn pair(index: u32, mimetype: &str) -> (OutputStream, OutputStreamSink) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        (
            OutputStream::new(index, mimetype, frame_tx, ack_rx),
            OutputStreamSink {
                frames: frame_rx,
                acks: ack_tx,
            },
        )
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    pub fn write(&self, data: Bytes) -> Result<()> {
        if self.ended {
            return Err(AppError::TransferError(format!(
                "stream {} already ended",
                self.index
            )));
        }
        self.frames
            .send(OutboundFrame::Blob(data))
            .map_err(|_| AppError::TransferError(format!("stream {} is closed", self.index)))
    }

    /// Signal end-of-stream. Repeated calls are no-ops.
    pub fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            let _ = self.frames.send(OutboundFrame::End);
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub async fn wait_ack(&mut self) -> Result<Status> {
        self.acks.recv().await.ok_or_else(|| {
            AppError::TransferError(format!("stream {} closed while awaiting ack", self.index))
        })
    }
}

/// Consumer side of an [`OutputStream`].
pub struct OutputStreamSink {
    frames: mpsc::UnboundedReceiver<OutboundFrame>,
    acks: mpsc::UnboundedSender<Status>,
}

impl OutputStreamSink {
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        self.frames.recv().await
    }

    pub fn try_next_frame(&mut self) -> Option<OutboundFrame> {
        self.frames.try_recv().ok()
    }

    pub fn ack(&self, status: Status) -> bool {
        self.acks.send(status).is_ok()
    }
}

/// Read a whole stream as text. Bytes are decoded once at the end so that
/// multi-byte sequences split across blobs survive.
pub async fn read_text(stream: &mut InputStream) -> Result<String> {
    let mut buffer = BytesMut::new();
    while let Some(blob) = stream.next_blob().await? {
        buffer.extend_from_slice(&blob);
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Read a whole stream as JSON, acknowledging every blob.
pub async fn read_json(stream: &mut InputStream) -> Result<serde_json::Value> {
    let mut buffer = BytesMut::new();
    while let Some(blob) = stream.next_blob().await? {
        buffer.extend_from_slice(&blob);
        stream.send_ack("Received", StatusCode::Success);
    }
    Ok(serde_json::from_slice(&buffer)?)
}

/// Accumulates binary content of a stream and reports its running length.
#[derive(Debug, Default)]
pub struct BlobReader {
    buffer: BytesMut,
}

impl BlobReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, blob: &[u8]) -> u64 {
        self.buffer.extend_from_slice(blob);
        self.len()
    }

    pub fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// Write `data` in [`BLOB_CHUNK_SIZE`] slices, waiting for the server to
/// acknowledge each one. `on_progress` receives the offset reached after every
/// acknowledged slice. An error acknowledgement stops the write.
pub async fn write_blob<F>(stream: &mut OutputStream, data: &Bytes, mut on_progress: F) -> Result<()>
where
    F: FnMut(u64),
{
    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + BLOB_CHUNK_SIZE).min(data.len());
        stream.write(data.slice(offset..end))?;

        let status = stream.wait_ack().await?;
        if status.code.is_error() {
            return Err(AppError::TransferError(format!(
                "server rejected blob at offset {}: {}",
                offset, status
            )));
        }

        offset = end;
        on_progress(offset as u64);
    }
    Ok(())
}
