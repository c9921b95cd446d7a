use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::listing::{Listing, RemoteFileEntry, entries_from_index, single_file_entry};
use super::sink::FileSink;
use crate::error::{AppError, Result};
use crate::events::{EventSource, ListenerHandle};
use crate::host::DragEvent;
use crate::protocol::{FilesystemObject, IncomingStream, PendingStream, STREAM_INDEX_MIMETYPE, StatusCode};
use crate::stream::{BlobReader, read_json, write_blob};
use crate::transfer::{FileResult, TransferProgress, UploadProgress};

/// A local file dropped onto the drop target, read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedFile {
    pub name: String,
    pub mimetype: String,
    pub data: Bytes,
}

impl DroppedFile {
    pub async fn read(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                AppError::ValidationError(format!("'{}' has no file name", path.display()))
            })?;
        let mimetype = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self {
            name,
            mimetype,
            data: Bytes::from(data),
        })
    }
}

struct Shared {
    object: RwLock<Option<(Arc<dyn FilesystemObject>, String)>>,
    current_path: RwLock<String>,
    sink: Arc<dyn FileSink>,
    alive: CancellationToken,
    drop_listener: Mutex<Option<ListenerHandle>>,
    drag_active: AtomicBool,
}

/// List, download and upload over a session's filesystem object.
///
/// Cloning is cheap and every clone drives the same session state. Once the
/// session tears the bridge down, in-flight operations stop without reporting
/// further progress or saving anything.
#[derive(Clone)]
pub struct FileTransferBridge {
    shared: Arc<Shared>,
}

impl FileTransferBridge {
    pub fn new(sink: Arc<dyn FileSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                object: RwLock::new(None),
                current_path: RwLock::new("/".to_string()),
                sink,
                alive: CancellationToken::new(),
                drop_listener: Mutex::new(None),
                drag_active: AtomicBool::new(false),
            }),
        }
    }

    /// Bind the filesystem object the session announced.
    pub fn attach_filesystem(&self, object: Arc<dyn FilesystemObject>, name: &str) {
        if self.shared.alive.is_cancelled() {
            return;
        }
        info!("Remote filesystem '{}' available", name);
        let mut slot = self
            .shared
            .object
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some((object, name.to_string()));
    }

    pub fn is_available(&self) -> bool {
        self.object().is_ok()
    }

    pub fn filesystem_name(&self) -> Option<String> {
        self.shared
            .object
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|(_, name)| name.clone())
    }

    /// Last path successfully listed through [`change_directory`](Self::change_directory).
    pub fn current_path(&self) -> String {
        self.shared
            .current_path
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_drag_active(&self) -> bool {
        self.shared.drag_active.load(Ordering::SeqCst)
    }

    /// Watch `drop_target` and forward every dropped local file to `on_drop`.
    pub fn install(
        &self,
        drop_target: &dyn EventSource<DragEvent>,
        on_drop: mpsc::UnboundedSender<DroppedFile>,
    ) {
        let mut listener = self
            .shared
            .drop_listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if listener.is_some() || self.shared.alive.is_cancelled() {
            return;
        }

        let token = self.shared.alive.child_token();
        let cancel = token.clone();
        let (mut events, guard) = drop_target.subscribe().into_parts();
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Some(DragEvent::Over) => shared.drag_active.store(true, Ordering::SeqCst),
                    Some(DragEvent::Leave) => shared.drag_active.store(false, Ordering::SeqCst),
                    Some(DragEvent::Drop(paths)) => {
                        shared.drag_active.store(false, Ordering::SeqCst);
                        for path in paths {
                            match DroppedFile::read(&path).await {
                                Ok(file) => {
                                    if cancel.is_cancelled() || on_drop.send(file).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => warn!("Skipping dropped file {}: {}", path.display(), e),
                            }
                        }
                    }
                    None => break,
                }
            }
            shared.drag_active.store(false, Ordering::SeqCst);
        });

        *listener = Some(ListenerHandle::new(token).with(guard));
    }

    pub fn uninstall(&self) {
        let listener = self
            .shared
            .drop_listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(listener);
        self.shared.drag_active.store(false, Ordering::SeqCst);
    }

    /// Detach everything and orphan in-flight operations.
    pub(crate) fn teardown(&self) {
        self.uninstall();
        self.shared.alive.cancel();
        *self
            .shared
            .object
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// List `path` and make it the current path when it is a directory.
    /// A rejected or failed listing leaves the current path untouched.
    pub async fn change_directory(&self, path: &str) -> Result<Listing> {
        let listing = self.list_directory(path).await?;
        if listing.is_directory() {
            *self
                .shared
                .current_path
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = path.to_string();
        }
        Ok(listing)
    }

    /// Query the remote filesystem for `path`. Nothing is cached; every call
    /// issues a fresh stream request.
    pub async fn list_directory(&self, path: &str) -> Result<Listing> {
        let object = self.object()?;
        let IncomingStream {
            mut stream,
            mimetype,
        } = self.await_stream(path, object.request_input_stream(path)).await?;

        if mimetype != STREAM_INDEX_MIMETYPE {
            debug!("'{}' answered with {}, treating it as a file", path, mimetype);
            stream.send_ack("Unexpected mimetype", StatusCode::Unsupported);
            return Ok(Listing::File(single_file_entry(path)));
        }

        stream.send_ack("Ready", StatusCode::Success);
        let index = tokio::select! {
            _ = self.shared.alive.cancelled() => return Err(orphaned()),
            index = read_json(&mut stream) => index?,
        };

        Ok(Listing::Directory(entries_from_index(path, &index)?))
    }

    /// Download `path` and everything below it. Directories are walked
    /// depth-first while file streams run concurrently; each file reports
    /// through `progress` on its own and a failed file never stops its
    /// siblings. Fails only when `path` itself cannot be listed.
    pub async fn download(
        &self,
        path: &str,
        progress: mpsc::UnboundedSender<TransferProgress>,
    ) -> Result<Vec<FileResult>> {
        self.object()?;

        let mut pending = vec![path.to_string()];
        let mut files = JoinSet::new();
        let mut results = Vec::new();

        while let Some(dir) = pending.pop() {
            let listing = match self.list_directory(&dir).await {
                Ok(listing) => listing,
                Err(e) if dir == path => return Err(e),
                Err(e) => {
                    if self.shared.alive.is_cancelled() {
                        break;
                    }
                    warn!("Could not list '{}': {}", dir, e);
                    let name = single_file_entry(dir.trim_end_matches('/')).name;
                    let _ = progress.send(TransferProgress::failed(&dir, &name, &e));
                    results.push(FileResult::failed(&dir, &name, e));
                    continue;
                }
            };

            let mut subdirs = Vec::new();
            for entry in listing.into_entries() {
                if entry.is_dir() {
                    subdirs.push(entry.path);
                } else {
                    files.spawn(self.clone().download_file(entry, progress.clone()));
                }
            }
            // keep the server's order when popping
            pending.extend(subdirs.into_iter().rev());
        }

        while let Some(joined) = files.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Download task failed: {}", e),
            }
        }

        Ok(results)
    }

    async fn download_file(
        self,
        entry: RemoteFileEntry,
        progress: mpsc::UnboundedSender<TransferProgress>,
    ) -> FileResult {
        let RemoteFileEntry { name, path, .. } = entry;

        let incoming = match self.object() {
            Ok(object) => self.await_stream(&path, object.request_input_stream(&path)).await,
            Err(e) => Err(e),
        };
        let IncomingStream {
            mut stream,
            mimetype,
        } = match incoming {
            Ok(incoming) => incoming,
            Err(e) => {
                if !self.shared.alive.is_cancelled() {
                    let _ = progress.send(TransferProgress::failed(&path, &name, &e));
                }
                return FileResult::failed(&path, &name, e);
            }
        };

        if mimetype == STREAM_INDEX_MIMETYPE {
            stream.send_ack("Unexpected mimetype", StatusCode::Unsupported);
            warn!("'{}' turned out to be a directory, skipping", path);
            return FileResult::failed(
                &path,
                &name,
                AppError::StreamUnsupported {
                    expected: "file content".to_string(),
                    actual: mimetype,
                },
            );
        }

        stream.send_ack("Ready", StatusCode::Success);
        let mut reader = BlobReader::new();
        loop {
            let next = tokio::select! {
                _ = self.shared.alive.cancelled() => return FileResult::failed(&path, &name, orphaned()),
                next = stream.next_blob() => next,
            };
            match next {
                Ok(Some(blob)) => {
                    let total = reader.push(&blob);
                    stream.send_ack("Received", StatusCode::Success);
                    let _ = progress.send(TransferProgress::chunk(&path, &name, total));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Download of '{}' failed: {}", path, e);
                    let _ = progress.send(TransferProgress::failed(&path, &name, &e));
                    return FileResult::failed(&path, &name, e);
                }
            }
        }

        if self.shared.alive.is_cancelled() {
            return FileResult::failed(&path, &name, orphaned());
        }

        let _ = progress.send(TransferProgress::complete(&path, &name, reader.len()));
        let sink = Arc::clone(&self.shared.sink);
        let target = name.clone();
        let content = reader.into_bytes();
        let saved = tokio::task::spawn_blocking(move || sink.save(&target, content))
            .await
            .unwrap_or_else(|e| Err(AppError::TransferError(format!("save task failed: {e}"))));
        match saved {
            Ok(()) => FileResult::ok(&path, &name),
            Err(e) => {
                error!("Could not save '{}': {}", name, e);
                FileResult::failed(&path, &name, e)
            }
        }
    }

    /// Start writing `data` to `remote_path`. Progress reports `(size, offset)`
    /// per acknowledged chunk, `(size, size)` on completion and a failed entry
    /// otherwise; the stream is ended either way.
    pub fn upload(
        &self,
        data: Bytes,
        mimetype: &str,
        remote_path: &str,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<()> {
        let object = self.object()?;
        let mut stream = object.create_output_stream(mimetype, remote_path)?;
        let alive = self.shared.alive.clone();
        let path = remote_path.to_string();
        let size = data.len() as u64;

        info!("Uploading {} bytes to {}", size, path);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = alive.cancelled() => None,
                result = write_blob(&mut stream, &data, |offset| {
                    let _ = progress.send(UploadProgress {
                        path: path.clone(),
                        size,
                        offset,
                        error: None,
                    });
                }) => Some(result),
            };
            stream.end();

            match outcome {
                None => debug!("Upload to {} orphaned by teardown", path),
                Some(Ok(())) => {
                    let _ = progress.send(UploadProgress {
                        path: path.clone(),
                        size,
                        offset: size,
                        error: None,
                    });
                }
                Some(Err(e)) => {
                    warn!("Upload to {} failed: {}", path, e);
                    let _ = progress.send(UploadProgress::failed(&path, e));
                }
            }
        });

        Ok(())
    }

    fn object(&self) -> Result<Arc<dyn FilesystemObject>> {
        self.shared
            .object
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|(object, _)| Arc::clone(object))
            .ok_or(AppError::FilesystemUnavailable)
    }

    async fn await_stream(&self, path: &str, pending: PendingStream) -> Result<IncomingStream> {
        tokio::select! {
            _ = self.shared.alive.cancelled() => Err(orphaned()),
            incoming = pending => incoming.map_err(|_| {
                AppError::TransferError(format!("request for '{path}' was never answered"))
            }),
        }
    }
}

fn orphaned() -> AppError {
    AppError::TransferError("session closed".to_string())
}
