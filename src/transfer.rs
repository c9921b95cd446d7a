use std::time::Instant;

/// Progress of one downloaded file. Terminal once `is_complete` is set or `error` is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub path: String,
    pub name: String,
    pub bytes_transferred: u64,
    pub is_complete: bool,
    pub error: Option<String>,
}

impl TransferProgress {
    pub fn chunk(path: &str, name: &str, bytes_transferred: u64) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            bytes_transferred,
            is_complete: false,
            error: None,
        }
    }

    pub fn complete(path: &str, name: &str, total: u64) -> Self {
        Self {
            is_complete: true,
            ..Self::chunk(path, name, total)
        }
    }

    pub fn failed(path: &str, name: &str, error: impl ToString) -> Self {
        Self {
            is_complete: true,
            error: Some(error.to_string()),
            ..Self::chunk(path, name, 0)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_complete || self.error.is_some()
    }
}

/// Progress of one upload: `size` is the full payload, `offset` how far the server acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub path: String,
    pub size: u64,
    pub offset: u64,
    pub error: Option<String>,
}

impl UploadProgress {
    pub fn failed(path: &str, error: impl ToString) -> Self {
        Self {
            path: path.to_string(),
            size: 0,
            offset: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.error.is_some() || self.offset == self.size
    }
}

/// Outcome for a single file within a batch download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    pub path: String,
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
}

impl FileResult {
    pub fn ok(path: &str, name: &str) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            success: true,
            error: None,
        }
    }

    pub fn failed(path: &str, name: &str, error: impl ToString) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    InProgress,
    Completed,
    Failed(String),
}

/// Per-file progress snapshot
#[derive(Clone, Debug)]
pub struct FileProgress {
    pub path: String,
    pub name: String,
    pub transferred_bytes: u64,
    pub state: TransferState,
}

/// Aggregate view over the progress events of a batch download
#[derive(Clone, Debug)]
pub struct TransferBatch {
    pub start_time: Instant,
    pub files: Vec<FileProgress>,
    /// Tracks when every known file reached a terminal state
    pub all_files_done_at: Option<Instant>,
}

impl Default for TransferBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferBatch {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            files: Vec::new(),
            all_files_done_at: None,
        }
    }

    /// Register a file before any progress arrives for it.
    pub fn add_pending(&mut self, path: &str, name: &str) {
        if !self.files.iter().any(|f| f.path == path) {
            self.files.push(FileProgress {
                path: path.to_string(),
                name: name.to_string(),
                transferred_bytes: 0,
                state: TransferState::Pending,
            });
        }
    }

    pub fn update(&mut self, update: &TransferProgress) {
        self.add_pending(&update.path, &update.name);
        let Some(file) = self.files.iter_mut().find(|f| f.path == update.path) else {
            return;
        };

        // terminal states are sticky
        if !matches!(
            file.state,
            TransferState::Pending | TransferState::InProgress
        ) {
            return;
        }

        file.transferred_bytes = update.bytes_transferred;
        file.state = match (&update.error, update.is_complete) {
            (Some(error), _) => TransferState::Failed(error.clone()),
            (None, true) => TransferState::Completed,
            (None, false) => TransferState::InProgress,
        };

        if self.all_files_done_at.is_none() && self.all_files_finished() {
            self.all_files_done_at = Some(Instant::now());
        }
    }

    pub fn all_files_finished(&self) -> bool {
        !self.files.is_empty()
            && self
                .files
                .iter()
                .all(|f| matches!(f.state, TransferState::Completed | TransferState::Failed(_)))
    }

    pub fn completed_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.state == TransferState::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.state, TransferState::Failed(_)))
            .count()
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.transferred_bytes).sum()
    }
}
