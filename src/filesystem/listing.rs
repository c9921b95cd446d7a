//! Interpretation of directory-index responses.

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::protocol::STREAM_INDEX_MIMETYPE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileEntry {
    pub name: String,
    /// Absolute path within the remote filesystem root.
    pub path: String,
    pub kind: EntryKind,
}

impl RemoteFileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Result of listing a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    /// The path is a directory; its direct children as the server sent them.
    Directory(Vec<RemoteFileEntry>),
    /// The server answered with file content, so the path names a single file.
    File(RemoteFileEntry),
}

impl Listing {
    pub fn entries(&self) -> &[RemoteFileEntry] {
        match self {
            Listing::Directory(entries) => entries,
            Listing::File(entry) => std::slice::from_ref(entry),
        }
    }

    pub fn into_entries(self) -> Vec<RemoteFileEntry> {
        match self {
            Listing::Directory(entries) => entries,
            Listing::File(entry) => vec![entry],
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Listing::Directory(_))
    }
}

/// Entry for a path that turned out to be a plain file.
pub fn single_file_entry(path: &str) -> RemoteFileEntry {
    let name = match path.rfind('/') {
        Some(index) => &path[index + 1..],
        None => path,
    };
    RemoteFileEntry {
        name: name.to_string(),
        path: path.to_string(),
        kind: EntryKind::File,
    }
}

/// Turn a directory index (a JSON object of absolute path -> MIME type) into
/// the entries lying under `path`. Keys without `path` as a strict prefix are
/// dropped; no recursion happens here.
pub fn entries_from_index(path: &str, index: &Value) -> Result<Vec<RemoteFileEntry>> {
    let Value::Object(mimetypes) = index else {
        return Err(AppError::TransferError(format!(
            "directory index for '{path}' is not a JSON object"
        )));
    };

    let skip_separator = !path.ends_with('/');
    let mut entries = Vec::with_capacity(mimetypes.len());

    for (child, mimetype) in mimetypes {
        let Some(rest) = child.strip_prefix(path) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }

        let name = if skip_separator {
            let mut chars = rest.chars();
            chars.next();
            chars.as_str()
        } else {
            rest
        };

        let kind = if mimetype.as_str() == Some(STREAM_INDEX_MIMETYPE) {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        entries.push(RemoteFileEntry {
            name: name.to_string(),
            path: child.clone(),
            kind,
        });
    }

    Ok(entries)
}
