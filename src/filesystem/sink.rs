use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::info;

use crate::config::BridgeSettings;
use crate::error::{AppError, Result};

/// Local save side effect for downloaded files.
pub trait FileSink: Send + Sync {
    fn save(&self, name: &str, content: Bytes) -> Result<()>;
}

/// Saves downloads into a directory, never overwriting an existing file.
#[derive(Debug, Clone)]
pub struct DownloadDirectory {
    root: PathBuf,
}

impl DownloadDirectory {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The directory named by `download_dir`, or the platform default.
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::new(settings.resolved_download_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `name` would be written right now.
    pub fn target_path(&self, name: &str) -> Result<PathBuf> {
        let file_name = sanitize_name(name)?;
        let candidate = self.root.join(&file_name);
        if !candidate.exists() {
            return Ok(candidate);
        }

        let (stem, extension) = match file_name.rfind('.') {
            Some(dot) if dot > 0 => (&file_name[..dot], &file_name[dot..]),
            _ => (file_name.as_str(), ""),
        };
        let mut counter = 1u32;
        loop {
            let candidate = self.root.join(format!("{stem} ({counter}){extension}"));
            if !candidate.exists() {
                return Ok(candidate);
            }
            counter += 1;
        }
    }
}

impl FileSink for DownloadDirectory {
    fn save(&self, name: &str, content: Bytes) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.target_path(name)?;
        std::fs::write(&path, &content)?;
        info!("Saved {} bytes to {}", content.len(), path.display());
        Ok(())
    }
}

/// Reduce a remote entry name to a single safe path component.
fn sanitize_name(name: &str) -> Result<String> {
    let trimmed = name.trim_end_matches('/');
    let last = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    if last.is_empty() || last == "." || last == ".." {
        return Err(AppError::ValidationError(format!(
            "'{name}' is not a valid file name"
        )));
    }
    Ok(last.to_string())
}
