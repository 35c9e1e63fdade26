//! Index rebuild status and the dirty flag
//!
//! The status record is a small JSON file (`index_status.json`) describing
//! the current rebuild: state, percent progress, a human message, and a
//! timestamp. The dirty flag is a zero-byte sentinel file whose presence
//! means "the record log changed, the index is stale". Each has a single
//! designated writer at a time; both publish atomically.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::write_atomic;

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Status file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rebuild lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// The status record served by `GET /index-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub status: IndexState,
    /// Percent complete, 0..=100
    pub progress: u8,
    pub message: String,
    /// RFC 3339 local timestamp of the last transition
    pub timestamp: String,
}

impl IndexStatus {
    pub fn idle() -> Self {
        Self::make(IndexState::Idle, 0, "index is up to date")
    }

    pub fn running(progress: u8, message: impl Into<String>) -> Self {
        Self::make(IndexState::Running, progress.min(100), message)
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self::make(IndexState::Completed, 100, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::make(IndexState::Failed, 0, message)
    }

    fn make(status: IndexState, progress: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            progress,
            message: message.into(),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }
}

/// Handle to the on-disk status record.
#[derive(Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the current status; a missing or unreadable file reads as idle.
    pub fn load(&self) -> IndexStatus {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "Corrupt status file");
                IndexStatus::idle()
            }),
            Err(_) => IndexStatus::idle(),
        }
    }

    pub fn write(&self, status: &IndexStatus) -> Result<(), StatusError> {
        let json = serde_json::to_string_pretty(status)?;
        write_atomic(&self.path, json.as_bytes())?;
        Ok(())
    }
}

/// The `.reindex-needed` sentinel.
#[derive(Clone)]
pub struct DirtyFlag {
    path: PathBuf,
}

impl DirtyFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_set(&self) -> bool {
        self.path.exists()
    }

    pub fn set(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, b"")?;
        tracing::debug!(path = %self.path.display(), "Dirty flag set");
        Ok(())
    }

    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Dirty flag cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
