//! Chunk store — the append-only record log (C2)
//!
//! An ordered JSON array of [`JournalRecord`]s on disk, UTF-8. The store is
//! the only component that mutates the record file; every write rewrites the
//! whole file atomically (write-temp, then rename) under a process-wide
//! mutex. Readers load a consistent snapshot of the full log.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::record::{is_valid_date, JournalRecord};

/// Serializes all record-file writers in this process. The file itself is
/// only ever replaced via rename, so readers see either the old or the new
/// complete log.
static WRITE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Record file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Duplicate record id: {0}")]
    DuplicateId(String),
    #[error("Record content must not be empty")]
    EmptyContent,
    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("No record with id: {0}")]
    NotFound(String),
}

/// Handle to the on-disk record log.
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open a store at the given record-file path. The file is created on
    /// first append; a missing file reads as an empty log.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records in insertion order.
    pub fn load(&self) -> Result<Vec<JournalRecord>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of records in the log.
    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.load()?.len())
    }

    /// Append a record. Rejects empty content, malformed dates, and
    /// duplicate IDs; on success the new log is durable before returning.
    pub fn append(&self, record: JournalRecord) -> Result<(), StoreError> {
        validate(&record)?;
        let _guard = write_guard();
        let mut records = self.load()?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        records.push(record);
        self.write(&records)
    }

    /// Pick an ID that is free in the current log: `base` itself, or
    /// `base_2`, `base_3`, ... when entries land within the same second.
    pub fn unique_id(&self, base: &str) -> Result<String, StoreError> {
        let taken: HashSet<String> = self.load()?.into_iter().map(|r| r.id).collect();
        if !taken.contains(base) {
            return Ok(base.to_string());
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Replace the content of an existing record in place.
    pub fn update(&self, id: &str, content: &str) -> Result<(), StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        let _guard = write_guard();
        let mut records = self.load()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.content = content.to_string();
        self.write(&records)
    }

    /// Remove records by ID. Returns how many were removed; unknown IDs are
    /// ignored. The caller is responsible for pruning the indexed-IDs set
    /// and scheduling a rebuild.
    pub fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
        let _guard = write_guard();
        let mut records = self.load()?;
        let before = records.len();
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        records.retain(|r| !doomed.contains(r.id.as_str()));
        let removed = before - records.len();
        if removed > 0 {
            self.write(&records)?;
        }
        Ok(removed)
    }

    fn write(&self, records: &[JournalRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;
        write_atomic(&self.path, json.as_bytes())?;
        tracing::debug!(records = records.len(), path = %self.path.display(), "Record log written");
        Ok(())
    }
}

fn validate(record: &JournalRecord) -> Result<(), StoreError> {
    if record.content.trim().is_empty() {
        return Err(StoreError::EmptyContent);
    }
    if let Some(date) = &record.date {
        if !is_valid_date(date) {
            return Err(StoreError::InvalidDate(date.clone()));
        }
    }
    Ok(())
}

fn write_guard() -> MutexGuard<'static, ()> {
    WRITE_LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

/// Write-temp-then-rename publish. The temp file lives next to the target so
/// the rename stays on one filesystem.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}
