//! Common test fixtures and helpers
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::{DeterministicEmbedder, TestJournal};
//! ```
//!
//! Not every binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use mnemo::config::DataPaths;
use mnemo::embedding::{EmbeddingError, TextEmbedder};
use mnemo::record::JournalRecord;
use mnemo::store::Store;

/// A journal corpus in a temp directory with the canonical layout.
///
/// The temp dir lives as long as the fixture, so every path in `paths`
/// stays valid for the duration of a test.
pub struct TestJournal {
    pub paths: DataPaths,
    pub store: Store,
    _dir: TempDir,
}

impl TestJournal {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let paths = DataPaths::new(dir.path().join(".mnemo"));
        let store = Store::open(&paths.records);
        Self {
            paths,
            store,
            _dir: dir,
        }
    }

    /// Append a dated voice record.
    pub fn add(&self, id: &str, date: Option<&str>, content: &str) {
        self.store
            .append(record(id, date, content))
            .expect("Failed to append record");
    }
}

/// Build a voice record with sensible defaults.
pub fn record(id: &str, date: Option<&str>, content: &str) -> JournalRecord {
    JournalRecord {
        id: id.into(),
        source: "voice".into(),
        date: date.map(String::from),
        time: Some("09:30".into()),
        content: content.into(),
        conversation_id: None,
        user_id: None,
    }
}

/// Deterministic embedder: texts map to 8-dim vectors by hashing their
/// chars, so identical texts collide exactly and unrelated texts land far
/// apart. No network, no model.
pub struct DeterministicEmbedder {
    calls: AtomicUsize,
}

impl DeterministicEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    /// How many embeddings were actually computed (cache-free).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl TextEmbedder for DeterministicEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut v = vec![0.0f32; 8];
        for (i, c) in text.chars().enumerate() {
            let slot = (c as usize).wrapping_mul(31).wrapping_add(i) % 8;
            v[slot] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Embedder that fails every call, for catastrophic-failure paths.
pub struct FailingEmbedder;

impl TextEmbedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::RetriesExhausted {
            attempts: 3,
            last_error: "connection refused".into(),
        })
    }
}
