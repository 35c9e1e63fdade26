//! Full and incremental indexers (C6, C7)
//!
//! Full rebuild: read every record, split, embed in batches, build a fresh
//! index in memory, and only then publish index + metadata atomically. A
//! failed batch is logged and skipped; a run that embeds nothing leaves the
//! existing index untouched and reports failure.
//!
//! Incremental: embed only the sub-chunk IDs that are not yet in the
//! indexed-IDs set and append them to the loaded index. Bootstraps a fresh
//! index (dimension taken from the first embedding) when none exists.
//!
//! Both paths clear the dirty flag only after a successful publish.

use std::collections::HashSet;

use thiserror::Error;

use crate::chunker::split_record;
use crate::config::DataPaths;
use crate::embedding::{EmbeddingError, TextEmbedder};
use crate::index::{FlatIndex, IndexError};
use crate::record::{JournalRecord, SubChunk};
use crate::status::DirtyFlag;
use crate::store::{write_atomic, Store, StoreError};

/// Embedding batch size for full rebuilds.
pub const FULL_BATCH_SIZE: usize = 20;
/// Smaller batches for incremental runs, which ride on interactive traffic.
pub const INCREMENTAL_BATCH_SIZE: usize = 10;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Duplicate sub-chunk id: {0}")]
    DuplicateChunkId(String),
    #[error("No chunk could be embedded ({attempted} attempted); leaving existing index intact")]
    NothingEmbedded { attempted: usize },
    #[error("Indexing interrupted")]
    Interrupted,
}

/// Receives coarse progress checkpoints from an indexing run.
///
/// Interactive runs drive a progress bar and the status file; porcelain runs
/// print machine-parsable lines for the rebuild supervisor.
pub trait ProgressSink: Sync {
    fn report(&self, pct: u8, message: &str);

    /// Polled between batches; a true return aborts the run before the next
    /// batch, leaving the published index untouched.
    fn interrupted(&self) -> bool {
        false
    }
}

/// Sink that discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _pct: u8, _message: &str) {}
}

/// Outcome of an indexing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// Records considered
    pub records: usize,
    /// Sub-chunks produced (full) or newly discovered (incremental)
    pub chunks: usize,
    /// Sub-chunks embedded and added to the index
    pub embedded: usize,
    /// Sub-chunks skipped because their batch or embedding failed
    pub skipped: usize,
    /// Index size after the run
    pub ntotal: usize,
}

/// Splits every record with non-empty content into its sub-chunks, in
/// store order.
pub fn flatten(records: &[JournalRecord]) -> Vec<SubChunk> {
    records
        .iter()
        .filter(|r| !r.content.trim().is_empty())
        .flat_map(split_record)
        .collect()
}

/// Drives full and incremental index builds over one data directory.
pub struct Indexer<'a> {
    store: &'a Store,
    paths: &'a DataPaths,
    embedder: &'a dyn TextEmbedder,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a Store, paths: &'a DataPaths, embedder: &'a dyn TextEmbedder) -> Self {
        Self {
            store,
            paths,
            embedder,
        }
    }

    /// Rebuild the entire index from the record log.
    pub fn full_rebuild(&self, sink: &dyn ProgressSink) -> Result<IndexReport, IndexerError> {
        let _span = tracing::info_span!("full_rebuild").entered();
        sink.report(0, "loading records");

        let records = self.store.load()?;
        let chunks = flatten(&records);
        assert_unique_ids(&chunks)?;
        tracing::info!(records = records.len(), chunks = chunks.len(), "Full rebuild started");

        if chunks.is_empty() {
            // Empty corpus: publish the empty state and stand down
            sink.report(95, "saving");
            write_metadata(&self.paths.metadata, &[])?;
            write_indexed_ids(&self.paths.indexed_ids, &HashSet::new())?;
            remove_index_files(&self.paths.index);
            DirtyFlag::new(&self.paths.dirty_flag).clear()?;
            sink.report(100, "completed: empty corpus");
            return Ok(IndexReport {
                records: records.len(),
                chunks: 0,
                embedded: 0,
                skipped: 0,
                ntotal: 0,
            });
        }

        // Embed in batches; a failed batch is skipped, not fatal
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        let mut metadata: Vec<SubChunk> = Vec::with_capacity(chunks.len());
        let mut skipped = 0usize;
        let total_batches = chunks.len().div_ceil(FULL_BATCH_SIZE);

        for (batch_no, batch) in chunks.chunks(FULL_BATCH_SIZE).enumerate() {
            if sink.interrupted() {
                return Err(IndexerError::Interrupted);
            }
            match self.embed_batch(batch) {
                Ok(batch_vectors) => {
                    vectors.extend(batch_vectors);
                    metadata.extend(batch.iter().cloned());
                }
                Err(e) => {
                    skipped += batch.len();
                    tracing::warn!(
                        batch = batch_no + 1,
                        size = batch.len(),
                        error = %e,
                        "Embedding batch failed, skipping"
                    );
                }
            }
            let pct = 5 + (80 * (batch_no + 1) / total_batches) as u8;
            sink.report(
                pct,
                &format!("embedding {}/{} chunks", metadata.len() + skipped, chunks.len()),
            );
        }

        if vectors.is_empty() {
            return Err(IndexerError::NothingEmbedded {
                attempted: chunks.len(),
            });
        }

        sink.report(90, "building index");
        let mut index = FlatIndex::new(vectors[0].len())?;
        index.add(&vectors)?;

        sink.report(95, "saving");
        index.save(&self.paths.index)?;
        write_metadata(&self.paths.metadata, &metadata)?;
        let indexed: HashSet<String> = metadata.iter().map(|c| c.id.clone()).collect();
        write_indexed_ids(&self.paths.indexed_ids, &indexed)?;
        DirtyFlag::new(&self.paths.dirty_flag).clear()?;

        let report = IndexReport {
            records: records.len(),
            chunks: chunks.len(),
            embedded: metadata.len(),
            skipped,
            ntotal: index.ntotal(),
        };
        sink.report(100, &format!("completed: {} vectors", report.ntotal));
        tracing::info!(?report, "Full rebuild complete");
        Ok(report)
    }

    /// Embed and append only sub-chunks whose IDs are not yet indexed.
    pub fn incremental(&self, sink: &dyn ProgressSink) -> Result<IndexReport, IndexerError> {
        let _span = tracing::info_span!("incremental_index").entered();
        sink.report(0, "loading index state");

        let records = self.store.load()?;
        let all_chunks = flatten(&records);
        assert_unique_ids(&all_chunks)?;

        let (index, mut metadata, mut indexed) = self.load_state();

        let new_chunks: Vec<&SubChunk> = all_chunks
            .iter()
            .filter(|c| !indexed.contains(&c.id))
            .collect();

        if new_chunks.is_empty() {
            DirtyFlag::new(&self.paths.dirty_flag).clear()?;
            sink.report(100, "completed: nothing new to index");
            return Ok(IndexReport {
                records: records.len(),
                chunks: 0,
                embedded: 0,
                skipped: 0,
                ntotal: index.as_ref().map(FlatIndex::ntotal).unwrap_or(0),
            });
        }
        tracing::info!(new = new_chunks.len(), total = all_chunks.len(), "Incremental index started");

        let mut added_vectors: Vec<Vec<f32>> = Vec::new();
        let mut added_chunks: Vec<SubChunk> = Vec::new();
        let mut skipped = 0usize;
        let total = new_chunks.len();

        for batch in new_chunks.chunks(INCREMENTAL_BATCH_SIZE) {
            if sink.interrupted() {
                return Err(IndexerError::Interrupted);
            }
            for chunk in batch {
                match self.embedder.embed(&chunk.content) {
                    Ok(vector) => {
                        added_vectors.push(vector);
                        added_chunks.push((*chunk).clone());
                    }
                    Err(e) => {
                        skipped += 1;
                        tracing::warn!(id = %chunk.id, error = %e, "Skipping chunk, embedding failed");
                    }
                }
            }
            let done = added_chunks.len() + skipped;
            sink.report(
                (5 + 85 * done / total) as u8,
                &format!("embedding {}/{} new chunks", done, total),
            );
        }

        if added_vectors.is_empty() {
            return Err(IndexerError::NothingEmbedded { attempted: total });
        }

        let mut index = match index {
            Some(existing) => existing,
            None => FlatIndex::new(added_vectors[0].len())?,
        };
        index.add(&added_vectors)?;
        for chunk in &added_chunks {
            indexed.insert(chunk.id.clone());
        }
        metadata.extend(added_chunks.iter().cloned());

        sink.report(95, "saving");
        index.save(&self.paths.index)?;
        write_metadata(&self.paths.metadata, &metadata)?;
        write_indexed_ids(&self.paths.indexed_ids, &indexed)?;
        DirtyFlag::new(&self.paths.dirty_flag).clear()?;

        let report = IndexReport {
            records: records.len(),
            chunks: total,
            embedded: added_chunks.len(),
            skipped,
            ntotal: index.ntotal(),
        };
        sink.report(100, &format!("completed: {} vectors", report.ntotal));
        tracing::info!(?report, "Incremental index complete");
        Ok(report)
    }

    /// Embed one full-rebuild batch; any failure fails the whole batch.
    fn embed_batch(&self, batch: &[SubChunk]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        batch
            .iter()
            .map(|chunk| self.embedder.embed(&chunk.content))
            .collect()
    }

    /// Load `(index, metadata, indexed_ids)` for an incremental run.
    ///
    /// Any inconsistency (missing or corrupt files, a metadata list whose
    /// length disagrees with the index) resets to the empty state so that
    /// everything is re-embedded rather than silently misaligned.
    fn load_state(&self) -> (Option<FlatIndex>, Vec<SubChunk>, HashSet<String>) {
        let index = match FlatIndex::load(&self.paths.index) {
            Ok(i) => Some(i),
            Err(IndexError::NotFound(_)) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Existing index unreadable, rebuilding from scratch");
                return (None, Vec::new(), HashSet::new());
            }
        };

        let metadata: Vec<SubChunk> = match std::fs::read_to_string(&self.paths.metadata) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Metadata unreadable, rebuilding from scratch");
                    return (None, Vec::new(), HashSet::new());
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Metadata unreadable, rebuilding from scratch");
                return (None, Vec::new(), HashSet::new());
            }
        };

        let ntotal = index.as_ref().map(FlatIndex::ntotal).unwrap_or(0);
        if ntotal != metadata.len() {
            tracing::warn!(
                ntotal,
                metadata = metadata.len(),
                "Index/metadata size mismatch, rebuilding from scratch"
            );
            return (None, Vec::new(), HashSet::new());
        }

        let mut indexed = load_indexed_ids(&self.paths.indexed_ids);
        // The metadata list is authoritative for what is in the index; the
        // indexed-IDs set must be a superset of it.
        for chunk in &metadata {
            indexed.insert(chunk.id.clone());
        }
        (index, metadata, indexed)
    }
}

fn assert_unique_ids(chunks: &[SubChunk]) -> Result<(), IndexerError> {
    let mut seen = HashSet::with_capacity(chunks.len());
    for chunk in chunks {
        if !seen.insert(chunk.id.as_str()) {
            return Err(IndexerError::DuplicateChunkId(chunk.id.clone()));
        }
    }
    Ok(())
}

fn write_metadata(path: &std::path::Path, metadata: &[SubChunk]) -> Result<(), IndexerError> {
    let json = serde_json::to_string_pretty(metadata)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

fn write_indexed_ids(
    path: &std::path::Path,
    indexed: &HashSet<String>,
) -> Result<(), IndexerError> {
    let mut ids: Vec<&String> = indexed.iter().collect();
    ids.sort();
    let json = serde_json::to_string_pretty(&ids)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

/// Missing or corrupt indexed-IDs read as empty, which just means
/// re-embedding more than strictly necessary.
pub fn load_indexed_ids(path: &std::path::Path) -> HashSet<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Indexed-IDs file unreadable, treating as empty");
            HashSet::new()
        }),
        Err(_) => HashSet::new(),
    }
}

fn remove_index_files(index_path: &std::path::Path) {
    let checksum = index_path.with_file_name(format!(
        "{}.checksum",
        index_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    let _ = std::fs::remove_file(index_path);
    let _ = std::fs::remove_file(checksum);
}
