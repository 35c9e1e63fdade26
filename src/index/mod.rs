//! Flat L2 vector index (C3)
//!
//! Exact squared-L2 nearest-neighbor search over a contiguous row-major
//! buffer. Position `i` in the index corresponds to position `i` in the
//! metadata list; that parity is the retrieval core's central invariant, so
//! the index is exact and append-only — no graph structure, no reordering.
//!
//! A published index is immutable to readers: rebuilds construct a fresh
//! index and swap it in behind an `Arc`, so searches always run against a
//! consistent snapshot.

mod persist;

use std::collections::BinaryHeap;

use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Vector index not found at {0}")]
    NotFound(String),
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Vector dimension must be non-zero")]
    ZeroDimension,
    #[error("Corrupt index file: {0}")]
    Corrupt(String),
    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}. Index may be corrupted.")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },
}

/// Exact L2 flat index.
#[derive(Debug)]
pub struct FlatIndex {
    dim: usize,
    /// Row-major vector data, `ntotal * dim` floats
    data: Vec<f32>,
}

/// Wrapper for f32 that implements Ord for use in BinaryHeap.
/// Uses total_cmp for consistent ordering (NaN sorts to the end).
#[derive(Clone, Copy, PartialEq)]
struct OrderedFloat(f32);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl FlatIndex {
    /// Create an empty index of the given dimension.
    pub fn new(dim: usize) -> Result<Self, IndexError> {
        if dim == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self { dim, data: Vec::new() })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of vectors in the index.
    pub fn ntotal(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a batch of vectors. The index position of each appended vector
    /// becomes its metadata position.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        for v in vectors {
            if v.len() != self.dim {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dim,
                    actual: v.len(),
                });
            }
        }
        self.data.reserve(vectors.len() * self.dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// `k` nearest neighbors by squared L2 distance, ascending. Ties keep
    /// the lower index position first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let n = self.ntotal();
        if n == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let distances: Vec<f32> = self
            .data
            .par_chunks_exact(self.dim)
            .map(|row| squared_l2(row, query))
            .collect();

        // Bounded max-heap of the k smallest distances. Strict `<` on
        // eviction plus idx in the key gives first-indexed stability: at
        // equal distances the largest position sits on top and is evicted
        // first.
        let mut heap: BinaryHeap<(OrderedFloat, usize)> = BinaryHeap::with_capacity(k + 1);
        for (idx, &dist) in distances.iter().enumerate() {
            if heap.len() < k {
                heap.push((OrderedFloat(dist), idx));
            } else if let Some(&(worst, _)) = heap.peek() {
                if dist < worst.0 {
                    heap.pop();
                    heap.push((OrderedFloat(dist), idx));
                }
            }
        }

        let mut results: Vec<(usize, f32)> = heap
            .into_iter()
            .map(|(OrderedFloat(dist), idx)| (idx, dist))
            .collect();
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        Ok(results)
    }

    pub(crate) fn from_parts(dim: usize, data: Vec<f32>) -> Self {
        Self { dim, data }
    }

    pub(crate) fn raw_data(&self) -> &[f32] {
        &self.data
    }
}

/// Squared L2 distance between two rows.
/// Uses SIMD acceleration when available (2-4x faster on AVX2/NEON).
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    use simsimd::SpatialSimilarity;
    f32::sqeuclidean(a, b).unwrap_or_else(|| {
        // Fallback for unsupported architectures - accumulate in f64 for precision
        a.iter()
            .zip(b)
            .map(|(&x, &y)| {
                let d = (x as f64) - (y as f64);
                d * d
            })
            .sum::<f64>()
    }) as f32
}
