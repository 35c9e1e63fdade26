//! Embedding client (C1)
//!
//! Single-text embedding against an OpenAI-compatible `/v1/embeddings`
//! endpoint. Exactly one remote model with a fixed output dimension: the
//! first dimension seen is pinned and later mismatches are rejected.
//! Responses are cached in a bounded LRU keyed on `blake3(model ":" text)`.
//!
//! Transient failures (connect errors, 429, 5xx) retry with exponential
//! backoff and jitter; the caller decides whether an exhausted retry aborts
//! the batch or skips the item.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use once_cell::sync::OnceCell;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

/// Default model recorded in the environment contract.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Bounded cache size.
pub const DEFAULT_CACHE_SIZE: usize = 1000;
/// Retry attempts for idempotent failures.
const MAX_ATTEMPTS: u32 = 3;
/// Per-call timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("Embedding API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Unexpected embedding response shape: {0}")]
    Malformed(String),
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Cannot embed empty text")]
    EmptyText,
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Cache counters, exposed for stats output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Seam between the remote client and the components that consume vectors.
///
/// The indexers and the retriever only need "text in, vector out"; tests
/// supply deterministic embedders so no network is involved.
pub trait TextEmbedder: Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

impl TextEmbedder for EmbeddingClient {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        EmbeddingClient::embed(self, text)
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for the remote embedding endpoint.
pub struct EmbeddingClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    cache: Mutex<LruCache<[u8; 32], Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    /// First-seen output dimension; later responses must match
    dim: OnceCell<usize>,
    retry_base: Duration,
}

impl EmbeddingClient {
    /// Create a client against `{base_url}/v1/embeddings`.
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, EmbeddingError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::Client(e.to_string()))?;
        let capacity = NonZeroUsize::new(DEFAULT_CACHE_SIZE).expect("cache size is non-zero");
        Ok(Self {
            http,
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            dim: OnceCell::new(),
            retry_base: Duration::from_secs(1),
        })
    }

    /// Override the backoff base (tests use a few milliseconds).
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Pinned output dimension, once at least one embedding has been seen.
    pub fn dimension(&self) -> Option<usize> {
        self.dim.get().copied()
    }

    /// Embed one text, consulting the cache first.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }

        let key = cache_key(&self.model, text);
        {
            let mut cache = lock_cache(&self.cache);
            if let Some(hit) = cache.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(text_chars = text.chars().count(), "Embedding cache hit");
                return Ok(hit.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let vector = self.fetch(text)?;

        let expected = *self.dim.get_or_init(|| vector.len());
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        lock_cache(&self.cache).put(key, vector.clone());
        Ok(vector)
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = lock_cache(&self.cache);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: cache.len(),
            capacity: cache.cap().get(),
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    pub fn clear_cache(&self) {
        lock_cache(&self.cache).clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// One embedding call with retry. Retryable: transport errors, 429, 5xx.
    fn fetch(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let _span = tracing::debug_span!("embed", chars = text.chars().count()).entered();
        let body = serde_json::json!({ "input": [text], "model": self.model });

        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = self.retry_base * 2u32.pow(attempt - 1)
                    + Duration::from_millis(rand::thread_rng().gen_range(0..250));
                tracing::debug!(attempt, ?backoff, "Retrying embedding request");
                std::thread::sleep(backoff);
            }

            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return parse_embedding(resp);
                    }
                    let body = resp.text().unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_error = format!("{}: {}", status, truncate(&body, 200));
                        continue;
                    }
                    return Err(EmbeddingError::Api {
                        status: status.as_u16(),
                        body: truncate(&body, 500),
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            }
        }

        Err(EmbeddingError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            last_error,
        })
    }
}

fn parse_embedding(resp: reqwest::blocking::Response) -> Result<Vec<f32>, EmbeddingError> {
    let parsed: EmbeddingResponse = resp
        .json()
        .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
    let vector = parsed
        .data
        .into_iter()
        .next()
        .ok_or_else(|| EmbeddingError::Malformed("empty data array".into()))?
        .embedding;
    if vector.is_empty() {
        return Err(EmbeddingError::Malformed("zero-length embedding".into()));
    }
    Ok(vector)
}

fn cache_key(model: &str, text: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    *hasher.finalize().as_bytes()
}

fn lock_cache(
    cache: &Mutex<LruCache<[u8; 32], Vec<f32>>>,
) -> std::sync::MutexGuard<'_, LruCache<[u8; 32], Vec<f32>>> {
    cache.lock().unwrap_or_else(|p| p.into_inner())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
