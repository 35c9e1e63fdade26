//! # mnemo - Personal Digital Memory
//!
//! Ingests short voice-transcribed journal entries, indexes them as
//! dense-vector embeddings, and answers natural-language questions by
//! retrieving relevant entries and grounding a chat model's answer in them.
//!
//! ## Features
//!
//! - **Hybrid retrieval**: keyword-exact scan as the trust anchor, dense
//!   L2 vector search for recall, date-range filtering, post-retrieval
//!   cleansing, and one-shot query relaxation
//! - **Smart chunking**: recursive character splitting with CJK sentence
//!   boundaries and overlapping windows, so a rare name in a long ramble
//!   stays findable
//! - **Incremental indexing**: only unseen chunks are embedded; full
//!   rebuilds run as a supervised child process with progress reporting
//! - **ReAct agent**: a typed `ACTION: SEARCH` text protocol between the
//!   chat model and the retriever — no tool-calling dependency
//!
//! ## Quick Start
//!
//! ```no_run
//! use mnemo::config::DataPaths;
//! use mnemo::embedding::EmbeddingClient;
//! use mnemo::retriever::{Retriever, Snapshot};
//!
//! # fn main() -> anyhow::Result<()> {
//! let paths = DataPaths::new(".mnemo");
//! let snapshot = Snapshot::load(&paths)?;
//! let embedder = EmbeddingClient::new(
//!     "https://api.openai.com",
//!     &std::env::var("EMBEDDING_API_KEY")?,
//!     "text-embedding-3-small",
//! )?;
//!
//! let retriever = Retriever::new(&snapshot, &embedder);
//! let hits = retriever.search("张三", Some("last_month"), 5, chrono::Local::now().date_naive())?;
//! for hit in hits {
//!     println!("{} {}", hit.id, hit.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod datefilter;
pub mod embedding;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod record;
pub mod retriever;
pub mod server;
pub mod status;
pub mod store;

pub use agent::{parse_action, Agent, AgentOutcome, SearchAction};
pub use chunker::{split_record, split_text, CHUNK_OVERLAP, CHUNK_SIZE};
pub use config::{Config, DataPaths};
pub use embedding::{EmbeddingClient, EmbeddingError, TextEmbedder};
pub use index::{FlatIndex, IndexError};
pub use indexer::{IndexReport, Indexer, IndexerError, ProgressSink};
pub use llm::{ChatClient, ChatError, ChatMessage, ChatResponse};
pub use record::{JournalRecord, SubChunk};
pub use retriever::{Hit, HitOrigin, Retriever, RetrieverError, Snapshot, NO_RECORD_ENVELOPE};
pub use status::{DirtyFlag, IndexState, IndexStatus, StatusFile};
pub use store::{Store, StoreError};
