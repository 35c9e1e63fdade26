//! HTTP surface of the retrieval core
//!
//! A single axum server hosting ingest, retrieval, chat, and rebuild
//! coordination. The mutable state is narrow by design: the record store,
//! the dirty flag, the status record, and the `(index, metadata)` snapshot
//! pointer — each with one designated writer. Handlers do blocking work on
//! the blocking pool and never hold a lock across an await.

mod routes;
mod supervisor;

pub use supervisor::{RebuildJob, Supervisor, DEFAULT_REBUILD_TIMEOUT, DEFAULT_TICK_INTERVAL};

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, DataPaths};
use crate::embedding::EmbeddingClient;
use crate::llm::ChatClient;
use crate::retriever::Snapshot;
use crate::status::{DirtyFlag, IndexStatus, StatusFile};
use crate::store::Store;

/// Server configuration assembled by the CLI.
pub struct ServeOptions {
    pub data_dir: PathBuf,
    pub bind: String,
    pub port: u16,
    /// Bearer key protecting the HTTP surface (not the remote API key)
    pub api_key: Option<String>,
    pub allow_network_bind: bool,
    pub rebuild_timeout: Duration,
    pub tick_interval: Duration,
}

/// State shared between handlers and the rebuild supervisor.
#[derive(Clone)]
pub(crate) struct Shared {
    pub paths: DataPaths,
    pub store: Arc<Store>,
    /// Published `(index, metadata)` pair; replaced wholesale, never mutated
    pub snapshot: Arc<RwLock<Arc<Snapshot>>>,
    /// False when the on-disk pair failed validation; retrieval refuses
    pub snapshot_healthy: Arc<AtomicBool>,
    pub status: StatusFile,
    pub dirty: DirtyFlag,
    pub embedder: Option<Arc<EmbeddingClient>>,
    pub chat: Option<Arc<ChatClient>>,
}

impl Shared {
    /// Current snapshot reference. The read lock is held only for the clone.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

pub(crate) struct AppState {
    pub shared: Shared,
    pub supervisor: Supervisor,
    pub api_key: Option<String>,
}

/// Start the HTTP server. Blocks until ctrl-c.
pub fn serve(config: &Config, options: ServeOptions) -> Result<()> {
    let is_localhost =
        options.bind == "127.0.0.1" || options.bind == "localhost" || options.bind == "::1";
    if !is_localhost && !options.allow_network_bind {
        bail!(
            "Binding to '{}' would expose your journal to the network.\n\
             If this is intentional, add --dangerously-allow-network-bind",
            options.bind
        );
    }
    if !is_localhost && options.api_key.is_none() {
        bail!("An API key (--api-key) is required for non-localhost binds.");
    }

    let paths = DataPaths::new(&options.data_dir);
    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("Failed to create {}", paths.root.display()))?;

    let status = StatusFile::new(&paths.status);
    let (snapshot, healthy) = match Snapshot::load(&paths) {
        Ok(s) => {
            tracing::info!(vectors = s.ntotal(), "Retrieval snapshot loaded");
            (s, true)
        }
        Err(e) => {
            tracing::error!(error = %e, "Snapshot failed to load; retrieval disabled until rebuild");
            let _ = status.write(&IndexStatus::failed(format!("index failed to load: {}", e)));
            (Snapshot::empty(), false)
        }
    };

    let remote_key = crate::config::api_key();
    if remote_key.is_none() {
        tracing::warn!("EMBEDDING_API_KEY not set; retrieval and chat are disabled");
    }
    let embedder = remote_key
        .as_deref()
        .map(|key| {
            EmbeddingClient::new(&config.api_base(), key, &config.embedding_model()).map(Arc::new)
        })
        .transpose()?;
    let chat = remote_key
        .as_deref()
        .map(|key| ChatClient::new(&config.api_base(), key, &config.chat_model()).map(Arc::new))
        .transpose()?;

    let shared = Shared {
        store: Arc::new(Store::open(&paths.records)),
        snapshot: Arc::new(RwLock::new(Arc::new(snapshot))),
        snapshot_healthy: Arc::new(AtomicBool::new(healthy)),
        status,
        dirty: DirtyFlag::new(&paths.dirty_flag),
        embedder,
        chat,
        paths,
    };

    let addr = format!("{}:{}", options.bind, options.port);
    eprintln!("mnemo listening on http://{}", addr);
    if options.api_key.is_some() {
        eprintln!("Authentication: API key required (Authorization: Bearer <key>)");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let supervisor =
            Supervisor::spawn(shared.clone(), options.rebuild_timeout, options.tick_interval);

        // Ingests that happened while the server was down are reconciled on
        // startup by honoring a leftover dirty flag.
        if shared.dirty.is_set() {
            tracing::info!("Dirty flag set at startup, scheduling incremental index");
            supervisor.submit(RebuildJob::Incremental);
        }

        let state = Arc::new(AppState {
            shared,
            supervisor,
            api_key: options.api_key,
        });

        let middleware = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(1024 * 1024));

        let app = Router::new()
            .route("/records", post(routes::ingest))
            .route("/records/{id}", delete(routes::delete_record))
            .route("/retrieve", post(routes::retrieve))
            .route("/chat", post(routes::chat))
            .route("/rebuild-index", post(routes::rebuild_index))
            .route("/index-status", get(routes::index_status))
            .route("/health", get(routes::health))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                require_api_key,
            ))
            .layer(middleware)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let shutdown = async {
            tokio::signal::ctrl_c().await.ok();
            eprintln!("\nShutting down...");
        };
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok::<_, anyhow::Error>(())
    })
}

/// Bearer-token check in constant time. No configured key means open
/// localhost access.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or("");

    let valid = provided.len() == expected.len()
        && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()));
    if valid {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "invalid or missing API key" })),
        )
            .into_response()
    }
}
