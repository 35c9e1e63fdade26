//! Request handlers for the retrieval core's HTTP surface

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::indexer;
use crate::record::{generate_id, JournalRecord, SOURCE_VOICE};
use crate::retriever::{Hit, Retriever};
use crate::status::IndexState;
use crate::store::{write_atomic, StoreError};

use super::{AppState, RebuildJob};

/// Default retrieval depth for `/retrieve`.
const DEFAULT_MAX_RESULTS: usize = 10;

#[derive(Deserialize)]
pub(super) struct IngestRequest {
    content: String,
    date: Option<String>,
    time: Option<String>,
}

#[derive(Serialize)]
pub(super) struct IngestResponse {
    record: JournalRecord,
}

#[derive(Deserialize)]
pub(super) struct RetrieveRequest {
    query: String,
    date_filter: Option<String>,
    max_results: Option<usize>,
}

#[derive(Serialize)]
pub(super) struct RetrieveResponse {
    results: Vec<Hit>,
}

#[derive(Deserialize)]
pub(super) struct ChatRequest {
    message: String,
    #[allow(dead_code)] // conversation persistence lives outside the core
    session_id: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ChatResponse {
    response: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// `POST /records` — append a journal entry, mark the index stale, and
/// queue an incremental job. The response is sent once the append is
/// durable; indexing catches up in the background.
pub(super) async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Response {
    let shared = state.shared.clone();
    let result = tokio::task::spawn_blocking(move || {
        let now = Local::now();
        // Concurrent ingests in the same second can race between picking an
        // ID and appending; the append's duplicate check is authoritative,
        // so retry with a fresh suffix.
        let mut attempts = 0;
        let record = loop {
            let record = JournalRecord {
                id: shared.store.unique_id(&generate_id(now))?,
                source: SOURCE_VOICE.to_string(),
                date: request
                    .date
                    .clone()
                    .or_else(|| Some(now.format("%Y-%m-%d").to_string())),
                time: request
                    .time
                    .clone()
                    .or_else(|| Some(now.format("%H:%M").to_string())),
                content: request.content.trim().to_string(),
                conversation_id: None,
                user_id: None,
            };
            match shared.store.append(record.clone()) {
                Ok(()) => break record,
                Err(StoreError::DuplicateId(_)) if attempts < 3 => {
                    attempts += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        };
        shared.dirty.set()?;
        Ok::<_, StoreError>(record)
    })
    .await;

    match result {
        Ok(Ok(record)) => {
            state.supervisor.submit(RebuildJob::Incremental);
            (StatusCode::CREATED, Json(IngestResponse { record })).into_response()
        }
        Ok(Err(e @ (StoreError::EmptyContent | StoreError::InvalidDate(_)))) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Ingest failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Ingest task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// `DELETE /records/{id}` — remove a record, prune its sub-chunk IDs from
/// the indexed-IDs set, and schedule the full rebuild that reconciles the
/// index.
pub(super) async fn delete_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let shared = state.shared.clone();
    let result = tokio::task::spawn_blocking(move || {
        let removed = shared.store.delete(&[id.clone()])?;
        if removed > 0 {
            prune_indexed_ids(&shared.paths.indexed_ids, &id)?;
            shared.dirty.set()?;
        }
        Ok::<_, StoreError>(removed)
    })
    .await;

    match result {
        Ok(Ok(0)) => error_response(StatusCode::NOT_FOUND, "no record with that id"),
        Ok(Ok(removed)) => {
            state.supervisor.submit(RebuildJob::Full);
            Json(serde_json::json!({ "success": true, "removed": removed })).into_response()
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Delete failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Delete task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// `POST /retrieve` — hybrid search over the current snapshot.
pub(super) async fn retrieve(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RetrieveRequest>,
) -> Response {
    if request.query.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "query must not be empty");
    }
    if !state.shared.snapshot_healthy.load(Ordering::Acquire) {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "index/metadata mismatch on disk; run a rebuild",
        );
    }
    let Some(embedder) = state.shared.embedder.clone() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "EMBEDDING_API_KEY not configured",
        );
    };

    let snapshot = state.shared.snapshot();
    let k = request.max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1);
    let result = tokio::task::spawn_blocking(move || {
        let retriever = Retriever::new(&snapshot, embedder.as_ref());
        retriever.search(
            &request.query,
            request.date_filter.as_deref(),
            k,
            Local::now().date_naive(),
        )
    })
    .await;

    match result {
        Ok(Ok(results)) => Json(RetrieveResponse { results }).into_response(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Retrieval failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Retrieve task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// `POST /chat` — one agent turn. Failures come back as a polite message
/// with `success: false` rather than an HTTP error, matching the
/// conversational surface.
pub(super) async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message must not be empty");
    }
    let (Some(embedder), Some(chat)) = (state.shared.embedder.clone(), state.shared.chat.clone())
    else {
        return Json(ChatResponse {
            response: "记忆助手未配置（缺少 EMBEDDING_API_KEY），暂时无法回答。".into(),
            success: false,
            error: Some("EMBEDDING_API_KEY not configured".into()),
        })
        .into_response();
    };

    let snapshot = state.shared.snapshot();
    let result = tokio::task::spawn_blocking(move || {
        let agent = Agent::new(chat.as_ref(), &snapshot, embedder.as_ref());
        agent.answer(&request.message, &[], Local::now().date_naive())
    })
    .await;

    match result {
        Ok(Ok(outcome)) => Json(ChatResponse {
            response: outcome.answer,
            success: true,
            error: None,
        })
        .into_response(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Chat failed");
            Json(ChatResponse {
                response: "抱歉，暂时无法访问语言模型，请稍后再试。".into(),
                success: false,
                error: Some(e.to_string()),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Chat task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// `POST /rebuild-index` — manual full rebuild; idempotent while running.
pub(super) async fn rebuild_index(State(state): State<Arc<AppState>>) -> Response {
    let running = state.supervisor.is_running()
        || state.shared.status.load().status == IndexState::Running;
    if running {
        return Json(serde_json::json!({
            "success": false,
            "message": "rebuild already running",
        }))
        .into_response();
    }

    if let Err(e) = state.shared.dirty.set() {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    state.supervisor.submit(RebuildJob::Full);
    Json(serde_json::json!({
        "success": true,
        "message": "full rebuild scheduled",
    }))
    .into_response()
}

/// `GET /index-status` — the status record as stored.
pub(super) async fn index_status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.shared.status.load()).into_response()
}

/// `GET /health` — liveness plus corpus counters.
pub(super) async fn health(State(state): State<Arc<AppState>>) -> Response {
    let store = state.shared.store.clone();
    let records = tokio::task::spawn_blocking(move || store.count().unwrap_or(0))
        .await
        .unwrap_or(0);
    let snapshot = state.shared.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "records": records,
        "vectors": snapshot.ntotal(),
        "dirty": state.shared.dirty.is_set(),
        "retrieval_enabled": state.shared.embedder.is_some(),
    }))
    .into_response()
}

/// Drop a deleted record's sub-chunk IDs (`{id}` and `{id}_part_*`) from
/// the indexed-IDs set so a later incremental run cannot resurrect them.
fn prune_indexed_ids(path: &std::path::Path, record_id: &str) -> Result<(), StoreError> {
    let mut ids = indexer::load_indexed_ids(path);
    let part_prefix = format!("{}_part_", record_id);
    let before = ids.len();
    ids.retain(|id| id != record_id && !id.starts_with(&part_prefix));
    if ids.len() != before {
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();
        let json = serde_json::to_string_pretty(&sorted)?;
        write_atomic(path, json.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_prune_indexed_ids_removes_parts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("indexed_ids.json");
        let ids = vec![
            "voice_a".to_string(),
            "voice_a_part_0".to_string(),
            "voice_a_part_1".to_string(),
            "voice_b".to_string(),
        ];
        std::fs::write(&path, serde_json::to_string(&ids).unwrap()).unwrap();

        prune_indexed_ids(&path, "voice_a").unwrap();

        let left: HashSet<String> = indexer::load_indexed_ids(&path);
        assert_eq!(left, HashSet::from(["voice_b".to_string()]));
    }

    #[test]
    fn test_prune_indexed_ids_leaves_similar_prefixes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("indexed_ids.json");
        let ids = vec!["voice_a".to_string(), "voice_ab".to_string()];
        std::fs::write(&path, serde_json::to_string(&ids).unwrap()).unwrap();

        prune_indexed_ids(&path, "voice_a").unwrap();

        let left: HashSet<String> = indexer::load_indexed_ids(&path);
        assert_eq!(left, HashSet::from(["voice_ab".to_string()]));
    }
}
