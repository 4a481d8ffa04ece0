use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::version_vector::VersionVector;
use crate::routes::auth_extractor::AuthUser;
use crate::services::reconciliation;
use crate::state::AppState;
use crate::ws::push::PushFrame;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload/initiate", post(initiate))
        .route("/upload/{session_id}/chunk/{index}", post(upload_chunk))
        .route("/upload/{session_id}/status", get(status))
        .route("/upload/{session_id}", axum::routing::delete(cancel))
        .route("/upload/sessions", get(list_sessions))
        .route("/{file_id}/download-chunked", get(download_chunked))
}

#[derive(Deserialize)]
struct InitiateRequest {
    path: String,
    total_size: u64,
    #[serde(default)]
    base_version_vector: Option<serde_json::Value>,
    client_id: String,
}

#[derive(Serialize)]
struct InitiateResponse {
    session_id: String,
    chunk_size: u64,
    total_chunks: i64,
}

async fn initiate(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(body): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>, AppError> {
    let base_vv = match body.base_version_vector {
        Some(ref v) => VersionVector::from_json(v).map_err(|e| AppError::BadRequest(e.to_string()))?,
        None => VersionVector::new(),
    };

    let session = state
        .chunks
        .initiate(
            &_user.user_id,
            &body.path,
            body.total_size,
            state.config.chunk_size,
            &base_vv,
            &body.client_id,
        )
        .await?;

    Ok(Json(InitiateResponse {
        session_id: session.id,
        chunk_size: session.chunk_size as u64,
        total_chunks: session.total_chunks,
    }))
}

async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    AxumPath((session_id, index)): AxumPath<(String, u64)>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = state.chunks.upload_chunk(&session_id, index, &body).await?;

    if status.received_chunks.len() as u64 == status.total_chunks {
        assemble_and_finalize(&state, &session_id).await?;
    }

    Ok(Json(serde_json::json!({
        "receivedChunks": status.received_chunks,
        "totalChunks": status.total_chunks,
        "complete": status.received_chunks.len() as u64 == status.total_chunks,
    })))
}

/// Once every chunk has arrived, the assembled blob is already sitting
/// contiguous on disk (each chunk was written at its byte offset), so
/// finalizing just means reading it back to compute the checksum and
/// running it through the same reconciliation path a simple upload takes.
async fn assemble_and_finalize(state: &Arc<AppState>, session_id: &str) -> Result<(), AppError> {
    let db = state.db.clone();
    let sid = session_id.to_string();
    let session = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        crate::models::chunk_session::find_by_id(&conn, &sid)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?
    .ok_or_else(|| AppError::SessionMissing(session_id.to_string()))?;

    let storage_path = state
        .chunks
        .storage_path(session_id)
        .ok_or_else(|| AppError::SessionMissing(session_id.to_string()))?;

    let data = state.store.get(&storage_path).await.map_err(AppError::Internal)?;
    let base_vv = VersionVector::from_json(&serde_json::from_str(&session.base_version_vector).map_err(|e| AppError::Internal(e.into()))?)
        .map_err(|e| AppError::Internal(e.into()))?;

    let outcome = reconciliation::upload_with_version_vector(
        &state.db,
        &state.store,
        &session.user_id,
        &session.path,
        &base_vv,
        &session.client_id,
        data,
    )
    .await?;

    state.chunks.mark_completed(session_id).await?;
    let _ = state.store.delete(&storage_path).await;

    state.push.notify(
        &session.user_id,
        PushFrame::Message {
            event_type: if outcome.conflicting { "CONFLICT".into() } else { "UPLOAD".into() },
            path: session.path.clone(),
            version_vector: outcome.version_vector.to_json(),
            originating_client_id: session.client_id.clone(),
        },
    );

    Ok(())
}

async fn status(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    AxumPath(session_id): AxumPath<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = state.chunks.status(&session_id).await?;
    Ok(Json(serde_json::json!({
        "sessionId": status.session_id,
        "receivedChunks": status.received_chunks,
        "totalChunks": status.total_chunks,
        "status": status.status,
    })))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    AxumPath(session_id): AxumPath<String>,
) -> Result<axum::http::StatusCode, AppError> {
    state.chunks.cancel(&session_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<serde_json::Value>>, AppError> {
    let sessions = state.chunks.list_active(&user.user_id).await?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| {
                serde_json::json!({
                    "sessionId": s.id,
                    "path": s.path,
                    "totalSize": s.total_size,
                    "status": s.status,
                })
            })
            .collect(),
    ))
}

/// Ranged download for large files — the counterpart to chunked upload.
/// Honors a standard `Range: bytes=start-end` request header and replies
/// `206 Partial Content` with `Content-Range`, same as any HTTP range
/// server; a request with no `Range` header gets the whole file back.
async fn download_chunked(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    AxumPath(file_id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let db = state.db.clone();
    let fid = file_id.clone();
    let record = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        crate::models::file_record::find_by_id(&conn, &fid)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?
    .ok_or_else(|| AppError::NotFound("file not found".into()))?;

    if record.user_id != user.user_id {
        return Err(AppError::NotFound("file not found".into()));
    }

    let db = state.db.clone();
    let fid = record.id.clone();
    let latest = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        crate::models::file_version::find_latest(&conn, &fid)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?
    .ok_or_else(|| AppError::NotFound("no version found for file".into()))?;

    let data = state
        .store
        .get(std::path::Path::new(&latest.storage_path))
        .await
        .map_err(AppError::Internal)?;

    let total = data.len() as u64;
    let (start, end) = match headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(spec) => parse_range(spec, total)
            .ok_or_else(|| AppError::BadRequest(format!("malformed Range header: {spec}")))?,
        None => (0, total.saturating_sub(1)),
    };
    if total == 0 || start > end || end >= total {
        return Err(AppError::BadRequest("range not satisfiable".into()));
    }

    let body = data[start as usize..=end as usize].to_vec();
    let mut response = (StatusCode::PARTIAL_CONTENT, Bytes::from(body)).into_response();
    let h = response.headers_mut();
    h.insert(
        axum::http::header::CONTENT_RANGE,
        HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")).unwrap(),
    );
    h.insert(axum::http::header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    Ok(response)
}

/// Parses a single-range `bytes=start-end` spec (`start-`, `-suffix_len`,
/// and `start-end` forms), clamping `end` to the last valid byte index.
fn parse_range(spec: &str, total: u64) -> Option<(u64, u64)> {
    let spec = spec.strip_prefix("bytes=")?;
    let (start_s, end_s) = spec.split_once('-')?;
    if start_s.is_empty() {
        let suffix_len: u64 = end_s.parse().ok()?;
        let start = total.saturating_sub(suffix_len);
        return Some((start, total.saturating_sub(1)));
    }
    let start: u64 = start_s.parse().ok()?;
    let end = if end_s.is_empty() {
        total.saturating_sub(1)
    } else {
        end_s.parse::<u64>().ok()?.min(total.saturating_sub(1))
    };
    Some((start, end))
}

#[cfg(test)]
mod range_tests {
    use super::parse_range;

    #[test]
    fn parses_explicit_start_and_end() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some((0, 99)));
    }

    #[test]
    fn parses_open_ended_range() {
        assert_eq!(parse_range("bytes=900-", 1000), Some((900, 999)));
    }

    #[test]
    fn parses_suffix_range() {
        assert_eq!(parse_range("bytes=-100", 1000), Some((900, 999)));
    }

    #[test]
    fn rejects_malformed_spec() {
        assert_eq!(parse_range("chunks=0-1", 1000), None);
        assert_eq!(parse_range("bytes=abc-99", 1000), None);
    }
}
