use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::version_vector::VersionVector;
use crate::models::{file_record, file_version};
use crate::routes::auth_extractor::AuthUser;
use crate::services::reconciliation;
use crate::state::AppState;
use crate::ws::push::PushFrame;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_files))
        .route("/upload", post(upload_file))
        .route("/{file_id}", get(download_file).delete(delete_file))
        .route("/{file_id}/metadata", get(file_metadata))
        .route("/{file_id}/versions", get(list_versions))
}

#[derive(Serialize)]
struct FileSummary {
    id: String,
    path: String,
    size: i64,
    checksum: String,
    version_vector: serde_json::Value,
    conflict_status: String,
    updated_at: String,
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<FileSummary>>, AppError> {
    let db = state.db.clone();
    let user_id = user.user_id.clone();
    let records = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        file_record::list_active_for_user(&conn, &user_id)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?;

    Ok(Json(
        records
            .into_iter()
            .map(|r| FileSummary {
                id: r.id,
                path: r.path,
                size: r.size,
                checksum: r.checksum,
                version_vector: r.version_vector().to_json(),
                conflict_status: r.conflict_status,
                updated_at: r.updated_at,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
struct UploadQuery {
    path: String,
    #[serde(default)]
    base_version_vector: Option<String>,
    client_id: String,
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.len() as u64 >= state.config.max_simple_upload_size {
        return Err(AppError::Unprocessable(format!(
            "file exceeds {} bytes, use the chunked upload endpoints",
            state.config.max_simple_upload_size
        )));
    }

    let base_vv = match query.base_version_vector {
        Some(ref s) => {
            let value: serde_json::Value =
                serde_json::from_str(s).map_err(|e| AppError::BadRequest(format!("invalid base_version_vector: {e}")))?;
            VersionVector::from_json(&value).map_err(|e| AppError::BadRequest(e.to_string()))?
        }
        None => VersionVector::new(),
    };

    let outcome = reconciliation::upload_with_version_vector(
        &state.db,
        &state.store,
        &user.user_id,
        &query.path,
        &base_vv,
        &query.client_id,
        body.to_vec(),
    )
    .await?;

    state.push.notify(
        &user.user_id,
        PushFrame::Message {
            event_type: if outcome.conflicting { "CONFLICT".into() } else { "UPLOAD".into() },
            path: query.path.clone(),
            version_vector: outcome.version_vector.to_json(),
            originating_client_id: query.client_id.clone(),
        },
    );

    Ok(Json(serde_json::json!({
        "fileId": outcome.file_id,
        "versionVector": outcome.version_vector.to_json(),
        "conflicting": outcome.conflicting,
    })))
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    AxumPath(file_id): AxumPath<String>,
) -> Result<Bytes, AppError> {
    let db = state.db.clone();
    let fid = file_id.clone();
    let record = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        file_record::find_by_id(&conn, &fid)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?
    .ok_or_else(|| AppError::NotFound("file not found".into()))?;

    if record.user_id != user.user_id {
        return Err(AppError::NotFound("file not found".into()));
    }
    if record.is_deleted() {
        return Err(AppError::NotFound("file has been deleted".into()));
    }

    let db = state.db.clone();
    let fid = record.id.clone();
    let latest = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        file_version::find_latest(&conn, &fid)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?
    .ok_or_else(|| AppError::NotFound("no version found for file".into()))?;

    let bytes = state
        .store
        .get(std::path::Path::new(&latest.storage_path))
        .await
        .map_err(AppError::Internal)?;

    Ok(Bytes::from(bytes))
}

async fn file_metadata(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    AxumPath(file_id): AxumPath<String>,
) -> Result<Json<FileSummary>, AppError> {
    let db = state.db.clone();
    let fid = file_id.clone();
    let record = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        file_record::find_by_id(&conn, &fid)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?
    .ok_or_else(|| AppError::NotFound("file not found".into()))?;

    if record.user_id != user.user_id {
        return Err(AppError::NotFound("file not found".into()));
    }

    Ok(Json(FileSummary {
        id: record.id,
        path: record.path,
        size: record.size,
        checksum: record.checksum,
        version_vector: record.version_vector().to_json(),
        conflict_status: record.conflict_status,
        updated_at: record.updated_at,
    }))
}

#[derive(Serialize)]
struct VersionSummary {
    id: String,
    version_vector: serde_json::Value,
    size: i64,
    checksum: String,
    uploaded_by_client_id: String,
    created_at: String,
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    AxumPath(file_id): AxumPath<String>,
) -> Result<Json<Vec<VersionSummary>>, AppError> {
    let db = state.db.clone();
    let fid = file_id.clone();
    let record = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        file_record::find_by_id(&conn, &fid)
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
    let versions = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        file_version::find_by_file_id(&conn, &fid)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?;

    Ok(Json(
        versions
            .into_iter()
            .map(|v| VersionSummary {
                id: v.id,
                version_vector: serde_json::from_str(&v.version_vector).unwrap_or(serde_json::json!({})),
                size: v.size,
                checksum: v.checksum,
                uploaded_by_client_id: v.uploaded_by_client_id,
                created_at: v.created_at,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    base_version_vector: Option<String>,
    client_id: String,
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    AxumPath(file_id): AxumPath<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, AppError> {
    let db = state.db.clone();
    let fid = file_id.clone();
    let record = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        file_record::find_by_id(&conn, &fid)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?
    .ok_or_else(|| AppError::NotFound("file not found".into()))?;

    if record.user_id != user.user_id {
        return Err(AppError::NotFound("file not found".into()));
    }

    let base_vv = match query.base_version_vector {
        Some(ref s) => {
            let value: serde_json::Value =
                serde_json::from_str(s).map_err(|e| AppError::BadRequest(format!("invalid base_version_vector: {e}")))?;
            VersionVector::from_json(&value).map_err(|e| AppError::BadRequest(e.to_string()))?
        }
        None => record.version_vector(),
    };

    let next_vv = reconciliation::delete_with_version_vector(
        &state.db,
        &user.user_id,
        &record.path,
        &base_vv,
        &query.client_id,
    )
    .await?;

    state.push.notify(
        &user.user_id,
        PushFrame::Message {
            event_type: "DELETE".into(),
            path: record.path.clone(),
            version_vector: next_vv.to_json(),
            originating_client_id: query.client_id.clone(),
        },
    );

    Ok(StatusCode::NO_CONTENT)
}
