use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The client's `If-Match`/base version vector no longer matches the
    /// server's current vector for this file — upload was rejected to avoid
    /// silently discarding a concurrent write.
    #[error("stale upload: {0}")]
    StaleUpload(String),

    /// The named chunk session has already been assembled, cancelled, or
    /// swept by the expiry task.
    #[error("chunk session expired: {0}")]
    SessionExpired(String),

    #[error("chunk session not found: {0}")]
    SessionMissing(String),

    /// Too many chunk sessions are in progress for this user/server.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            AppError::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            AppError::StaleUpload(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::SessionExpired(m) => (StatusCode::GONE, m.clone()),
            AppError::SessionMissing(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::QuotaExceeded(m) => (StatusCode::TOO_MANY_REQUESTS, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
