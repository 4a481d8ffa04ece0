use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::user;
use crate::routes::auth_extractor::AuthUser;
use crate::services::auth;
use crate::state::AppState;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    user_id: String,
    username: String,
    token: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> Result<Json<AuthResponse>, AppError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| AppError::Internal(e.into()))?;
        auth::register(&conn, &body.username, &body.password)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))??;

    let token = auth::issue_token(&user, &state.config.jwt_secret, state.config.jwt_expiration_secs)
        .map_err(AppError::Internal)?;

    Ok(Json(AuthResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> Result<Json<AuthResponse>, AppError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| AppError::Internal(e.into()))?;
        auth::login(&conn, &body.username, &body.password)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))??;

    let token = auth::issue_token(&user, &state.config.jwt_secret, state.config.jwt_expiration_secs)
        .map_err(AppError::Internal)?;

    Ok(Json(AuthResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

/// Tokens are stateless JWTs, so "refresh" just means: prove you still hold
/// a currently-valid one, and get a fresh one back with a pushed-out
/// expiry. There is no server-side refresh-token table to consult.
async fn refresh(
    State(state): State<Arc<AppState>>,
    auth_user: AuthUser,
) -> Result<Json<AuthResponse>, AppError> {
    let db = state.db.clone();
    let uid = auth_user.user_id.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| AppError::Internal(e.into()))?;
        user::find_by_id(&conn, &uid)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Unauthorized("user no longer exists".into()))
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))??;

    let token = auth::issue_token(&user, &state.config.jwt_secret, state.config.jwt_expiration_secs)
        .map_err(AppError::Internal)?;

    Ok(Json(AuthResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

/// Nothing to revoke server-side for a stateless JWT; this exists so
/// clients have a symmetric call to make when a user signs out, and so a
/// future move to a revocation list has somewhere to hook in.
async fn logout(_auth_user: AuthUser) -> axum::http::StatusCode {
    axum::http::StatusCode::NO_CONTENT
}
