use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::sync_event;
use crate::routes::auth_extractor::AuthUser;
use crate::state::AppState;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/changes", get(changes))
        .route("/heartbeat", post(heartbeat))
}

#[derive(Deserialize)]
struct ChangesQuery {
    #[serde(default)]
    since: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    500
}

async fn changes(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let user_id = user.user_id.clone();
    let events = tokio::task::spawn_blocking(move || {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        sync_event::find_since(&conn, &user_id, query.since, query.limit)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?;

    let latest_sequence = events.iter().map(|e| e.sequence).max().unwrap_or(query.since);

    Ok(Json(serde_json::json!({
        "events": events,
        "latestSequence": latest_sequence,
    })))
}

async fn heartbeat(user: AuthUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "userId": user.user_id, "ok": true }))
}
