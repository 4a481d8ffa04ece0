pub mod auth;
pub mod auth_extractor;
pub mod chunked;
pub mod files;
pub mod sync;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/auth", auth::router(state.clone()))
        .nest("/files", files::router(state.clone()).merge(chunked::router(state.clone())))
        .nest("/sync", sync::router(state.clone()))
        .route("/push", axum::routing::get(crate::ws::push::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
