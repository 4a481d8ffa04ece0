mod config;
mod content_store;
mod db;
mod error;
mod models;
mod routes;
mod services;
mod state;
mod ws;

use crate::config::AppConfig;
use crate::db::connection::create_pool;
use crate::db::migrate::migrate;
use crate::services::chunk_manager::spawn_cleanup_task;
use crate::state::AppState;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!("Starting sync server on port {}", config.port);

    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.storage_base_path)?;

    let db_path = config.db_path.to_string_lossy().to_string();
    let pool = create_pool(&db_path);
    migrate(&pool, &config.data_dir, &config.storage_base_path)?;

    let state = Arc::new(AppState::new(pool, config.clone()));

    spawn_cleanup_task(state.chunks.clone(), state.config.chunk_session_timeout_hours);

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    db::connection::close_pool(&state.db);
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
