//! Sync client — entry point.
//!
//! Wiring order: load config, derive (or load) identity, open the local
//! state store, authenticate if needed, then spawn the watcher, push
//! client, and sync engine concurrently before running the initial scan.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sync_client::config::ClientConfig;
use sync_client::daemon::shutdown::ShutdownCoordinator;
use sync_client::fs::watcher::{initial_scan, FsWatcher};
use sync_client::http::client::HttpClient;
use sync_client::local_state::LocalState;
use sync_client::sync::arbiter::ConflictArbiter;
use sync_client::sync::engine::SyncEngine;
use sync_client::sync::queue::Operation;
use sync_client::utils;
use sync_client::ws::client::{ConnectionState, PushClient};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the client's `.properties` configuration file
    #[arg(short, long, value_name = "FILE", default_value = "client.properties")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Password to authenticate with, if no auth token is on file yet
    #[arg(long, env = "SYNC_CLIENT_PASSWORD")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ClientConfig::from_file(&args.config)?;

    utils::logger::init(args.log_level.as_deref().unwrap_or("info"))?;
    tracing::info!("Starting sync-client (client_id: {})", config.client_id);

    std::fs::create_dir_all(&config.sync_path)?;

    let http = HttpClient::new(config.server_url.clone());

    if config.auth_token.is_none() {
        let password = args
            .password
            .ok_or_else(|| anyhow::anyhow!("no auth token on file and no --password provided"))?;
        let auth = http.login(&config.username, &password).await?;
        config.auth_token = Some(auth.token);
        config.save(&args.config)?;
        tracing::info!("authenticated as {}", config.username);
    }

    let data_dir = args.config.parent().unwrap_or(std::path::Path::new(".")).join(".sync-client");
    let local_state = Arc::new(LocalState::open(&data_dir.join("state.db"))?);
    let arbiter = Arc::new(ConflictArbiter::default());
    let connection_state = ConnectionState::new();

    let shutdown = ShutdownCoordinator::new();
    let cancellation = CancellationToken::new();

    let watcher = FsWatcher::watch(&config.sync_path)?;
    spawn_watcher_bridge(watcher, config.sync_path.clone(), local_state.clone(), cancellation.clone());

    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let push_client = PushClient::new(
        config.server_url.clone(),
        config.auth_token.clone().unwrap_or_default(),
        config.client_id.clone(),
        connection_state.clone(),
    );
    let push_cancellation = cancellation.clone();
    let push_handle = tokio::spawn(async move { push_client.run(push_tx, push_cancellation).await });
    spawn_push_event_bridge(push_rx, local_state.clone(), cancellation.clone());

    let engine = Arc::new(SyncEngine::new(&config, http, local_state.clone(), arbiter, connection_state));
    let engine_cancellation = cancellation.clone();
    let engine_handle = tokio::spawn(async move { engine.run(engine_cancellation).await });

    tracing::info!("running initial scan of {}", config.sync_path.display());
    for path in initial_scan(&config.sync_path)? {
        let Some(path_str) = relativize(&config.sync_path, &path) else { continue };
        let tracked = local_state.find_tracked_file(&path_str).await?;
        // Only a brand new path, or one recreated after a tombstone, needs
        // an upload queued here — an already-synced file is left for the
        // next reconciliation pass to compare against the server.
        let needs_upload = match tracked {
            None => true,
            Some(ref t) if t.is_deleted() => true,
            Some(_) => false,
        };
        if needs_upload {
            local_state.mark_pending(&path_str).await?;
            local_state
                .enqueue(&path_str, Operation::Upload.as_str(), Operation::Upload.priority())
                .await?;
        }
    }

    shutdown.wait_for_signal().await;
    cancellation.cancel();
    shutdown.shutdown().await;

    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), push_handle).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), engine_handle).await;

    tracing::info!("sync-client shut down");
    Ok(())
}

/// Bridges `notify`'s filesystem events into sync-queue entries: a
/// created/modified path is queued for upload, a removed path is
/// tombstoned and queued for delete propagation.
///
/// `notify` reports paths joined onto the watched root, so every path must
/// be relativized the same way the initial scan relativizes its paths —
/// otherwise a file tracked as `a.txt` by the startup scan gets tracked
/// again under its absolute path the first time the watcher sees it
/// touched, producing a duplicate row locally and a duplicate record on
/// the server.
fn spawn_watcher_bridge(
    mut watcher: FsWatcher,
    sync_root: PathBuf,
    local_state: Arc<LocalState>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                event = watcher.events.recv() => {
                    let Some(event) = event else { return };
                    use sync_client::fs::watcher::FsChange;
                    let (path, op) = match event {
                        FsChange::Created(p) | FsChange::Modified(p) => (p, Operation::Upload),
                        FsChange::Removed(p) => (p, Operation::Delete),
                    };
                    let Some(path_str) = relativize(&sync_root, &path) else { continue };
                    if op == Operation::Delete {
                        // Tombstone synchronously, before any network
                        // request goes out — this is the invariant that
                        // stops a slow-to-propagate delete from letting the
                        // reconciliation loop resurrect the file.
                        let _ = local_state.tombstone(&path_str).await;
                    } else {
                        let _ = local_state.mark_pending(&path_str).await;
                    }
                    let _ = local_state.enqueue(&path_str, op.as_str(), op.priority()).await;
                }
            }
        }
    });
}

/// Strips `sync_root` off an absolute path and normalizes it to a
/// forward-slash-separated string — the form both the local tracked-file
/// table and the server's file list key on. Returns `None` for a path
/// outside the sync root.
fn relativize(sync_root: &std::path::Path, path: &std::path::Path) -> Option<String> {
    let relative = path.strip_prefix(sync_root).ok()?;
    let components: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    Some(components.join("/"))
}

/// Bridges push-channel `MESSAGE` frames into sync-queue entries, so a
/// remote change is picked up immediately instead of waiting for the next
/// periodic reconciliation pass.
fn spawn_push_event_bridge(
    mut events: mpsc::UnboundedReceiver<sync_client::ws::client::PushFrame>,
    local_state: Arc<LocalState>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                frame = events.recv() => {
                    use sync_client::ws::client::PushFrame;
                    let Some(PushFrame::Message { event_type, path, .. }) = frame else {
                        if frame.is_none() { return; }
                        continue;
                    };
                    let op = match event_type.as_str() {
                        "DELETE" => Operation::Delete,
                        "CONFLICT" => Operation::ConflictResolve,
                        _ => Operation::Download,
                    };
                    let _ = local_state.enqueue(&path, op.as_str(), op.priority()).await;
                }
            }
        }
    });
}
