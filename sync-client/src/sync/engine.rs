//! Sync engine.
//!
//! Runs a periodic reconciliation pass that diffs the local tracked-file
//! table against the server's file list and turns the differences into
//! queued tasks, plus a queue-consumer loop that drains those tasks one at
//! a time (respecting [`crate::sync::queue`]'s priority order) and performs
//! the actual upload/download/delete/conflict-resolution work.
//!
//! Tombstones (locally-deleted paths) are load-bearing: a path marked
//! DELETED locally is never re-downloaded just because the server still
//! has it, and the only way a tombstone is lifted is the watcher seeing the
//! path recreated on disk. Without this, a slow propagation of the delete
//! to the server would otherwise let the reconciliation loop resurrect the
//! file it just deleted.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, CHUNK_THRESHOLD, MAX_RETRY_ATTEMPTS, RETRY_DELAY_MS};
use crate::http::client::HttpClient;
use crate::local_state::LocalState;
use crate::sync::arbiter::{ConflictArbiter, Resolution};
use crate::sync::queue::Operation;
use crate::transfer::chunked;
use crate::utils::errors::{ClientError, Result};
use crate::version_vector::VersionVector;
use crate::ws::client::ConnectionState;

/// Reconciliation cadence while the push channel is live — change
/// notifications arrive in real time, so polling mostly exists as a
/// safety net.
const WIDE_POLL_INTERVAL: Duration = Duration::from_secs(300);
/// Reconciliation cadence while the push channel is down — the only way to
/// discover remote changes.
const NARROW_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct SyncEngine {
    http: HttpClient,
    local_state: Arc<LocalState>,
    arbiter: Arc<ConflictArbiter>,
    connection: ConnectionState,
    sync_root: std::path::PathBuf,
    client_id: String,
    token: String,
}

impl SyncEngine {
    pub fn new(
        config: &ClientConfig,
        http: HttpClient,
        local_state: Arc<LocalState>,
        arbiter: Arc<ConflictArbiter>,
        connection: ConnectionState,
    ) -> Self {
        Self {
            http,
            local_state,
            arbiter,
            connection,
            sync_root: config.sync_path.clone(),
            client_id: config.client_id.clone(),
            token: config.auth_token.clone().unwrap_or_default(),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let reconcile_shutdown = shutdown.clone();
        let reconcile_engine = self.clone();
        let reconcile_task = tokio::spawn(async move { reconcile_engine.reconciliation_loop(reconcile_shutdown).await });

        let queue_engine = self.clone();
        let queue_shutdown = shutdown.clone();
        let queue_task = tokio::spawn(async move { queue_engine.queue_consumer_loop(queue_shutdown).await });

        let aging_engine = self.clone();
        let aging_task = tokio::spawn(async move { aging_engine.tombstone_aging_loop(shutdown).await });

        let _ = tokio::join!(reconcile_task, queue_task, aging_task);
    }

    async fn reconciliation_loop(&self, shutdown: CancellationToken) {
        loop {
            if let Err(e) = self.reconcile().await {
                tracing::warn!("reconciliation pass failed: {e}");
            }

            let interval = if self.connection.is_connected() {
                WIDE_POLL_INTERVAL
            } else {
                NARROW_POLL_INTERVAL
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }

    async fn tombstone_aging_loop(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(crate::config::TOMBSTONE_AGING_INTERVAL_SECS)) => {
                    if let Err(e) = self.age_tombstones().await {
                        tracing::warn!("tombstone aging pass failed: {e}");
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    }

    async fn queue_consumer_loop(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                result = self.local_state.dequeue() => {
                    match result {
                        Ok(Some(entry)) => {
                            if let Err(e) = self.dispatch(&entry).await {
                                if e.is_retryable() && entry.attempts < MAX_RETRY_ATTEMPTS as i64 {
                                    let delay = RETRY_DELAY_MS / 1000 * (entry.attempts as u64 + 1);
                                    tracing::warn!("task for {} failed, retrying in {delay}s: {e}", entry.path);
                                    let _ = self.local_state.requeue_with_backoff(&entry, delay as i64).await;
                                } else {
                                    tracing::error!("task for {} abandoned after {} attempts: {e}", entry.path, entry.attempts);
                                }
                            }
                        }
                        Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
                        Err(e) => {
                            tracing::error!("queue read failed: {e}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, entry: &crate::local_state::QueueEntry) -> Result<()> {
        let Some(op) = Operation::parse(&entry.operation) else {
            return Err(ClientError::Malformed(format!("unknown queue operation {}", entry.operation)));
        };
        match op {
            Operation::Upload => self.upload_path(&entry.path).await,
            Operation::Download => self.download_path(&entry.path).await,
            Operation::Delete => self.delete_path(&entry.path).await,
            Operation::ConflictResolve => self.resolve_conflict(&entry.path).await,
        }
    }

    /// One full diff pass: enqueue every locally-pending write, then compare
    /// every server-known path against local state per the decision table,
    /// then drop local records for paths the server no longer has.
    async fn reconcile(&self) -> Result<()> {
        let local_files = self.local_state.list_tracked_files().await?;

        // Step 2: every locally-pending write gets an upload queued up
        // front, independent of what the server currently thinks.
        for local in &local_files {
            if local.is_pending() {
                self.local_state
                    .enqueue(&local.path, Operation::Upload.as_str(), Operation::Upload.priority())
                    .await?;
            }
        }

        // Step 3: the authoritative server file list, compared path by path.
        let server_files = self.http.list_files(&self.token).await?;
        for server_file in &server_files {
            let local = local_files.iter().find(|f| f.path == server_file.path);
            let op = match local {
                // Tombstoned locally: skip entirely until the tombstone is
                // cleared by the path being recreated on disk.
                Some(local) if local.is_deleted() => None,
                None => {
                    let exists_on_disk = self.sync_root.join(&server_file.path).is_file();
                    Some(if exists_on_disk { Operation::Upload } else { Operation::Download })
                }
                Some(local) => {
                    let server_vv = VersionVector::from_json(&server_file.version_vector).unwrap_or_default();
                    if server_file.conflict_status == "CONFLICTING"
                        || local.is_conflicting()
                        || server_vv.concurrent(&local.local_version_vector)
                    {
                        Some(Operation::ConflictResolve)
                    } else if server_vv.equal(&local.local_version_vector) {
                        None
                    } else if server_vv.dominates(&local.local_version_vector) {
                        Some(Operation::Download)
                    } else {
                        Some(Operation::Upload)
                    }
                }
            };
            if let Some(op) = op {
                self.local_state.enqueue(&server_file.path, op.as_str(), op.priority()).await?;
            }
        }

        // Step 4: a path tracked locally but absent from the server's list
        // was deleted by another device. A live tombstone is left alone
        // (another client's stale view might still be serving the file);
        // anything else is dropped straight away, not routed through the
        // DELETE task — there is no surviving server record to tell.
        for local in &local_files {
            if local.is_deleted() || server_files.iter().any(|f| f.path == local.path) {
                continue;
            }
            let full_path = self.sync_root.join(&local.path);
            let _ = tokio::fs::remove_file(&full_path).await;
            self.local_state.remove_tracked_file(&local.path).await?;
        }

        Ok(())
    }

    /// Step 5: purge tombstones old enough (default 1h) whose path is also
    /// gone from disk — bounds local-DB growth while leaving a window wide
    /// enough for every device on the account to observe the delete.
    async fn age_tombstones(&self) -> Result<()> {
        let aged = self
            .local_state
            .list_aged_tombstones(crate::config::TOMBSTONE_RETENTION_SECS)
            .await?;
        for tombstone in aged {
            if !self.sync_root.join(&tombstone.path).exists() {
                self.local_state.remove_tracked_file(&tombstone.path).await?;
            }
        }
        Ok(())
    }

    async fn upload_path(&self, path: &str) -> Result<()> {
        let full_path = self.sync_root.join(path);
        let tracked = self.local_state.find_tracked_file(path).await?;

        // Tombstoned locally: only proceed if the path was recreated on
        // disk (which clears the tombstone once this upload lands), else
        // there's nothing to upload.
        if tracked.as_ref().is_some_and(|t| t.is_deleted()) && !full_path.is_file() {
            return Ok(());
        }

        let data = tokio::fs::read(&full_path).await?;
        let checksum = sha256_hex(&data);

        let prior_vv = tracked
            .as_ref()
            .map(|f| f.local_version_vector.clone())
            .unwrap_or_default();
        // The client increments its own counter before the request goes out
        // (the VV is "monotone under local modifications", spec §3 invariant
        // 1) — the server only ever decides whether to accept, reject, or
        // merge this already-advanced vector; it never increments on its own.
        let base_vv = prior_vv.increment(&self.client_id);

        let (version_vector, conflicting) = if data.len() as u64 >= CHUNK_THRESHOLD {
            chunked::upload_chunked(&self.http, &self.token, path, &base_vv, &self.client_id, &data).await?
        } else {
            let response = self.http.upload(&self.token, path, &base_vv, &self.client_id, data.clone()).await?;
            (response.version_vector, response.conflicting)
        };

        self.arbiter.note_uploaded(path);

        let next_vv = VersionVector::from_json(&version_vector).unwrap_or_else(|_| base_vv.clone());
        self.local_state
            .upsert_tracked_file(
                path,
                None,
                &next_vv,
                &checksum,
                data.len() as i64,
                0,
                "SYNCED",
                if conflicting { "CONFLICTING" } else { "NONE" },
            )
            .await?;

        if conflicting {
            self.local_state
                .enqueue(path, Operation::ConflictResolve.as_str(), Operation::ConflictResolve.priority())
                .await?;
        }

        Ok(())
    }

    async fn download_path(&self, path: &str) -> Result<()> {
        // Tombstoned locally: never resurrect the file just because the
        // server (still, or again) has it — the only way the tombstone
        // lifts is the path being recreated on disk and re-uploaded.
        if self.local_state.find_tracked_file(path).await?.is_some_and(|t| t.is_deleted()) {
            return Ok(());
        }

        let server_files = self.http.list_files(&self.token).await?;
        let Some(server_file) = server_files.iter().find(|f| f.path == path) else {
            // The server no longer has it — if we still do, the file
            // belongs locally and wasn't uploaded yet, not the other way
            // around.
            if self.sync_root.join(path).is_file() {
                self.local_state
                    .enqueue(path, Operation::Upload.as_str(), Operation::Upload.priority())
                    .await?;
                return Ok(());
            }
            return Ok(());
        };

        let data = if server_file.size as u64 >= CHUNK_THRESHOLD {
            chunked::download_chunked(
                &self.http,
                &self.token,
                &server_file.id,
                server_file.size as u64,
                crate::config::CHUNK_SIZE,
            )
            .await?
        } else {
            self.http.download(&self.token, &server_file.id).await?
        };
        let full_path = self.sync_root.join(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, &data).await?;

        let version_vector = VersionVector::from_json(&server_file.version_vector).unwrap_or_default();
        self.local_state
            .upsert_tracked_file(
                path,
                Some(&server_file.id),
                &version_vector,
                &server_file.checksum,
                data.len() as i64,
                0,
                "SYNCED",
                &server_file.conflict_status,
            )
            .await?;

        Ok(())
    }

    async fn delete_path(&self, path: &str) -> Result<()> {
        let tracked = self.local_state.find_tracked_file(path).await?;
        let base_vv = tracked.map(|f| f.local_version_vector).unwrap_or_default();

        let server_files = self.http.list_files(&self.token).await?;
        if let Some(server_file) = server_files.iter().find(|f| f.path == path) {
            self.http.delete(&self.token, &server_file.id, &base_vv, &self.client_id).await?;
        }

        let full_path = self.sync_root.join(path);
        let _ = tokio::fs::remove_file(&full_path).await;
        self.local_state.tombstone(path).await?;

        Ok(())
    }

    /// Runs the arbiter and acts on its decision: keep the local copy (and
    /// re-upload to push past the conflict), adopt the server's copy, or
    /// skip if the arbiter judges this path already settled.
    async fn resolve_conflict(&self, path: &str) -> Result<()> {
        match self.arbiter.resolve(path) {
            Resolution::Cancelled => Ok(()),
            Resolution::UseLocal | Resolution::UseMerged => self.upload_path(path).await,
            Resolution::UseServer => self.download_path(path).await,
        }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
    }
}
