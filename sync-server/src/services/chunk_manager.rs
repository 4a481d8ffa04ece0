//! Chunked upload session lifecycle.
//!
//! A session is created with `initiate`, fed chunks with `upload_chunk`, and
//! assembled into a final file once every chunk has arrived. Sessions
//! in-flight are tracked in the database (so they survive a server restart)
//! and swept by an hourly cleanup pass — grounded on the same
//! `tokio::time::interval` loop shape the teacher uses for its ping service,
//! rather than `tokio-cron-scheduler`: there's exactly one fixed cadence
//! here, not a user-supplied schedule.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::content_store::ContentStore;
use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::chunk_session::{self, ChunkSession};
use crate::models::version_vector::VersionVector;

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub received_chunks: Vec<u64>,
    pub total_chunks: u64,
    pub status: String,
}

/// In-memory per-session chunk arrival buffer, keyed by session id. This is
/// a cache over the authoritative `received_chunks` JSON column in SQLite —
/// kept so that a burst of chunk uploads doesn't serialize the whole set on
/// every single write.
struct SessionBuffer {
    storage_path: PathBuf,
    received: std::collections::BTreeSet<u64>,
}

pub struct ChunkManager {
    db: DbPool,
    store: ContentStore,
    buffers: DashMap<String, SessionBuffer>,
    max_concurrent_sessions: usize,
}

impl ChunkManager {
    pub fn new(db: DbPool, store: ContentStore, max_concurrent_sessions: usize) -> Self {
        Self {
            db,
            store,
            buffers: DashMap::new(),
            max_concurrent_sessions,
        }
    }

    pub async fn initiate(
        &self,
        user_id: &str,
        path: &str,
        total_size: u64,
        chunk_size: u64,
        base_version_vector: &VersionVector,
        client_id: &str,
    ) -> Result<ChunkSession, AppError> {
        let db = self.db.clone();
        let user_id_owned = user_id.to_string();
        let active = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            chunk_session::count_active_for_user(&conn, &user_id_owned)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
        .map_err(AppError::Internal)?;

        if active as usize >= self.max_concurrent_sessions {
            return Err(AppError::QuotaExceeded(format!(
                "too many active chunk sessions for this user (limit {})",
                self.max_concurrent_sessions
            )));
        }

        let total_chunks = total_size.div_ceil(chunk_size).max(1);
        let session_id = Uuid::new_v4().to_string();
        let storage_path = self.store.path_for(user_id, &session_id);
        self.store
            .preallocate(&storage_path, total_size)
            .await
            .map_err(AppError::Internal)?;

        let db = self.db.clone();
        let (user_id_o, path_o, client_id_o) =
            (user_id.to_string(), path.to_string(), client_id.to_string());
        let bvv_json = base_version_vector.to_json().to_string();
        let session_id_o = session_id.clone();
        let session = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            chunk_session::create(
                &conn,
                &session_id_o,
                &user_id_o,
                &path_o,
                total_size as i64,
                chunk_size as i64,
                total_chunks as i64,
                &bvv_json,
                &client_id_o,
            )
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
        .map_err(AppError::Internal)?;

        self.buffers.insert(
            session_id,
            SessionBuffer {
                storage_path,
                received: std::collections::BTreeSet::new(),
            },
        );

        Ok(session)
    }

    pub async fn upload_chunk(
        &self,
        session_id: &str,
        chunk_index: u64,
        data: &[u8],
    ) -> Result<SessionStatus, AppError> {
        let session = self.require_session(session_id).await?;
        if session.status != "IN_PROGRESS" {
            return Err(AppError::SessionExpired(format!(
                "session {session_id} is {}",
                session.status
            )));
        }
        if chunk_index >= session.total_chunks as u64 {
            return Err(AppError::BadRequest(format!(
                "chunk index {chunk_index} out of range (total {})",
                session.total_chunks
            )));
        }

        let offset = chunk_index * session.chunk_size as u64;
        let storage_path = {
            let buf = self
                .buffers
                .get(session_id)
                .ok_or_else(|| AppError::SessionMissing(session_id.to_string()))?;
            buf.storage_path.clone()
        };

        self.store
            .write_chunk_at(&storage_path, offset, data)
            .await
            .map_err(AppError::Internal)?;

        let (received, total) = {
            let mut buf = self
                .buffers
                .get_mut(session_id)
                .ok_or_else(|| AppError::SessionMissing(session_id.to_string()))?;
            // Duplicate chunk re-uploads are idempotent — the insert is a no-op
            // if the index is already present.
            buf.received.insert(chunk_index);
            (buf.received.clone(), session.total_chunks as u64)
        };

        let received_json = serde_json::to_string(&received).map_err(|e| AppError::Internal(e.into()))?;
        let db = self.db.clone();
        let sid = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            chunk_session::update_received_chunks(&conn, &sid, &received_json)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
        .map_err(AppError::Internal)?;

        Ok(SessionStatus {
            session_id: session_id.to_string(),
            received_chunks: received.into_iter().collect(),
            total_chunks: total,
            status: "IN_PROGRESS".to_string(),
        })
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus, AppError> {
        let session = self.require_session(session_id).await?;
        let received: Vec<u64> = serde_json::from_str(&session.received_chunks).unwrap_or_default();
        Ok(SessionStatus {
            session_id: session_id.to_string(),
            received_chunks: received,
            total_chunks: session.total_chunks as u64,
            status: session.status,
        })
    }

    /// True once every chunk index in `[0, total_chunks)` has arrived.
    pub async fn is_complete(&self, session_id: &str) -> Result<bool, AppError> {
        let status = self.status(session_id).await?;
        Ok(status.received_chunks.len() as u64 == status.total_chunks)
    }

    pub fn storage_path(&self, session_id: &str) -> Option<PathBuf> {
        self.buffers.get(session_id).map(|b| b.storage_path.clone())
    }

    pub async fn mark_completed(&self, session_id: &str) -> Result<(), AppError> {
        let db = self.db.clone();
        let sid = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            chunk_session::update_status(&conn, &sid, "COMPLETED")
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
        .map_err(AppError::Internal)?;
        self.buffers.remove(session_id);
        Ok(())
    }

    pub async fn cancel(&self, session_id: &str) -> Result<(), AppError> {
        let session = self.require_session(session_id).await?;
        let path = self.store.path_for(&session.user_id, session_id);
        let _ = self.store.delete(&path).await;

        let db = self.db.clone();
        let sid = session_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            chunk_session::update_status(&conn, &sid, "FAILED")
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
        .map_err(AppError::Internal)?;
        self.buffers.remove(session_id);
        Ok(())
    }

    pub async fn list_active(&self, user_id: &str) -> Result<Vec<ChunkSession>, AppError> {
        let db = self.db.clone();
        let uid = user_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            chunk_session::list_active_for_user(&conn, &uid)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
        .map_err(AppError::Internal)
    }

    async fn require_session(&self, session_id: &str) -> Result<ChunkSession, AppError> {
        let db = self.db.clone();
        let sid = session_id.to_string();
        let session = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            chunk_session::find_by_id(&conn, &sid)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
        .map_err(AppError::Internal)?;
        session.ok_or_else(|| AppError::SessionMissing(session_id.to_string()))
    }

    /// Sweep sessions that haven't been touched within the configured
    /// timeout and mark them EXPIRED, freeing their quota slot and removing
    /// their partial blob from disk.
    pub async fn cleanup_expired(&self, timeout_hours: i64) -> anyhow::Result<usize> {
        let db = self.db.clone();
        let expired = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            chunk_session::find_expired(&conn, timeout_hours)
        })
        .await??;

        let count = expired.len();
        for session in expired {
            let path = self.store.path_for(&session.user_id, &session.id);
            let _ = self.store.delete(&path).await;

            let db = self.db.clone();
            let sid = session.id.clone();
            let _ = tokio::task::spawn_blocking(move || {
                let conn = db.get()?;
                chunk_session::update_status(&conn, &sid, "EXPIRED")
            })
            .await?;

            self.buffers.remove(&session.id);
        }
        Ok(count)
    }
}

/// Spawn the hourly cleanup loop. Runs until the process exits — there's no
/// cancellation token wired in because chunk-session expiry is harmless to
/// interrupt mid-sweep and the process exiting stops it anyway.
pub fn spawn_cleanup_task(manager: Arc<ChunkManager>, timeout_hours: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match manager.cleanup_expired(timeout_hours).await {
                Ok(n) if n > 0 => tracing::info!("Expired {n} chunk session(s)"),
                Ok(_) => {}
                Err(e) => tracing::warn!("Chunk session cleanup failed: {e:#}"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;

    fn setup() -> (Arc<ChunkManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let pool = create_pool(db_path.to_str().unwrap());
        migrate(&pool, dir.path(), &dir.path().join("files")).unwrap();
        {
            let conn = pool.get().unwrap();
            crate::models::user::create(&conn, "alice", "hash").unwrap();
        }
        let store = ContentStore::new(dir.path().join("files"));
        let manager = Arc::new(ChunkManager::new(pool, store, 10));
        (manager, dir)
    }

    #[tokio::test]
    async fn chunk_assembly_completes_after_every_index_arrives() {
        let (manager, _dir) = setup();
        let conn_pool = manager.db.clone();
        let user_id = {
            let conn = conn_pool.get().unwrap();
            crate::models::user::find_by_username(&conn, "alice")
                .unwrap()
                .unwrap()
                .id
        };

        let session = manager
            .initiate(&user_id, "a.bin", 10, 5, &VersionVector::new(), "client-1")
            .await
            .unwrap();

        assert!(!manager.is_complete(&session.id).await.unwrap());
        manager.upload_chunk(&session.id, 0, b"hello").await.unwrap();
        assert!(!manager.is_complete(&session.id).await.unwrap());
        manager.upload_chunk(&session.id, 1, b"world").await.unwrap();
        assert!(manager.is_complete(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_chunk_upload_is_idempotent() {
        let (manager, _dir) = setup();
        let conn_pool = manager.db.clone();
        let user_id = {
            let conn = conn_pool.get().unwrap();
            crate::models::user::find_by_username(&conn, "alice")
                .unwrap()
                .unwrap()
                .id
        };
        let session = manager
            .initiate(&user_id, "a.bin", 10, 5, &VersionVector::new(), "client-1")
            .await
            .unwrap();
        manager.upload_chunk(&session.id, 0, b"hello").await.unwrap();
        let status = manager.upload_chunk(&session.id, 0, b"hello").await.unwrap();
        assert_eq!(status.received_chunks.len(), 1);
    }

    #[tokio::test]
    async fn too_many_sessions_rejected_by_quota() {
        let (manager, _dir) = setup();
        let conn_pool = manager.db.clone();
        let user_id = {
            let conn = conn_pool.get().unwrap();
            crate::models::user::find_by_username(&conn, "alice")
                .unwrap()
                .unwrap()
                .id
        };
        let manager = Arc::new(ChunkManager::new(manager.db.clone(), manager.store.clone(), 1));
        manager
            .initiate(&user_id, "a.bin", 10, 5, &VersionVector::new(), "client-1")
            .await
            .unwrap();
        let second = manager
            .initiate(&user_id, "b.bin", 10, 5, &VersionVector::new(), "client-1")
            .await;
        assert!(matches!(second, Err(AppError::QuotaExceeded(_))));
    }
}
