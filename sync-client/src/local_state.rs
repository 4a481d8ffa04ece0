//! Local state store.
//!
//! Tracks, per synced path, the last version vector the client observed,
//! the content checksum it last saw on disk, and whether the path is
//! currently tombstoned (deleted locally, pending propagation or already
//! propagated). Also holds the durable sync task queue, so a restart picks
//! up in-flight work instead of relying purely on the next reconciliation
//! pass to rediscover it.
//!
//! A single `rusqlite::Connection` behind a `tokio::sync::Mutex` rather
//! than the server's r2d2 pool — this process has exactly one writer and
//! no concurrent-request fan-out to size a pool for.

use std::path::Path;

use rusqlite::{params, Connection, Row};
use tokio::sync::Mutex;

use crate::utils::errors::Result;
use crate::version_vector::VersionVector;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tracked_files (
  path TEXT PRIMARY KEY,
  file_id TEXT,
  local_version_vector TEXT NOT NULL DEFAULT '{}',
  checksum TEXT NOT NULL DEFAULT '',
  size INTEGER NOT NULL DEFAULT 0,
  mtime INTEGER NOT NULL DEFAULT 0,
  status TEXT NOT NULL DEFAULT 'PENDING' CHECK(status IN ('PENDING','SYNCED','DELETED')),
  conflict_status TEXT NOT NULL DEFAULT 'NONE' CHECK(conflict_status IN ('NONE','CONFLICTING')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS sync_queue (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  path TEXT NOT NULL,
  operation TEXT NOT NULL CHECK(operation IN ('UPLOAD','DOWNLOAD','DELETE','CONFLICT_RESOLVE')),
  priority INTEGER NOT NULL,
  scheduled_at TEXT NOT NULL DEFAULT (datetime('now')),
  attempts INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_priority ON sync_queue(priority, scheduled_at, id);
"#;

#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub path: String,
    pub file_id: Option<String>,
    pub local_version_vector: VersionVector,
    pub checksum: String,
    pub size: i64,
    pub mtime: i64,
    pub status: String,
    pub conflict_status: String,
}

impl TrackedFile {
    pub fn is_deleted(&self) -> bool {
        self.status == "DELETED"
    }

    pub fn is_pending(&self) -> bool {
        self.status == "PENDING"
    }

    pub fn is_conflicting(&self) -> bool {
        self.conflict_status == "CONFLICTING"
    }
}

fn row_to_tracked_file(row: &Row) -> rusqlite::Result<TrackedFile> {
    let vv_json: String = row.get("local_version_vector")?;
    let local_version_vector = VersionVector::from_json_str(&vv_json).unwrap_or_default();
    Ok(TrackedFile {
        path: row.get("path")?,
        file_id: row.get("file_id")?,
        local_version_vector,
        checksum: row.get("checksum")?,
        size: row.get("size")?,
        mtime: row.get("mtime")?,
        status: row.get("status")?,
        conflict_status: row.get("conflict_status")?,
    })
}

pub struct LocalState {
    conn: Mutex<Connection>,
}

impl LocalState {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub async fn upsert_tracked_file(
        &self,
        path: &str,
        file_id: Option<&str>,
        version_vector: &VersionVector,
        checksum: &str,
        size: i64,
        mtime: i64,
        status: &str,
        conflict_status: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tracked_files (path, file_id, local_version_vector, checksum, size, mtime, status, conflict_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(path) DO UPDATE SET
               file_id = excluded.file_id,
               local_version_vector = excluded.local_version_vector,
               checksum = excluded.checksum,
               size = excluded.size,
               mtime = excluded.mtime,
               status = excluded.status,
               conflict_status = excluded.conflict_status,
               updated_at = datetime('now')",
            params![
                path,
                file_id,
                version_vector.to_json_string(),
                checksum,
                size,
                mtime,
                status,
                conflict_status
            ],
        )?;
        Ok(())
    }

    pub async fn find_tracked_file(&self, path: &str) -> Result<Option<TrackedFile>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM tracked_files WHERE path = ?1")?;
        let mut rows = stmt.query_map(params![path], row_to_tracked_file)?;
        Ok(rows.next().transpose()?)
    }

    pub async fn list_tracked_files(&self) -> Result<Vec<TrackedFile>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM tracked_files ORDER BY path")?;
        let rows = stmt.query_map([], row_to_tracked_file)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Mark a path PENDING — a local write the watcher observed that hasn't
    /// been uploaded yet. Creates the row if this is a brand new path;
    /// clears an existing tombstone, since a path being written to again is
    /// no longer a deletion.
    pub async fn mark_pending(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tracked_files (path, status) VALUES (?1, 'PENDING')
             ON CONFLICT(path) DO UPDATE SET status = 'PENDING', updated_at = datetime('now')",
            params![path],
        )?;
        Ok(())
    }

    /// Mark a path DELETED locally (tombstoned) without clearing the row —
    /// the tombstone itself is what stops a later scan from resurrecting a
    /// file the user intentionally deleted.
    pub async fn tombstone(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tracked_files SET status = 'DELETED', updated_at = datetime('now') WHERE path = ?1",
            params![path],
        )?;
        Ok(())
    }

    /// Tombstones older than `retention_secs` — candidates for purging once
    /// the caller also confirms the path is absent from disk.
    pub async fn list_aged_tombstones(&self, retention_secs: i64) -> Result<Vec<TrackedFile>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM tracked_files WHERE status = 'DELETED' AND updated_at <= datetime('now', ?1)",
        )?;
        let rows = stmt.query_map(params![format!("-{retention_secs} seconds")], row_to_tracked_file)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn remove_tracked_file(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM tracked_files WHERE path = ?1", params![path])?;
        Ok(())
    }

    pub async fn enqueue(&self, path: &str, operation: &str, priority: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sync_queue (path, operation, priority) VALUES (?1, ?2, ?3)",
            params![path, operation, priority],
        )?;
        Ok(())
    }

    /// Pop the highest-priority (lowest number), oldest-scheduled entry.
    /// Matches the queue's documented tie-break: priority, then
    /// `scheduled_at`, then insertion order.
    pub async fn dequeue(&self) -> Result<Option<QueueEntry>> {
        let conn = self.conn.lock().await;
        let entry = conn
            .query_row(
                "SELECT id, path, operation, priority, attempts FROM sync_queue
                 ORDER BY priority ASC, scheduled_at ASC, id ASC LIMIT 1",
                [],
                |row| {
                    Ok(QueueEntry {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        operation: row.get(2)?,
                        priority: row.get(3)?,
                        attempts: row.get(4)?,
                    })
                },
            )
            .ok();
        if let Some(entry) = &entry {
            conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![entry.id])?;
        }
        Ok(entry)
    }

    pub async fn requeue_with_backoff(&self, entry: &QueueEntry, delay_secs: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sync_queue (path, operation, priority, scheduled_at, attempts)
             VALUES (?1, ?2, ?3, datetime('now', ?4), ?5)",
            params![
                entry.path,
                entry.operation,
                entry.priority,
                format!("+{delay_secs} seconds"),
                entry.attempts + 1
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub path: String,
    pub operation: String,
    pub priority: i64,
    pub attempts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = LocalState::open(&dir.path().join("state.db")).unwrap();
        let vv = VersionVector::new().increment("client-a");
        state
            .upsert_tracked_file("notes.md", Some("file-1"), &vv, "abc123", 10, 1000, "SYNCED", "NONE")
            .await
            .unwrap();
        let found = state.find_tracked_file("notes.md").await.unwrap().unwrap();
        assert_eq!(found.checksum, "abc123");
        assert_eq!(found.local_version_vector.get("client-a"), 1);
    }

    #[tokio::test]
    async fn tombstone_marks_deleted_without_removing_row() {
        let dir = tempfile::tempdir().unwrap();
        let state = LocalState::open(&dir.path().join("state.db")).unwrap();
        state
            .upsert_tracked_file("notes.md", None, &VersionVector::new(), "", 0, 0, "SYNCED", "NONE")
            .await
            .unwrap();
        state.tombstone("notes.md").await.unwrap();
        let found = state.find_tracked_file("notes.md").await.unwrap().unwrap();
        assert!(found.is_deleted());
    }

    #[tokio::test]
    async fn dequeue_respects_priority_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let state = LocalState::open(&dir.path().join("state.db")).unwrap();
        state.enqueue("a.txt", "UPLOAD", 3).await.unwrap();
        state.enqueue("b.txt", "DELETE", 1).await.unwrap();
        state.enqueue("c.txt", "DOWNLOAD", 4).await.unwrap();

        let first = state.dequeue().await.unwrap().unwrap();
        assert_eq!(first.path, "b.txt");
        let second = state.dequeue().await.unwrap().unwrap();
        assert_eq!(second.path, "a.txt");
    }
}
