use crate::db::connection::DbPool;
use std::fs;
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL UNIQUE,
  password_hash TEXT NOT NULL,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS file_records (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  path TEXT NOT NULL,
  current_version_vector TEXT NOT NULL DEFAULT '{}',
  size INTEGER NOT NULL DEFAULT 0,
  checksum TEXT NOT NULL DEFAULT '',
  status TEXT NOT NULL DEFAULT 'ACTIVE' CHECK(status IN ('ACTIVE','DELETED')),
  conflict_status TEXT NOT NULL DEFAULT 'NONE' CHECK(conflict_status IN ('NONE','CONFLICTING')),
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  UNIQUE(user_id, path)
);

CREATE TABLE IF NOT EXISTS file_versions (
  id TEXT PRIMARY KEY,
  file_id TEXT NOT NULL REFERENCES file_records(id) ON DELETE CASCADE,
  version_vector TEXT NOT NULL DEFAULT '{}',
  size INTEGER NOT NULL DEFAULT 0,
  checksum TEXT NOT NULL DEFAULT '',
  storage_path TEXT NOT NULL,
  uploaded_by_client_id TEXT NOT NULL,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS sync_events (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  file_id TEXT NOT NULL,
  path TEXT NOT NULL,
  event_type TEXT NOT NULL CHECK(event_type IN ('UPLOAD','DELETE','REPLACE','CONFLICT')),
  version_vector TEXT NOT NULL DEFAULT '{}',
  originating_client_id TEXT NOT NULL,
  sequence INTEGER NOT NULL,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS chunk_sessions (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  path TEXT NOT NULL,
  total_size INTEGER NOT NULL,
  chunk_size INTEGER NOT NULL,
  total_chunks INTEGER NOT NULL,
  received_chunks TEXT NOT NULL DEFAULT '[]',
  base_version_vector TEXT NOT NULL DEFAULT '{}',
  client_id TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'IN_PROGRESS' CHECK(status IN ('IN_PROGRESS','COMPLETED','FAILED','EXPIRED')),
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_file_records_user_id ON file_records(user_id);
CREATE INDEX IF NOT EXISTS idx_file_records_user_path ON file_records(user_id, path);
CREATE INDEX IF NOT EXISTS idx_file_versions_file_id ON file_versions(file_id);
CREATE INDEX IF NOT EXISTS idx_sync_events_user_sequence ON sync_events(user_id, sequence);
CREATE INDEX IF NOT EXISTS idx_chunk_sessions_user_id ON chunk_sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_chunk_sessions_status ON chunk_sessions(status);
"#;

pub fn migrate(pool: &DbPool, data_dir: &Path, storage_base_path: &Path) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    fs::create_dir_all(data_dir)?;
    fs::create_dir_all(storage_base_path)?;

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    let has_column = |table: &str, column: &str| -> bool {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        columns.contains(&column.to_string())
    };

    if !has_column("file_records", "conflict_status") {
        conn.execute_batch(
            "ALTER TABLE file_records ADD COLUMN conflict_status TEXT NOT NULL DEFAULT 'NONE'",
        )?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
