use rusqlite::{params, Connection, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::models::version_vector::VersionVector;

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub user_id: String,
    pub path: String,
    pub current_version_vector: String, // stored as JSON text
    pub size: i64,
    pub checksum: String,
    pub status: String,
    pub conflict_status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl FileRecord {
    pub fn version_vector(&self) -> VersionVector {
        let value: serde_json::Value =
            serde_json::from_str(&self.current_version_vector).unwrap_or(serde_json::json!({}));
        VersionVector::from_json(&value).unwrap_or_default()
    }

    pub fn is_deleted(&self) -> bool {
        self.status == "DELETED"
    }

    pub fn is_conflicting(&self) -> bool {
        self.conflict_status == "CONFLICTING"
    }
}

fn row_to_record(row: &Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        path: row.get("path")?,
        current_version_vector: row.get("current_version_vector")?,
        size: row.get("size")?,
        checksum: row.get("checksum")?,
        status: row.get("status")?,
        conflict_status: row.get("conflict_status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn find_by_user_and_path(
    conn: &Connection,
    user_id: &str,
    path: &str,
) -> anyhow::Result<Option<FileRecord>> {
    let mut stmt =
        conn.prepare("SELECT * FROM file_records WHERE user_id = ?1 AND path = ?2")?;
    let mut rows = stmt.query_map(params![user_id, path], row_to_record)?;
    Ok(rows.next().transpose()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<FileRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM file_records WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_record)?;
    Ok(rows.next().transpose()?)
}

pub fn list_active_for_user(conn: &Connection, user_id: &str) -> anyhow::Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM file_records WHERE user_id = ?1 AND status = 'ACTIVE' ORDER BY path",
    )?;
    let rows = stmt.query_map(params![user_id], row_to_record)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn create(
    conn: &Connection,
    user_id: &str,
    path: &str,
    version_vector: &VersionVector,
    size: i64,
    checksum: &str,
) -> anyhow::Result<FileRecord> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO file_records (id, user_id, path, current_version_vector, size, checksum, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'ACTIVE')",
        params![id, user_id, path, version_vector.to_json().to_string(), size, checksum],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created file record"))
}

/// The only place `current_version_vector` is ever written after creation —
/// see [`crate::services::reconciliation`] for why that matters.
pub fn update_version(
    conn: &Connection,
    id: &str,
    version_vector: &VersionVector,
    size: i64,
    checksum: &str,
    status: &str,
    conflict_status: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE file_records
         SET current_version_vector = ?1, size = ?2, checksum = ?3, status = ?4, conflict_status = ?5, updated_at = datetime('now')
         WHERE id = ?6",
        params![version_vector.to_json().to_string(), size, checksum, status, conflict_status, id],
    )?;
    Ok(())
}
