use rusqlite::{params, Connection, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct SyncEvent {
    pub id: String,
    pub user_id: String,
    pub file_id: String,
    pub path: String,
    pub event_type: String,
    pub version_vector: String,
    pub originating_client_id: String,
    pub sequence: i64,
    pub created_at: String,
}

fn row_to_event(row: &Row) -> rusqlite::Result<SyncEvent> {
    Ok(SyncEvent {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        file_id: row.get("file_id")?,
        path: row.get("path")?,
        event_type: row.get("event_type")?,
        version_vector: row.get("version_vector")?,
        originating_client_id: row.get("originating_client_id")?,
        sequence: row.get("sequence")?,
        created_at: row.get("created_at")?,
    })
}

fn next_sequence(conn: &Connection, user_id: &str) -> anyhow::Result<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(sequence) FROM sync_events WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0) + 1)
}

pub fn record(
    conn: &Connection,
    user_id: &str,
    file_id: &str,
    path: &str,
    event_type: &str,
    version_vector_json: &str,
    originating_client_id: &str,
) -> anyhow::Result<SyncEvent> {
    let id = Uuid::new_v4().to_string();
    let sequence = next_sequence(conn, user_id)?;
    conn.execute(
        "INSERT INTO sync_events (id, user_id, file_id, path, event_type, version_vector, originating_client_id, sequence)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![id, user_id, file_id, path, event_type, version_vector_json, originating_client_id, sequence],
    )?;
    let mut stmt = conn.prepare("SELECT * FROM sync_events WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_event)?;
    rows.next()
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("Failed to retrieve recorded sync event"))
}

/// Changes strictly after `since_sequence`, used by `/sync/changes`.
pub fn find_since(
    conn: &Connection,
    user_id: &str,
    since_sequence: i64,
    limit: i64,
) -> anyhow::Result<Vec<SyncEvent>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM sync_events WHERE user_id = ?1 AND sequence > ?2 ORDER BY sequence ASC LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![user_id, since_sequence, limit], row_to_event)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
