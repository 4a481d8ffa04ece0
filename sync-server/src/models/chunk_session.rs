use rusqlite::{params, Connection, Row};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ChunkSession {
    pub id: String,
    pub user_id: String,
    pub path: String,
    pub total_size: i64,
    pub chunk_size: i64,
    pub total_chunks: i64,
    pub received_chunks: String, // JSON array of received chunk indices
    pub base_version_vector: String,
    pub client_id: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_session(row: &Row) -> rusqlite::Result<ChunkSession> {
    Ok(ChunkSession {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        path: row.get("path")?,
        total_size: row.get("total_size")?,
        chunk_size: row.get("chunk_size")?,
        total_chunks: row.get("total_chunks")?,
        received_chunks: row.get("received_chunks")?,
        base_version_vector: row.get("base_version_vector")?,
        client_id: row.get("client_id")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn create(
    conn: &Connection,
    id: &str,
    user_id: &str,
    path: &str,
    total_size: i64,
    chunk_size: i64,
    total_chunks: i64,
    base_version_vector_json: &str,
    client_id: &str,
) -> anyhow::Result<ChunkSession> {
    conn.execute(
        "INSERT INTO chunk_sessions (id, user_id, path, total_size, chunk_size, total_chunks, received_chunks, base_version_vector, client_id, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, '[]', ?7, ?8, 'IN_PROGRESS')",
        params![id, user_id, path, total_size, chunk_size, total_chunks, base_version_vector_json, client_id],
    )?;
    find_by_id(conn, id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created chunk session"))
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<ChunkSession>> {
    let mut stmt = conn.prepare("SELECT * FROM chunk_sessions WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_session)?;
    Ok(rows.next().transpose()?)
}

pub fn count_active_for_user(conn: &Connection, user_id: &str) -> anyhow::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM chunk_sessions WHERE user_id = ?1 AND status = 'IN_PROGRESS'",
        params![user_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn update_received_chunks(
    conn: &Connection,
    id: &str,
    received_chunks_json: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE chunk_sessions SET received_chunks = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![received_chunks_json, id],
    )?;
    Ok(())
}

pub fn update_status(conn: &Connection, id: &str, status: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE chunk_sessions SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![status, id],
    )?;
    Ok(())
}

pub fn find_expired(conn: &Connection, timeout_hours: i64) -> anyhow::Result<Vec<ChunkSession>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM chunk_sessions
         WHERE status = 'IN_PROGRESS'
           AND updated_at < datetime('now', ?1)",
    )?;
    let cutoff = format!("-{} hours", timeout_hours);
    let rows = stmt.query_map(params![cutoff], row_to_session)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn list_active_for_user(conn: &Connection, user_id: &str) -> anyhow::Result<Vec<ChunkSession>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM chunk_sessions WHERE user_id = ?1 AND status = 'IN_PROGRESS' ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id], row_to_session)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}
