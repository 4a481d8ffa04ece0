use rusqlite::{params, Connection, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct FileVersion {
    pub id: String,
    pub file_id: String,
    pub version_vector: String,
    pub size: i64,
    pub checksum: String,
    pub storage_path: String,
    pub uploaded_by_client_id: String,
    pub created_at: String,
}

fn row_to_version(row: &Row) -> rusqlite::Result<FileVersion> {
    Ok(FileVersion {
        id: row.get("id")?,
        file_id: row.get("file_id")?,
        version_vector: row.get("version_vector")?,
        size: row.get("size")?,
        checksum: row.get("checksum")?,
        storage_path: row.get("storage_path")?,
        uploaded_by_client_id: row.get("uploaded_by_client_id")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create(
    conn: &Connection,
    file_id: &str,
    version_vector_json: &str,
    size: i64,
    checksum: &str,
    storage_path: &str,
    uploaded_by_client_id: &str,
) -> anyhow::Result<FileVersion> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO file_versions (id, file_id, version_vector, size, checksum, storage_path, uploaded_by_client_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, file_id, version_vector_json, size, checksum, storage_path, uploaded_by_client_id],
    )?;
    let mut stmt = conn.prepare("SELECT * FROM file_versions WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_version)?;
    rows.next()
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created file version"))
}

pub fn find_by_file_id(conn: &Connection, file_id: &str) -> anyhow::Result<Vec<FileVersion>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM file_versions WHERE file_id = ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![file_id], row_to_version)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_latest(conn: &Connection, file_id: &str) -> anyhow::Result<Option<FileVersion>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM file_versions WHERE file_id = ?1 ORDER BY created_at DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![file_id], row_to_version)?;
    Ok(rows.next().transpose()?)
}
