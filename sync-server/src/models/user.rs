use rusqlite::{params, Connection, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        password_hash: row.get("password_hash")?,
        created_at: row.get("created_at")?,
    })
}

pub fn find_by_username(conn: &Connection, username: &str) -> anyhow::Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE username = ?1")?;
    let mut rows = stmt.query_map(params![username], row_to_user)?;
    Ok(rows.next().transpose()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_user)?;
    Ok(rows.next().transpose()?)
}

pub fn create(conn: &Connection, username: &str, password_hash: &str) -> anyhow::Result<User> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users (id, username, password_hash) VALUES (?1, ?2, ?3)",
        params![id, username, password_hash],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created user"))
}
