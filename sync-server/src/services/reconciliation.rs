//! The single place `file_records.current_version_vector` is mutated.
//!
//! Every upload, replace, and delete funnels through here. Centralizing the
//! mutation is a deliberate fix: scattering it across multiple call sites is
//! exactly the kind of bug class version vectors exist to prevent, and having
//! more than one path that could bump the vector defeats that.

use rusqlite::Connection;

use crate::content_store::ContentStore;
use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::version_vector::VersionVector;
use crate::models::{file_record, file_version, sync_event};

pub struct UploadOutcome {
    pub file_id: String,
    pub version_vector: VersionVector,
    pub conflicting: bool,
}

/// Upload (or create) a file. `base_version_vector` is the client's vector
/// *after* it already incremented its own counter (§4.6 step 4 — the client
/// bumps before it ever calls us), so this function never increments on its
/// own; it only decides whether to accept `base_version_vector` as-is,
/// reject it as stale, or merge it with the server's vector on a conflict:
///
/// - no existing record (or the existing one is a tombstone being
///   recreated) → accept, `currentVersionVector := base_version_vector`
///   (falling back to a single increment only if the client sent an empty
///   vector, e.g. its very first write ever).
/// - `base_version_vector` equal to the server's current vector → no-op,
///   return the existing record unchanged (an exact retry of an already
///   -applied write).
/// - `base_version_vector` dominates the server's → accept,
///   `currentVersionVector := base_version_vector`.
/// - the server's vector dominates the client's → reject as stale; the
///   client hasn't seen the server's latest write yet.
/// - neither dominates (concurrent edit) → accept anyway, but flag: store the
///   new bytes as current, set `conflict_status = CONFLICTING`, and set
///   `currentVersionVector` to the pointwise max of both vectors so neither
///   side's causal history is lost.
///
/// This is the only function that ever writes `file_records.current_version_vector`.
pub async fn upload_with_version_vector(
    db: &DbPool,
    store: &ContentStore,
    user_id: &str,
    path: &str,
    base_version_vector: &VersionVector,
    client_id: &str,
    data: Vec<u8>,
) -> Result<UploadOutcome, AppError> {
    let checksum = ContentStore::checksum(&data);
    let size = data.len() as i64;

    let db2 = db.clone();
    let (user_id_o, path_o) = (user_id.to_string(), path.to_string());
    let existing = tokio::task::spawn_blocking(move || {
        let conn = db2.get()?;
        file_record::find_by_user_and_path(&conn, &user_id_o, &path_o)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?;

    let fresh_vector = || {
        if base_version_vector.is_empty() {
            base_version_vector.increment(client_id)
        } else {
            base_version_vector.clone()
        }
    };

    let mut conflicting = false;
    let next_vector = match &existing {
        None => fresh_vector(),
        Some(record) if record.is_deleted() => fresh_vector(),
        Some(record) => {
            let current = record.version_vector();
            if current.equal(base_version_vector) {
                return Ok(UploadOutcome {
                    file_id: record.id.clone(),
                    version_vector: current,
                    conflicting: record.is_conflicting(),
                });
            } else if base_version_vector.dominates(&current) {
                base_version_vector.clone()
            } else if current.dominates(base_version_vector) {
                return Err(AppError::StaleUpload(format!(
                    "file {path} was modified since base version vector was captured"
                )));
            } else {
                // Concurrent edit: neither side's vector dominates the
                // other's. Accept this write rather than discard it, but
                // flag the record so the arbiter gets invoked on every
                // client, and merge rather than replace so the resulting
                // vector still dominates both inputs.
                conflicting = true;
                current.merge(base_version_vector)
            }
        }
    };

    let version_id = uuid::Uuid::new_v4().to_string();
    let storage_path = store
        .put(user_id, &version_id, &data)
        .await
        .map_err(AppError::Internal)?;

    let db3 = db.clone();
    let (user_id_o, path_o, client_id_o) =
        (user_id.to_string(), path.to_string(), client_id.to_string());
    let next_vector_json = next_vector.to_json().to_string();
    let storage_path_str = storage_path.to_string_lossy().into_owned();
    let outcome = tokio::task::spawn_blocking(move || {
        let conn = db3.get()?;
        persist_upload(
            &conn,
            &user_id_o,
            &path_o,
            &next_vector_json,
            size,
            &checksum,
            &storage_path_str,
            &client_id_o,
            conflicting,
        )
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(AppError::Internal)?;

    Ok(UploadOutcome {
        file_id: outcome,
        version_vector: next_vector,
        conflicting,
    })
}

#[allow(clippy::too_many_arguments)]
fn persist_upload(
    conn: &Connection,
    user_id: &str,
    path: &str,
    version_vector_json: &str,
    size: i64,
    checksum: &str,
    storage_path: &str,
    client_id: &str,
    conflicting: bool,
) -> anyhow::Result<String> {
    let existing = file_record::find_by_user_and_path(conn, user_id, path)?;
    let vv: crate::models::version_vector::VersionVector =
        crate::models::version_vector::VersionVector::from_json(&serde_json::from_str(version_vector_json)?)?;
    let conflict_status = if conflicting { "CONFLICTING" } else { "NONE" };

    let file_id = match existing {
        Some(record) => {
            file_record::update_version(conn, &record.id, &vv, size, checksum, "ACTIVE", conflict_status)?;
            record.id
        }
        None => {
            let record = file_record::create(conn, user_id, path, &vv, size, checksum)?;
            record.id
        }
    };

    file_version::create(conn, &file_id, version_vector_json, size, checksum, storage_path, client_id)?;
    let event_type = if conflicting { "CONFLICT" } else { "UPLOAD" };
    sync_event::record(conn, user_id, &file_id, path, event_type, version_vector_json, client_id)?;

    Ok(file_id)
}

/// Mark a file DELETED. Like upload, this is the only place delete mutates
/// `current_version_vector` — the server never resurrects a tombstoned file
/// on its own, it only ever accepts a subsequent upload that recreates it.
pub async fn delete_with_version_vector(
    db: &DbPool,
    user_id: &str,
    path: &str,
    base_version_vector: &VersionVector,
    client_id: &str,
) -> Result<VersionVector, AppError> {
    let db2 = db.clone();
    let (user_id_o, path_o, client_id_o) =
        (user_id.to_string(), path.to_string(), client_id.to_string());
    let base_json = base_version_vector.to_json().to_string();

    let next_vector = tokio::task::spawn_blocking(move || -> anyhow::Result<VersionVector> {
        let conn = db2.get()?;
        let record = file_record::find_by_user_and_path(&conn, &user_id_o, &path_o)?
            .ok_or_else(|| anyhow::anyhow!("file not found"))?;

        let base: VersionVector = VersionVector::from_json(&serde_json::from_str(&base_json)?)?;
        let current = record.version_vector();
        if !current.equal(&base) {
            anyhow::bail!("stale delete");
        }

        let next = base.increment(&client_id_o);
        file_record::update_version(&conn, &record.id, &next, 0, "", "DELETED", "NONE")?;
        sync_event::record(
            &conn,
            &user_id_o,
            &record.id,
            &path_o,
            "DELETE",
            &next.to_json().to_string(),
            &client_id_o,
        )?;
        Ok(next)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
    .map_err(|e| {
        if e.to_string() == "stale delete" {
            AppError::StaleUpload(format!("file {path} was modified since base version vector was captured"))
        } else if e.to_string() == "file not found" {
            AppError::NotFound(format!("file {path} not found"))
        } else {
            AppError::Internal(e)
        }
    })?;

    Ok(next_vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;

    fn setup() -> (DbPool, ContentStore, tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let pool = create_pool(db_path.to_str().unwrap());
        migrate(&pool, dir.path(), &dir.path().join("files")).unwrap();
        let user_id = {
            let conn = pool.get().unwrap();
            crate::models::user::create(&conn, "alice", "hash").unwrap().id
        };
        let store = ContentStore::new(dir.path().join("files"));
        (pool, store, dir, user_id)
    }

    #[tokio::test]
    async fn first_upload_creates_record_with_incremented_vector() {
        let (pool, store, _dir, user_id) = setup();
        let outcome = upload_with_version_vector(
            &pool,
            &store,
            &user_id,
            "notes.md",
            &VersionVector::new(),
            "client-a",
            b"v0".to_vec(),
        )
        .await
        .unwrap();
        assert!(!outcome.conflicting);
        assert_eq!(outcome.version_vector.get("client-a"), 1);
    }

    #[tokio::test]
    async fn stale_upload_is_rejected_when_server_dominates() {
        let (pool, store, _dir, user_id) = setup();
        // `client-a` denotes one *account*, per spec's username-derived
        // identifier — two of its devices can race each other with the same
        // clientId. The first device commits twice in a row...
        let first = upload_with_version_vector(
            &pool,
            &store,
            &user_id,
            "notes.md",
            &VersionVector::new().increment("client-a"),
            "client-a",
            b"v0".to_vec(),
        )
        .await
        .unwrap();
        let second = upload_with_version_vector(
            &pool,
            &store,
            &user_id,
            "notes.md",
            &first.version_vector.increment("client-a"),
            "client-a",
            b"v1".to_vec(),
        )
        .await
        .unwrap();
        upload_with_version_vector(
            &pool,
            &store,
            &user_id,
            "notes.md",
            &second.version_vector.increment("client-a"),
            "client-a",
            b"v2".to_vec(),
        )
        .await
        .unwrap();

        // ...while a second device of the same account, still holding the
        // *first* commit's vector, increments from that stale base and is
        // now two commits behind — the server's vector fully dominates it.
        let stale = upload_with_version_vector(
            &pool,
            &store,
            &user_id,
            "notes.md",
            &first.version_vector.increment("client-a"),
            "client-a",
            b"v-stale".to_vec(),
        )
        .await;
        assert!(matches!(stale, Err(AppError::StaleUpload(_))));
    }

    #[tokio::test]
    async fn concurrent_edits_are_accepted_and_flagged_conflicting() {
        let (pool, store, _dir, user_id) = setup();
        let base = upload_with_version_vector(
            &pool,
            &store,
            &user_id,
            "notes.md",
            &VersionVector::new().increment("client-a"),
            "client-a",
            b"v0".to_vec(),
        )
        .await
        .unwrap()
        .version_vector;

        // A and B both edit from the same synced base, offline, each
        // incrementing only their own counter — the two uploads cross on
        // the wire with neither having seen the other's write.
        let from_a = upload_with_version_vector(
            &pool,
            &store,
            &user_id,
            "notes.md",
            &base.increment("client-a"),
            "client-a",
            b"vA".to_vec(),
        )
        .await
        .unwrap();
        assert!(!from_a.conflicting);

        let from_b = upload_with_version_vector(
            &pool,
            &store,
            &user_id,
            "notes.md",
            &base.increment("client-b"),
            "client-b",
            b"vB".to_vec(),
        )
        .await
        .unwrap();
        assert!(from_b.conflicting);
        assert!(from_b.version_vector.dominates(&from_a.version_vector));

        let conn = pool.get().unwrap();
        let record = file_record::find_by_user_and_path(&conn, &user_id, "notes.md")
            .unwrap()
            .unwrap();
        assert!(record.is_conflicting());
    }
}
