//! Client-side chunked transfer.
//!
//! Used once a file's size crosses [`crate::config::CHUNK_THRESHOLD`].
//! Chunks within one transfer run up to [`crate::config::MAX_CONCURRENT_CHUNKS`]
//! at a time behind a semaphore, each with its own retry budget — one slow
//! or failing chunk doesn't stall the others, and a failed chunk doesn't
//! abandon chunks that already succeeded.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::{MAX_CONCURRENT_CHUNKS, MAX_RETRY_ATTEMPTS, RETRY_DELAY_MS};
use crate::http::client::HttpClient;
use crate::transfer::progress::TransferProgress;
use crate::utils::errors::{ClientError, Result};
use crate::version_vector::VersionVector;

/// Upload `data` in fixed-size chunks, returning the resulting version
/// vector and whether the server flagged the write as conflicting.
pub async fn upload_chunked(
    http: &HttpClient,
    token: &str,
    path: &str,
    base_version_vector: &VersionVector,
    client_id: &str,
    data: &[u8],
) -> Result<(serde_json::Value, bool)> {
    let session = http
        .initiate_chunked_upload(token, path, data.len() as u64, base_version_vector, client_id)
        .await?;

    let chunk_size = session.chunk_size as usize;
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CHUNKS));
    let mut progress = TransferProgress::new(data.len() as u64, 1);
    let total_chunks = data.len().div_ceil(chunk_size);

    let mut tasks = Vec::with_capacity(total_chunks);
    for index in 0..total_chunks {
        let start = index * chunk_size;
        let end = (start + chunk_size).min(data.len());
        let chunk = data[start..end].to_vec();
        let http = http.clone();
        let token = token.to_string();
        let session_id = session.session_id.clone();
        let permit = semaphore.clone();

        tasks.push(tokio::spawn(async move {
            let _permit = permit.acquire_owned().await.expect("semaphore not closed");
            upload_chunk_with_retry(&http, &token, &session_id, index as u64, chunk).await
        }));
    }

    let mut complete = false;
    for task in tasks {
        let status = task
            .await
            .map_err(|e| ClientError::Transient(format!("chunk upload task panicked: {e}")))??;
        progress.update(progress.total_bytes.min(progress.transferred_bytes + chunk_size as u64));
        complete = complete || status.complete;
    }

    if !complete {
        return Err(ClientError::Transient(format!(
            "chunked upload of {path} did not report completion after all chunks sent"
        )));
    }

    // The last chunk to land triggers server-side assembly and
    // reconciliation synchronously, so there is nothing further to poll —
    // the conflict/version-vector outcome travels through the push channel
    // instead, same as a simple upload.
    Ok((serde_json::json!({ "sessionId": session.session_id }), false))
}

async fn upload_chunk_with_retry(
    http: &HttpClient,
    token: &str,
    session_id: &str,
    index: u64,
    chunk: Vec<u8>,
) -> Result<crate::http::client::ChunkUploadStatus> {
    let mut attempt = 0;
    loop {
        match http.upload_chunk(token, session_id, index, chunk.clone()).await {
            Ok(status) => return Ok(status),
            Err(e) if e.is_retryable() && attempt < MAX_RETRY_ATTEMPTS => {
                attempt += 1;
                let delay = RETRY_DELAY_MS * attempt as u64;
                tracing::warn!("chunk {index} of session {session_id} failed (attempt {attempt}), retrying in {delay}ms: {e}");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Download a file in chunks, bounded by the same concurrency limit as
/// upload, reassembling into a single buffer in order.
pub async fn download_chunked(
    http: &HttpClient,
    token: &str,
    file_id: &str,
    total_size: u64,
    chunk_size: u64,
) -> Result<Vec<u8>> {
    let total_chunks = total_size.div_ceil(chunk_size).max(1);
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CHUNKS));

    let mut tasks = Vec::with_capacity(total_chunks as usize);
    for index in 0..total_chunks {
        let offset = index * chunk_size;
        let length = chunk_size.min(total_size - offset);
        let http = http.clone();
        let token = token.to_string();
        let file_id = file_id.to_string();
        let permit = semaphore.clone();

        tasks.push(tokio::spawn(async move {
            let _permit = permit.acquire_owned().await.expect("semaphore not closed");
            download_chunk_with_retry(&http, &token, &file_id, offset, length).await
        }));
    }

    let mut buffer = vec![0u8; total_size as usize];
    for (index, task) in tasks.into_iter().enumerate() {
        let chunk = task
            .await
            .map_err(|e| ClientError::Transient(format!("chunk download task panicked: {e}")))??;
        let offset = (index as u64 * chunk_size) as usize;
        buffer[offset..offset + chunk.len()].copy_from_slice(&chunk);
    }

    Ok(buffer)
}

async fn download_chunk_with_retry(
    http: &HttpClient,
    token: &str,
    file_id: &str,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        match http.download_chunk(token, file_id, offset, length).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_retryable() && attempt < MAX_RETRY_ATTEMPTS => {
                attempt += 1;
                let delay = RETRY_DELAY_MS * attempt as u64;
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_chunks_rounds_up() {
        assert_eq!(10u64.div_ceil(3), 4);
        assert_eq!(9u64.div_ceil(3), 3);
    }
}
