//! HTTP client for the sync server's REST surface.
//!
//! One `reqwest::Client` shared across calls (connection pooling), bearer
//! token attached per-request rather than baked into the client so a token
//! refresh doesn't require rebuilding it.

use serde::{Deserialize, Serialize};

use crate::utils::errors::{ClientError, Result};
use crate::version_vector::VersionVector;

#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub user_id: String,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileSummary {
    pub id: String,
    pub path: String,
    pub size: i64,
    pub checksum: String,
    pub version_vector: serde_json::Value,
    pub conflict_status: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub version_vector: serde_json::Value,
    pub conflicting: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChunkedUploadSession {
    pub session_id: String,
    pub chunk_size: u64,
    pub total_chunks: i64,
}

#[derive(Debug, Deserialize)]
pub struct ChunkUploadStatus {
    #[serde(rename = "receivedChunks")]
    pub received_chunks: Vec<u64>,
    #[serde(rename = "totalChunks")]
    pub total_chunks: u64,
    pub complete: bool,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<AuthResponse> {
        self.post_json("/auth/register", &Credentials { username, password }).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse> {
        self.post_json("/auth/login", &Credentials { username, password }).await
    }

    pub async fn refresh(&self, token: &str) -> Result<AuthResponse> {
        let response = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    pub async fn logout(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/auth/logout", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check_status(&response)?;
        Ok(())
    }

    pub async fn list_files(&self, token: &str) -> Result<Vec<FileSummary>> {
        let response = self
            .http
            .get(format!("{}/files/", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upload(
        &self,
        token: &str,
        path: &str,
        base_version_vector: &VersionVector,
        client_id: &str,
        data: Vec<u8>,
    ) -> Result<UploadResponse> {
        let response = self
            .http
            .post(format!("{}/files/upload", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("path", path),
                ("base_version_vector", &base_version_vector.to_json_string()),
                ("client_id", client_id),
            ])
            .body(data)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    pub async fn download(&self, token: &str, file_id: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(format!("{}/files/{file_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check_status(&response)?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn file_metadata(&self, token: &str, file_id: &str) -> Result<FileSummary> {
        let response = self
            .http
            .get(format!("{}/files/{file_id}/metadata", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    pub async fn delete(
        &self,
        token: &str,
        file_id: &str,
        base_version_vector: &VersionVector,
        client_id: &str,
    ) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/files/{file_id}", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("base_version_vector", base_version_vector.to_json_string()),
                ("client_id", client_id.to_string()),
            ])
            .send()
            .await?;
        Self::check_status(&response)?;
        Ok(())
    }

    pub async fn initiate_chunked_upload(
        &self,
        token: &str,
        path: &str,
        total_size: u64,
        base_version_vector: &VersionVector,
        client_id: &str,
    ) -> Result<ChunkedUploadSession> {
        #[derive(Serialize)]
        struct Body<'a> {
            path: &'a str,
            total_size: u64,
            base_version_vector: serde_json::Value,
            client_id: &'a str,
        }
        let response = self
            .http
            .post(format!("{}/files/upload/initiate", self.base_url))
            .bearer_auth(token)
            .json(&Body {
                path,
                total_size,
                base_version_vector: base_version_vector.to_json(),
                client_id,
            })
            .send()
            .await?;
        Self::parse_json(response).await
    }

    pub async fn upload_chunk(
        &self,
        token: &str,
        session_id: &str,
        index: u64,
        data: Vec<u8>,
    ) -> Result<ChunkUploadStatus> {
        let response = self
            .http
            .post(format!("{}/files/upload/{session_id}/chunk/{index}", self.base_url))
            .bearer_auth(token)
            .body(data)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    pub async fn chunked_upload_status(&self, token: &str, session_id: &str) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/files/upload/{session_id}/status", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    pub async fn download_chunk(&self, token: &str, file_id: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let last_byte = offset + length.saturating_sub(1);
        let response = self
            .http
            .get(format!("{}/files/{file_id}/download-chunked", self.base_url))
            .bearer_auth(token)
            .header(reqwest::header::RANGE, format!("bytes={offset}-{last_byte}"))
            .send()
            .await?;
        Self::check_status(&response)?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn changes_since(&self, token: &str, since: i64) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/sync/changes", self.base_url))
            .bearer_auth(token)
            .query(&[("since", since)])
            .send()
            .await?;
        Self::parse_json(response).await
    }

    async fn post_json<T: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    fn check_status(response: &reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::AuthRequired(status.to_string()));
        }
        if status == reqwest::StatusCode::CONFLICT {
            return Err(ClientError::StaleUpload(status.to_string()));
        }
        if status == reqwest::StatusCode::GONE {
            return Err(ClientError::SessionExpired(status.to_string()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::QuotaExceeded(status.to_string()));
        }
        if status.is_server_error() {
            return Err(ClientError::Transient(status.to_string()));
        }
        Err(ClientError::Malformed(format!("unexpected status {status}")))
    }

    async fn parse_json<R: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<R> {
        Self::check_status(&response)?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Malformed(e.to_string()))
    }
}
