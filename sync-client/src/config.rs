//! Client configuration.
//!
//! Loaded from a flat `key=value` properties file rather than the nested
//! TOML the server side uses — this mirrors the wire format the sync
//! protocol itself uses for its small bits of persisted state, and keeps the
//! on-disk file trivial for a user (or an installer script) to hand-edit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::utils::errors::{ClientError, Result};

/// Files below this size go through the simple `/files/upload` endpoint;
/// at or above it, the chunked upload flow is used instead. Matches the
/// server's `max_simple_upload_size` default.
pub const CHUNK_THRESHOLD: u64 = 8 * 1024 * 1024;
/// Size of each chunk sent to the chunked upload endpoint.
pub const CHUNK_SIZE: u64 = 4 * 1024 * 1024;
/// Chunks are never split smaller than this, even for a file just over
/// `CHUNK_THRESHOLD`.
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;
/// Upper bound on chunks uploaded/downloaded in parallel for one transfer.
pub const MAX_CONCURRENT_CHUNKS: usize = 3;
/// Per-chunk retry budget before the whole transfer is abandoned.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;
/// Base delay for exponential backoff between chunk retry attempts.
pub const RETRY_DELAY_MS: u64 = 1000;
/// How long a DELETED tombstone is kept before it becomes eligible for
/// purging (and only then if the path is also absent from disk) — long
/// enough for the delete to propagate to every other device on the account.
pub const TOMBSTONE_RETENTION_SECS: i64 = 3600;
/// Cadence of the background job that purges aged tombstones.
pub const TOMBSTONE_AGING_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub sync_path: PathBuf,
    pub client_id: String,
    pub username: String,
    pub auth_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Interval, in seconds, between full reconciliation passes.
    pub sync_interval_secs: u64,
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let props = parse_properties(&content);
        Self::from_properties(&props)
    }

    fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let server_url = props
            .get("server.url")
            .cloned()
            .ok_or_else(|| ClientError::Config("missing required key: server.url".into()))?;
        let sync_path = props
            .get("sync.path")
            .cloned()
            .ok_or_else(|| ClientError::Config("missing required key: sync.path".into()))?;
        let username = props
            .get("user.username")
            .cloned()
            .ok_or_else(|| ClientError::Config("missing required key: user.username".into()))?;
        let client_id = props
            .get("client.id")
            .cloned()
            .unwrap_or_else(|| crate::identity::derive_client_id(&username));

        Ok(Self {
            server_url,
            sync_path: PathBuf::from(sync_path),
            client_id,
            username,
            auth_token: props.get("auth.token").cloned(),
            refresh_token: props.get("auth.refresh_token").cloned(),
            sync_interval_secs: props
                .get("sync.interval")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        })
    }

    /// Write this configuration back out in the same key=value format it was
    /// read in, preserving a fresh `auth.token` after login/refresh.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("# sync-client configuration\n");
        out.push_str(&format!("server.url={}\n", self.server_url));
        out.push_str(&format!("sync.path={}\n", self.sync_path.display()));
        out.push_str(&format!("client.id={}\n", self.client_id));
        out.push_str(&format!("user.username={}\n", self.username));
        if let Some(token) = &self.auth_token {
            out.push_str(&format!("auth.token={token}\n"));
        }
        if let Some(refresh) = &self.refresh_token {
            out.push_str(&format!("auth.refresh_token={refresh}\n"));
        }
        out.push_str(&format!("sync.interval={}\n", self.sync_interval_secs));
        std::fs::write(path, out)?;
        Ok(())
    }
}

/// Parses a `.properties`-style file: one `key=value` pair per line,
/// `#`-prefixed comments, blank lines ignored. Leading/trailing whitespace
/// around both key and value is trimmed.
fn parse_properties(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs_and_skips_comments() {
        let content = "\
# a comment
server.url=http://localhost:3000

sync.path=/home/alice/SyncFolder
user.username=alice
sync.interval=45
";
        let props = parse_properties(content);
        assert_eq!(props.get("server.url").unwrap(), "http://localhost:3000");
        assert_eq!(props.get("sync.interval").unwrap(), "45");
        assert_eq!(props.len(), 4);
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let props = HashMap::new();
        assert!(matches!(
            ClientConfig::from_properties(&props),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn client_id_defaults_to_derived_identity_when_absent() {
        let mut props = HashMap::new();
        props.insert("server.url".into(), "http://localhost:3000".into());
        props.insert("sync.path".into(), "/tmp/sync".into());
        props.insert("user.username".into(), "alice".into());
        let config = ClientConfig::from_properties(&props).unwrap();
        assert_eq!(config.client_id, crate::identity::derive_client_id("alice"));
    }

    #[test]
    fn round_trips_through_save_and_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.properties");
        let config = ClientConfig {
            server_url: "http://localhost:3000".into(),
            sync_path: PathBuf::from("/tmp/sync"),
            client_id: "c-1".into(),
            username: "alice".into(),
            auth_token: Some("tok".into()),
            refresh_token: None,
            sync_interval_secs: 30,
        };
        config.save(&path).unwrap();
        let reloaded = ClientConfig::from_file(&path).unwrap();
        assert_eq!(reloaded.server_url, config.server_url);
        assert_eq!(reloaded.client_id, config.client_id);
        assert_eq!(reloaded.auth_token, config.auth_token);
    }
}
