use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub storage_base_path: PathBuf,
    pub log_level: String,

    /// Files at or above this size are rejected from the simple upload
    /// endpoint and must go through the chunked upload flow instead.
    pub max_simple_upload_size: u64,
    /// Size of each chunk a client is expected to send to the chunked
    /// upload endpoint.
    pub chunk_size: u64,
    /// Upper bound on concurrently in-progress chunked upload sessions,
    /// across all users.
    pub max_concurrent_chunk_sessions: usize,
    /// A chunked session that hasn't completed within this many hours is
    /// swept by the cleanup task and marked EXPIRED.
    pub chunk_session_timeout_hours: i64,

    pub jwt_secret: String,
    pub jwt_expiration_secs: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let server_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let data_dir = server_root.join("data");

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            db_path: data_dir.join("sync-server.db"),
            storage_base_path: PathBuf::from(
                std::env::var("STORAGE_BASE_PATH")
                    .unwrap_or_else(|_| data_dir.join("files").to_string_lossy().into_owned()),
            ),
            data_dir,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            max_simple_upload_size: std::env::var("MAX_SIMPLE_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8 * 1024 * 1024),
            chunk_size: std::env::var("CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4 * 1024 * 1024),
            max_concurrent_chunk_sessions: std::env::var("MAX_CONCURRENT_CHUNK_SESSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            chunk_session_timeout_hours: std::env::var("CHUNK_SESSION_TIMEOUT_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev-only-insecure-secret-change-me".into()),
            jwt_expiration_secs: std::env::var("JWT_EXPIRATION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24 * 3600),
        }
    }
}
