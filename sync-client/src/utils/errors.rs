//! Error kinds for the sync client, shaped to match the decisions the
//! sync engine and conflict arbiter need to make — not just "what went
//! wrong" but "what should retry, and how".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("local state store error: {0}")]
    LocalState(#[from] rusqlite::Error),

    /// The server rejected the request for lack of (or an expired) bearer
    /// token. The caller should re-authenticate and retry.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The server's `current_version_vector` for this path has moved since
    /// the local `baseVersionVector` was captured — the upload or delete
    /// was rejected rather than silently discarding a concurrent write.
    /// The caller should re-reconcile this path before retrying.
    #[error("stale upload, path has changed on the server: {0}")]
    StaleUpload(String),

    /// The server accepted the write but flagged it as concurrent with
    /// another client's edit. Not a failure — a signal to invoke the
    /// conflict arbiter.
    #[error("conflicting edit: {0}")]
    Conflict(String),

    /// A chunked upload/download session has been swept by the server's
    /// expiry sweep and no longer exists.
    #[error("chunk session expired: {0}")]
    SessionExpired(String),

    /// A chunked session id the client holds locally is unknown to the
    /// server (e.g. after a server restart without durable session state).
    #[error("chunk session missing: {0}")]
    SessionMissing(String),

    /// The server is currently refusing more work from this client (too
    /// many in-flight chunk sessions). Back off and retry later.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Transient failures worth an automatic retry: connection refused,
    /// timeouts, 5xx responses.
    #[error("transient error, will retry: {0}")]
    Transient(String),

    /// A response from the server didn't parse into the shape expected —
    /// never worth retrying as-is.
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Whether the sync engine should requeue the task that produced this
    /// error rather than drop it after logging.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transient(_) | ClientError::QuotaExceeded(_) | ClientError::Http(_)
        )
    }
}
