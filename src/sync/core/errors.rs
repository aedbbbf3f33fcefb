//! Error types for the sync engine.

use thiserror::Error;

/// Sync engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Invalid memory record content.
    #[error("invalid memory record: {0}")]
    InvalidRecord(String),
    /// The requested memory record does not exist.
    #[error("memory not found: {0}")]
    NotFound(String),
    /// A real-time session can no longer accept messages.
    #[error("session closed")]
    SessionClosed,
    /// A real-time message could not be delivered.
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// HTTP client error from Rig.
    #[error("http client error: {0}")]
    HttpClient(#[from] rig::http_client::Error),
    /// Completion error.
    #[error("completion error: {0}")]
    Completion(#[from] rig::completion::CompletionError),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Why a queued task attempt failed.
///
/// The cause decides whether the queue retries the item or drops it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The attempt may succeed if run again (collaborator unavailable, I/O).
    #[error("transient failure: {0}")]
    Transient(String),
    /// Running the task again cannot help (e.g. the record is gone).
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl TaskError {
    /// Whether the queue may schedule another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<SyncError> for TaskError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(_) | SyncError::InvalidRecord(_) => Self::Permanent(err.to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Outcome of a single task attempt.
pub type TaskResult = Result<(), TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_permanent() {
        let err = TaskError::from(SyncError::NotFound("abc".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_delivery_is_transient() {
        let err = TaskError::from(SyncError::Delivery("socket reset".to_string()));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "transient failure: delivery failed: socket reset");
    }
}
