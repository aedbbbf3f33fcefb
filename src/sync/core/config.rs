//! Configuration for the sync engine.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::sync::core::errors::{SyncError, SyncResult};

/// Top-level configuration for the sync engine and its server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Work queue and worker pool settings.
    pub queue: QueueConfig,
    /// HTTP and real-time server settings.
    pub server: ServerConfig,
    /// Summarization settings.
    pub summary: SummaryConfig,
    /// Record storage settings.
    pub storage: StorageConfig,
    /// Indexing settings.
    pub index: IndexConfig,
}

impl SyncConfig {
    /// Build a configuration from the defaults overridden by `MINDTAPE_*`
    /// environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(workers) = env_parse("MINDTAPE_WORKERS")? {
            config.queue.workers = workers;
        }
        if let Some(poll) = env_parse("MINDTAPE_POLL_INTERVAL_MS")? {
            config.queue.poll_interval_ms = poll;
        }
        if let Some(limit) = env_parse("MINDTAPE_RETRY_LIMIT")? {
            config.queue.retry_limit = limit;
        }
        if let Some(timeout) = env_parse("MINDTAPE_SHUTDOWN_TIMEOUT_MS")? {
            config.queue.shutdown_timeout_ms = timeout;
        }
        if let Some(port) = env_parse("MINDTAPE_PORT")? {
            config.server.port = port;
        }
        if let Ok(api_key) = std::env::var("MINDTAPE_API_KEY") {
            config.server.api_key = api_key;
        }
        if let Some(max_chars) = env_parse("MINDTAPE_SUMMARY_MAX_CHARS")? {
            config.summary.max_chars = max_chars;
        }
        if let Ok(model) = std::env::var("MINDTAPE_OLLAMA_MODEL") {
            config.summary.model = model;
            config.summary.use_llm = true;
        }
        if let Ok(base_url) = std::env::var("MINDTAPE_OLLAMA_URL") {
            config.summary.base_url = Some(base_url);
        }
        if let Ok(path) = std::env::var("MINDTAPE_DATABASE_PATH") {
            config.storage.sqlite_path = Some(PathBuf::from(path));
        }
        if let Some(limit) = env_parse("MINDTAPE_BOOTSTRAP_LIMIT")? {
            config.storage.bootstrap_limit = limit;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> SyncResult<()> {
        if self.queue.workers == 0 {
            return Err(SyncError::InvalidConfig(
                "queue.workers must be > 0".to_string(),
            ));
        }

        if self.queue.poll_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "queue.poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.server.api_key.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "server.api_key must not be empty".to_string(),
            ));
        }

        if self.summary.max_chars == 0 {
            return Err(SyncError::InvalidConfig(
                "summary.max_chars must be > 0".to_string(),
            ));
        }

        if self.storage.bootstrap_limit == 0 {
            return Err(SyncError::InvalidConfig(
                "storage.bootstrap_limit must be > 0".to_string(),
            ));
        }

        if let Some(base_url) = &self.summary.base_url {
            Url::parse(base_url)?;
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> SyncResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SyncError::InvalidConfig(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}

/// Work queue settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Idle poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Retries allowed after the first failed attempt.
    pub retry_limit: u32,
    /// How long `stop` waits for in-flight items before aborting workers.
    pub shutdown_timeout_ms: u64,
}

impl QueueConfig {
    /// Idle poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Shutdown timeout as a [`Duration`].
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            poll_interval_ms: 500,
            retry_limit: 3,
            shutdown_timeout_ms: 5000,
        }
    }
}

/// HTTP and real-time server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Shared API key expected in `X-API-Key` and the WebSocket `token`.
    pub api_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            api_key: "dev-api-key-change-in-production".to_string(),
        }
    }
}

/// Summarization settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Max summary size in characters.
    pub max_chars: usize,
    /// Whether to use the LLM before falling back to the local summary.
    pub use_llm: bool,
    /// Ollama completion model name.
    pub model: String,
    /// Optional custom base URL.
    pub base_url: Option<String>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_chars: 200,
            use_llm: false,
            model: "ministral-3:8b-instruct-2512-q8_0".to_string(),
            base_url: None,
        }
    }
}

/// Storage configuration for memory records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path; records stay in memory when unset.
    pub sqlite_path: Option<PathBuf>,
    /// Memory table name.
    pub memory_table: String,
    /// Records returned by a bootstrap sync.
    pub bootstrap_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            memory_table: "memories".to_string(),
            bootstrap_limit: 50,
        }
    }
}

/// Indexing settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Characters of raw content included in the indexed text.
    pub content_chars: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            content_chars: 1000,
        }
    }
}
