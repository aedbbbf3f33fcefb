//! Application state shared across all request handlers.

use std::sync::Arc;

use tracing::info;

use crate::sync::core::config::SyncConfig;
use crate::sync::core::errors::SyncResult;
use crate::sync::engine::orchestrator::SyncOrchestrator;
use crate::sync::indexing::indexer::InMemoryIndexer;
use crate::sync::queue::task_queue::TaskQueue;
use crate::sync::realtime::registry::ConnectionRegistry;
use crate::sync::storage::memory_store::{InMemoryMemoryStore, MemoryStore};
use crate::sync::storage::sqlite_store::SqliteMemoryStore;
use crate::sync::summarization::fallback::{FallbackSummarizer, Summarizer};
use crate::sync::summarization::llm_summarizer::OllamaSummarizer;

/// Shared application state.
pub struct AppState {
    /// Sync engine entry point.
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Key expected in `X-API-Key` and the real-time `token` parameter.
    pub api_key: String,
}

impl AppState {
    /// Wrap an already built orchestrator.
    #[must_use]
    pub fn new(orchestrator: Arc<SyncOrchestrator>, api_key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            api_key: api_key.into(),
        })
    }

    /// Build every service from configuration. The queue is left stopped.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the Ollama
    /// client cannot be created.
    pub async fn from_config(config: &SyncConfig) -> SyncResult<Arc<Self>> {
        let store: Arc<dyn MemoryStore> = if config.storage.sqlite_path.is_some() {
            info!(path = ?config.storage.sqlite_path, "Using SQLite record store");
            Arc::new(SqliteMemoryStore::new(&config.storage).await?)
        } else {
            info!("Using in-memory record store");
            Arc::new(InMemoryMemoryStore::new())
        };

        let summarizer: Arc<dyn Summarizer> = if config.summary.use_llm {
            info!(model = %config.summary.model, "Using Ollama summarizer");
            Arc::new(OllamaSummarizer::new(&config.summary)?)
        } else {
            Arc::new(FallbackSummarizer::new(config.summary.max_chars))
        };

        let orchestrator = SyncOrchestrator::new(
            config,
            store,
            summarizer,
            Arc::new(InMemoryIndexer::new()),
            Arc::new(TaskQueue::new(config.queue.clone())),
            Arc::new(ConnectionRegistry::new()),
        );

        Ok(Self::new(Arc::new(orchestrator), config.server.api_key.clone()))
    }
}
