//! MindTape ingestion and synchronization engine.
//!
//! A freshly written memory is enqueued for processing, a worker pool
//! summarizes and indexes it, and every live device session is told about
//! the change.

pub mod core;
pub mod engine;
pub mod indexing;
pub mod queue;
pub mod realtime;
pub mod storage;
pub mod summarization;

pub use self::core::{
    ConnectionId, DeviceId, MemoryId, MemoryRecord, MemoryUpdate, NewMemory, SyncConfig,
    SyncError, SyncResult, TaskError, TaskResult,
};
pub use engine::{HealthReport, SyncMemory, SyncOrchestrator, SyncRequest, SyncResponse};
pub use indexing::{InMemoryIndexer, Indexer};
pub use queue::{QueueStats, TaskQueue, WorkItem};
pub use realtime::{ChannelSink, ClientMessage, ConnectionRegistry, ServerMessage, SessionSink};
pub use storage::{InMemoryMemoryStore, MemoryStore, SqliteMemoryStore};
pub use summarization::{FallbackSummarizer, OllamaSummarizer, Summarizer};
