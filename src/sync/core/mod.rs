//! Core sync types: configuration, errors, identifiers and memory records.

pub mod config;
pub mod errors;
pub mod ids;
pub mod record;

pub use config::{
    IndexConfig, QueueConfig, ServerConfig, StorageConfig, SummaryConfig, SyncConfig,
};
pub use errors::{SyncError, SyncResult, TaskError, TaskResult};
pub use ids::{ConnectionId, DeviceId, DeviceIdError, MemoryId};
pub use record::{MemoryRecord, MemoryUpdate, NewMemory, domain_of};
