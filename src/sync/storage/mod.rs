//! Persistent storage of memory records.

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::{InMemoryMemoryStore, MemoryStore, StoreFuture};
pub use sqlite_store::SqliteMemoryStore;
