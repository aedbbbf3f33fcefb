//! Indexing of processed memories.

pub mod indexer;

pub use indexer::{IndexFuture, IndexMetadata, IndexedDocument, Indexer, InMemoryIndexer};
