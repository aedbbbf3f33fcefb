//! Search index abstraction and an in-process implementation.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::sync::core::errors::SyncResult;
use crate::sync::core::ids::{DeviceId, MemoryId};
use crate::sync::core::record::MemoryRecord;
use crate::sync::summarization::fallback::truncate_to_chars;

/// Boxed future type for indexer operations.
pub type IndexFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Metadata stored next to an indexed document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Host of the URL.
    pub domain: String,
    /// Owning device.
    pub device_id: DeviceId,
    /// Record modification time at indexing.
    pub updated_at: DateTime<Utc>,
}

/// An indexed document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    /// Enriched text that was indexed.
    pub text: String,
    /// Associated metadata.
    pub metadata: IndexMetadata,
}

impl IndexedDocument {
    /// Build the document for a record: title, summary, then the head of the
    /// raw content.
    #[must_use]
    pub fn for_record(record: &MemoryRecord, summary: &str, content_chars: usize) -> Self {
        let text = format!(
            "{}\n{}\n{}",
            record.title,
            summary,
            truncate_to_chars(&record.content, content_chars)
        );
        Self {
            text,
            metadata: IndexMetadata {
                url: record.url.clone(),
                title: record.title.clone(),
                domain: record.domain.clone(),
                device_id: record.device_id.clone(),
                updated_at: record.updated_at,
            },
        }
    }
}

/// Search index keyed by memory id. Upserts overwrite by id.
pub trait Indexer: Send + Sync {
    /// Insert or replace the document for `id`.
    ///
    /// # Errors
    /// Returns an error if the index cannot be written.
    fn upsert(&self, id: MemoryId, document: IndexedDocument) -> IndexFuture<'_, SyncResult<()>>;
    /// Remove the document for `id`. Returns `false` if there was none.
    ///
    /// # Errors
    /// Returns an error if the index cannot be written.
    fn delete(&self, id: MemoryId) -> IndexFuture<'_, SyncResult<bool>>;
    /// Number of indexed documents.
    ///
    /// # Errors
    /// Returns an error if the index cannot be read.
    fn count(&self) -> IndexFuture<'_, SyncResult<usize>>;
}

/// Index kept in process memory.
#[derive(Default)]
pub struct InMemoryIndexer {
    documents: DashMap<MemoryId, IndexedDocument>,
}

impl InMemoryIndexer {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the document indexed for `id`.
    #[must_use]
    pub fn get(&self, id: MemoryId) -> Option<IndexedDocument> {
        self.documents.get(&id).map(|doc| doc.clone())
    }
}

impl Indexer for InMemoryIndexer {
    fn upsert(&self, id: MemoryId, document: IndexedDocument) -> IndexFuture<'_, SyncResult<()>> {
        Box::pin(async move {
            self.documents.insert(id, document);
            Ok(())
        })
    }

    fn delete(&self, id: MemoryId) -> IndexFuture<'_, SyncResult<bool>> {
        Box::pin(async move { Ok(self.documents.remove(&id).is_some()) })
    }

    fn count(&self) -> IndexFuture<'_, SyncResult<usize>> {
        Box::pin(async move { Ok(self.documents.len()) })
    }
}
