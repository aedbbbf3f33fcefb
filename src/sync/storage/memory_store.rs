//! Record store abstraction and an in-process implementation.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::sync::core::errors::SyncResult;
use crate::sync::core::ids::MemoryId;
use crate::sync::core::record::{MemoryRecord, MemoryUpdate};

/// Boxed future type for record store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable storage of memory records.
pub trait MemoryStore: Send + Sync {
    /// Fetch a record by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_by_id(&self, id: MemoryId) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>>;
    /// Fetch the record captured from `url`.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_by_url(&self, url: String) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>>;
    /// Insert a new record.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create(&self, record: MemoryRecord) -> StoreFuture<'_, SyncResult<MemoryRecord>>;
    /// Apply a partial update. Returns `None` if the record does not exist.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn update_fields(
        &self,
        id: MemoryId,
        update: MemoryUpdate,
    ) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>>;
    /// Records updated strictly after `since`, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> StoreFuture<'_, SyncResult<Vec<MemoryRecord>>>;
    /// The `limit` most recently updated records, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_most_recent(&self, limit: usize) -> StoreFuture<'_, SyncResult<Vec<MemoryRecord>>>;
    /// Delete a record. Returns `false` if it did not exist.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete(&self, id: MemoryId) -> StoreFuture<'_, SyncResult<bool>>;
}

/// Records kept in process memory; lost on restart.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: DashMap<MemoryId, MemoryRecord>,
}

impl InMemoryMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl MemoryStore for InMemoryMemoryStore {
    fn get_by_id(&self, id: MemoryId) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>> {
        Box::pin(async move { Ok(self.records.get(&id).map(|record| record.clone())) })
    }

    fn get_by_url(&self, url: String) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>> {
        Box::pin(async move {
            Ok(self
                .records
                .iter()
                .find(|record| record.url == url)
                .map(|record| record.clone()))
        })
    }

    fn create(&self, record: MemoryRecord) -> StoreFuture<'_, SyncResult<MemoryRecord>> {
        Box::pin(async move {
            self.records.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn update_fields(
        &self,
        id: MemoryId,
        update: MemoryUpdate,
    ) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>> {
        Box::pin(async move {
            Ok(self.records.get_mut(&id).map(|mut record| {
                record.apply(update);
                record.clone()
            }))
        })
    }

    fn get_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> StoreFuture<'_, SyncResult<Vec<MemoryRecord>>> {
        Box::pin(async move {
            let mut records: Vec<MemoryRecord> = self
                .records
                .iter()
                .filter(|record| record.updated_at > since)
                .map(|record| record.clone())
                .collect();
            records.sort_by_key(|record| record.updated_at);
            Ok(records)
        })
    }

    fn get_most_recent(&self, limit: usize) -> StoreFuture<'_, SyncResult<Vec<MemoryRecord>>> {
        Box::pin(async move {
            let mut records: Vec<MemoryRecord> =
                self.records.iter().map(|record| record.clone()).collect();
            records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            records.truncate(limit);
            Ok(records)
        })
    }

    fn delete(&self, id: MemoryId) -> StoreFuture<'_, SyncResult<bool>> {
        Box::pin(async move { Ok(self.records.remove(&id).is_some()) })
    }
}
