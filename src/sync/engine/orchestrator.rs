//! Sync orchestrator: enqueue-on-write, process-then-broadcast and
//! delta/bootstrap sync.
//!
//! Every write of a memory enqueues one `process_<id>` work item. A worker
//! summarizes and indexes the record, marks it processed and broadcasts
//! `memory_updated` to every live session. Devices that were offline catch up
//! through [`SyncOrchestrator::sync_batch`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::sync::core::config::SyncConfig;
use crate::sync::core::errors::{SyncError, SyncResult, TaskError, TaskResult};
use crate::sync::core::ids::{DeviceId, MemoryId};
use crate::sync::core::record::{MemoryRecord, MemoryUpdate, NewMemory};
use crate::sync::indexing::indexer::{IndexedDocument, Indexer};
use crate::sync::queue::task_queue::{QueueStats, TaskQueue};
use crate::sync::realtime::protocol::ServerMessage;
use crate::sync::realtime::registry::ConnectionRegistry;
use crate::sync::storage::memory_store::MemoryStore;
use crate::sync::summarization::fallback::Summarizer;

const PROCESS_PREFIX: &str = "process_";

/// Page submitted inside a sync batch; the device comes from the request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMemory {
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Captured page text.
    pub content: String,
}

/// Batch pushed by a device, with its sync watermark.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Device pushing the batch.
    pub device_id: DeviceId,
    /// Last time the device synced; `None` asks for a bootstrap.
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Locally captured pages to upsert.
    #[serde(default)]
    pub memories: Vec<SyncMemory>,
}

/// Records the device is missing plus the new watermark.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Records updated after the watermark, or the most recent ones.
    pub memories: Vec<MemoryRecord>,
    /// Server time to use as the next watermark.
    pub sync_timestamp: DateTime<Utc>,
}

/// Health snapshot of the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: &'static str,
    /// Time of the snapshot.
    pub timestamp: DateTime<Utc>,
    /// Items waiting in the work queue.
    pub pending: usize,
    /// Distinct devices with at least one live session.
    pub connected_devices: usize,
    /// Documents in the search index.
    pub indexed_documents: usize,
    /// Queue counters.
    pub queue: QueueStats,
}

/// Collaborators used by the processing routine; shared with queued items.
struct Processor {
    store: Arc<dyn MemoryStore>,
    summarizer: Arc<dyn Summarizer>,
    indexer: Arc<dyn Indexer>,
    registry: Arc<ConnectionRegistry>,
    content_chars: usize,
}

fn transient(err: SyncError) -> TaskError {
    TaskError::Transient(err.to_string())
}

impl Processor {
    /// Summarize, index, persist, then broadcast. No rollback on failure.
    async fn process(&self, id: MemoryId) -> TaskResult {
        let record = self
            .store
            .get_by_id(id)
            .await
            .map_err(transient)?
            .ok_or_else(|| TaskError::Permanent(format!("memory {id} not found")))?;

        let summary = self
            .summarizer
            .summarize(&record.content)
            .await
            .map_err(transient)?;

        let document = IndexedDocument::for_record(&record, &summary, self.content_chars);
        self.indexer.upsert(id, document).await.map_err(transient)?;

        let updated = self
            .store
            .update_fields(id, MemoryUpdate::processed(summary))
            .await
            .map_err(transient)?
            .ok_or_else(|| TaskError::Permanent(format!("memory {id} deleted during processing")))?;

        let message = ServerMessage::MemoryUpdated {
            memory_id: id,
            device_id: updated.device_id,
        };
        let delivered = self.registry.broadcast(&message, None).await;
        info!(memory = %id, delivered, "Memory processed and broadcast");
        Ok(())
    }
}

/// Parse the memory id out of a `process_<id>` queue identity.
fn memory_id_from_identity(identity: &str) -> Option<MemoryId> {
    identity.strip_prefix(PROCESS_PREFIX)?.parse().ok()
}

/// Record the last error on a memory whose processing was given up on.
async fn mark_failed(store: Arc<dyn MemoryStore>, identity: String, err: TaskError) {
    let Some(id) = memory_id_from_identity(&identity) else {
        return;
    };
    match store.update_fields(id, MemoryUpdate::failed(err.to_string())).await {
        Ok(Some(_)) => warn!(memory = %id, error = %err, "Memory processing failed permanently"),
        Ok(None) => debug!(memory = %id, "Failed memory no longer exists"),
        Err(store_err) => {
            warn!(memory = %id, error = %store_err, "Could not record processing failure");
        }
    }
}

/// Coordinates the store, queue, index and real-time registry.
pub struct SyncOrchestrator {
    processor: Arc<Processor>,
    queue: Arc<TaskQueue>,
    bootstrap_limit: usize,
    write_lock: Mutex<()>,
}

impl SyncOrchestrator {
    /// Wire the orchestrator and register the queue's exhaustion hook.
    #[must_use]
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn MemoryStore>,
        summarizer: Arc<dyn Summarizer>,
        indexer: Arc<dyn Indexer>,
        queue: Arc<TaskQueue>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let hook_store = Arc::clone(&store);
        let registered = queue.on_exhausted(Arc::new(move |identity: String, err: TaskError| {
            mark_failed(Arc::clone(&hook_store), identity, err).boxed()
        }));
        if !registered {
            warn!("Queue already has an exhaustion hook; failures will not be recorded");
        }

        Self {
            processor: Arc::new(Processor {
                store,
                summarizer,
                indexer,
                registry,
                content_chars: config.index.content_chars,
            }),
            queue,
            bootstrap_limit: config.storage.bootstrap_limit,
            write_lock: Mutex::new(()),
        }
    }

    /// The work queue driving processing.
    #[must_use]
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// The live session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.processor.registry
    }

    /// Create or re-capture a memory by URL and enqueue its processing.
    ///
    /// Returns the stored record without waiting for processing.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the store fails.
    pub async fn add_memory(&self, new: NewMemory) -> SyncResult<MemoryRecord> {
        let record = {
            let _guard = self.write_lock.lock().await;
            let store = &self.processor.store;
            match store.get_by_url(new.url.clone()).await? {
                Some(existing) => store
                    .update_fields(existing.id, MemoryUpdate::recapture(new.title, new.content))
                    .await?
                    .ok_or_else(|| SyncError::NotFound(existing.id.to_string()))?,
                None => store.create(MemoryRecord::from_new(new)?).await?,
            }
        };

        debug!(memory = %record.id, version = record.version, "Memory stored");
        self.enqueue_processing(record.id).await;
        Ok(record)
    }

    /// Enqueue the processing routine for a memory.
    pub async fn enqueue_processing(&self, id: MemoryId) {
        let processor = Arc::clone(&self.processor);
        self.queue
            .enqueue(id.task_identity(), move || {
                let processor = Arc::clone(&processor);
                async move { processor.process(id).await }
            })
            .await;
    }

    /// Tell every live session that a memory changed.
    ///
    /// Returns the number of sessions reached.
    pub async fn notify_update(&self, memory_id: MemoryId, device_id: DeviceId) -> usize {
        let message = ServerMessage::MemoryUpdated {
            memory_id,
            device_id,
        };
        self.processor.registry.broadcast(&message, None).await
    }

    /// Upsert a device's batch, then return what it is missing.
    ///
    /// # Errors
    /// Returns an error if a submitted page is invalid or the store fails.
    pub async fn sync_batch(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
        let SyncRequest {
            device_id,
            last_sync,
            memories,
        } = request;

        let pushed = memories.len();
        for memory in memories {
            self.add_memory(NewMemory {
                url: memory.url,
                title: memory.title,
                content: memory.content,
                device_id: device_id.clone(),
            })
            .await?;
        }

        // Taken before the query, and under the write lock so no capture
        // stamped earlier is still uncommitted. Anything landing after it is
        // returned by the next delta.
        let sync_timestamp = {
            let _guard = self.write_lock.lock().await;
            Utc::now()
        };
        let store = &self.processor.store;
        let memories = match last_sync {
            Some(since) => store.get_updated_since(since).await?,
            None => store.get_most_recent(self.bootstrap_limit).await?,
        };

        info!(
            device = %device_id,
            pushed,
            returned = memories.len(),
            delta = last_sync.is_some(),
            "Sync batch handled"
        );
        Ok(SyncResponse {
            memories,
            sync_timestamp,
        })
    }

    /// Fetch a memory by id.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn get_memory(&self, id: MemoryId) -> SyncResult<Option<MemoryRecord>> {
        self.processor.store.get_by_id(id).await
    }

    /// Delete a memory from the store and the index.
    ///
    /// Returns `false` if the memory did not exist.
    ///
    /// # Errors
    /// Returns an error if the store or index fails.
    pub async fn delete_memory(&self, id: MemoryId) -> SyncResult<bool> {
        if !self.processor.store.delete(id).await? {
            return Ok(false);
        }
        self.processor.indexer.delete(id).await?;
        info!(memory = %id, "Memory deleted");
        Ok(true)
    }

    /// Snapshot of queue, session and index state.
    ///
    /// # Errors
    /// Returns an error if the index cannot be read.
    pub async fn health(&self) -> SyncResult<HealthReport> {
        let queue = self.queue.stats().await;
        Ok(HealthReport {
            status: "healthy",
            timestamp: Utc::now(),
            pending: queue.pending,
            connected_devices: self.processor.registry.connected_devices().len(),
            indexed_documents: self.processor.indexer.count().await?,
            queue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::sync::core::config::QueueConfig;
    use crate::sync::indexing::indexer::InMemoryIndexer;
    use crate::sync::realtime::sink::ChannelSink;
    use crate::sync::storage::memory_store::{InMemoryMemoryStore, StoreFuture};
    use crate::sync::summarization::fallback::{FallbackSummarizer, SummaryFuture};

    struct OfflineSummarizer;

    impl Summarizer for OfflineSummarizer {
        fn summarize<'a>(&'a self, _text: &'a str) -> SummaryFuture<'a> {
            Box::pin(async { Err(SyncError::Delivery("model offline".to_string())) })
        }
    }

    /// Store whose delta query returns late, leaving room for a write to land.
    struct SlowDeltaStore {
        inner: InMemoryMemoryStore,
    }

    impl MemoryStore for SlowDeltaStore {
        fn get_by_id(&self, id: MemoryId) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>> {
            self.inner.get_by_id(id)
        }

        fn get_by_url(&self, url: String) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>> {
            self.inner.get_by_url(url)
        }

        fn create(&self, record: MemoryRecord) -> StoreFuture<'_, SyncResult<MemoryRecord>> {
            self.inner.create(record)
        }

        fn update_fields(
            &self,
            id: MemoryId,
            update: MemoryUpdate,
        ) -> StoreFuture<'_, SyncResult<Option<MemoryRecord>>> {
            self.inner.update_fields(id, update)
        }

        fn get_updated_since(
            &self,
            since: DateTime<Utc>,
        ) -> StoreFuture<'_, SyncResult<Vec<MemoryRecord>>> {
            Box::pin(async move {
                let records = self.inner.get_updated_since(since).await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                records
            })
        }

        fn get_most_recent(&self, limit: usize) -> StoreFuture<'_, SyncResult<Vec<MemoryRecord>>> {
            self.inner.get_most_recent(limit)
        }

        fn delete(&self, id: MemoryId) -> StoreFuture<'_, SyncResult<bool>> {
            self.inner.delete(id)
        }
    }

    struct Harness {
        orchestrator: SyncOrchestrator,
        store: Arc<InMemoryMemoryStore>,
        indexer: Arc<InMemoryIndexer>,
    }

    fn harness_with(summarizer: Arc<dyn Summarizer>, retry_limit: u32) -> Harness {
        let config = SyncConfig {
            queue: QueueConfig {
                workers: 1,
                poll_interval_ms: 10,
                retry_limit,
                shutdown_timeout_ms: 500,
            },
            ..SyncConfig::default()
        };
        let store = Arc::new(InMemoryMemoryStore::new());
        let indexer = Arc::new(InMemoryIndexer::new());
        let queue = Arc::new(TaskQueue::new(config.queue.clone()));
        let orchestrator = SyncOrchestrator::new(
            &config,
            store.clone(),
            summarizer,
            indexer.clone(),
            queue,
            Arc::new(ConnectionRegistry::new()),
        );
        Harness {
            orchestrator,
            store,
            indexer,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(FallbackSummarizer::new(200)), 3)
    }

    fn device(name: &str) -> DeviceId {
        DeviceId::new(name).unwrap()
    }

    fn page(url: &str, title: &str) -> NewMemory {
        NewMemory {
            url: url.to_string(),
            title: title.to_string(),
            content: "Tokio is an async runtime. It powers many services.".to_string(),
            device_id: device("laptop"),
        }
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_same_url_twice_updates_and_enqueues_once_each() {
        let h = harness();
        let first = h.orchestrator.add_memory(page("https://tokio.rs/", "Tokio")).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(h.orchestrator.queue().pending_count().await, 1);

        let second = h
            .orchestrator
            .add_memory(page("https://tokio.rs/", "Tokio runtime"))
            .await
            .unwrap();

        assert_eq!(h.store.len(), 1);
        assert_eq!(second.id, first.id);
        assert_eq!(second.version, 2);
        assert_eq!(second.title, "Tokio runtime");
        assert_eq!(h.orchestrator.queue().pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_without_enqueue() {
        let h = harness();
        let err = h.orchestrator.add_memory(page("not a url", "x")).await;
        assert!(err.is_err());
        assert_eq!(h.orchestrator.queue().pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_processing_indexes_and_broadcasts() {
        let h = harness();
        let (sink, mut rx) = ChannelSink::channel();
        h.orchestrator.registry().connect(device("phone"), Arc::new(sink));
        h.orchestrator.queue().start(1).await;

        let record = h.orchestrator.add_memory(page("https://tokio.rs/", "Tokio")).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            message,
            ServerMessage::MemoryUpdated {
                memory_id: record.id,
                device_id: device("laptop"),
            }
        );

        let processed = h.orchestrator.get_memory(record.id).await.unwrap().unwrap();
        assert!(processed.processed);
        assert_eq!(processed.version, 1);
        assert_eq!(
            processed.summary.as_deref(),
            Some("Tokio is an async runtime. It powers many services.")
        );
        assert!(processed.processing_error.is_none());

        let document = h.indexer.get(record.id).unwrap();
        assert!(document.text.starts_with("Tokio\nTokio is an async runtime."));
        assert_eq!(document.metadata.url, "https://tokio.rs/");

        h.orchestrator.queue().stop().await;
    }

    #[tokio::test]
    async fn test_exhausted_processing_marks_record() {
        let h = harness_with(Arc::new(OfflineSummarizer), 1);
        h.orchestrator.queue().start(1).await;
        let record = h.orchestrator.add_memory(page("https://tokio.rs/", "Tokio")).await.unwrap();

        let (store, id) = (h.store.clone(), record.id);
        wait_until(|| {
            let store = store.clone();
            async move {
                store
                    .get_by_id(id)
                    .await
                    .unwrap()
                    .is_some_and(|r| r.processing_error.is_some())
            }
        })
        .await;

        let stats = h.orchestrator.queue().stats().await;
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.dropped, 1);
        let failed = h.orchestrator.get_memory(record.id).await.unwrap().unwrap();
        assert!(!failed.processed);
        assert!(failed.processing_error.unwrap().contains("model offline"));

        h.orchestrator.queue().stop().await;
    }

    #[tokio::test]
    async fn test_missing_record_is_not_retried() {
        let h = harness();
        h.orchestrator.enqueue_processing(MemoryId::new()).await;
        h.orchestrator.queue().start(1).await;

        let queue = h.orchestrator.queue().clone();
        wait_until(|| {
            let queue = queue.clone();
            async move { queue.stats().await.dropped == 1 }
        })
        .await;
        assert_eq!(queue.stats().await.attempts, 1);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_sync_batch_bootstrap_then_delta() {
        let h = harness();
        h.orchestrator.add_memory(page("https://a.com/", "A")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let bootstrap = h
            .orchestrator
            .sync_batch(SyncRequest {
                device_id: device("phone"),
                last_sync: None,
                memories: vec![SyncMemory {
                    url: "https://b.com/".to_string(),
                    title: "B".to_string(),
                    content: "From the phone.".to_string(),
                }],
            })
            .await
            .unwrap();
        assert_eq!(bootstrap.memories.len(), 2);
        assert_eq!(bootstrap.memories[0].url, "https://b.com/");
        assert_eq!(bootstrap.memories[0].device_id, device("phone"));
        assert_eq!(h.orchestrator.queue().pending_count().await, 2);

        tokio::time::sleep(Duration::from_millis(5)).await;
        h.orchestrator.add_memory(page("https://c.com/", "C")).await.unwrap();

        let delta = h
            .orchestrator
            .sync_batch(SyncRequest {
                device_id: device("phone"),
                last_sync: Some(bootstrap.sync_timestamp),
                memories: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(delta.memories.len(), 1);
        assert_eq!(delta.memories[0].url, "https://c.com/");
    }

    #[tokio::test]
    async fn test_write_during_delta_query_reaches_next_delta() {
        let config = SyncConfig::default();
        let orchestrator = SyncOrchestrator::new(
            &config,
            Arc::new(SlowDeltaStore {
                inner: InMemoryMemoryStore::new(),
            }),
            Arc::new(FallbackSummarizer::new(200)),
            Arc::new(InMemoryIndexer::new()),
            Arc::new(TaskQueue::new(config.queue.clone())),
            Arc::new(ConnectionRegistry::new()),
        );
        let start = Utc::now();

        let (first, late) = tokio::join!(
            orchestrator.sync_batch(SyncRequest {
                device_id: device("phone"),
                last_sync: Some(start),
                memories: Vec::new(),
            }),
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                orchestrator.add_memory(page("https://late.com/", "Late")).await
            }
        );
        let first = first.unwrap();
        let late = late.unwrap();
        assert!(first.memories.is_empty());
        assert!(late.updated_at > first.sync_timestamp);

        let second = orchestrator
            .sync_batch(SyncRequest {
                device_id: device("phone"),
                last_sync: Some(first.sync_timestamp),
                memories: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(second.memories.len(), 1);
        assert_eq!(second.memories[0].id, late.id);
    }

    #[tokio::test]
    async fn test_delete_removes_from_index() {
        let h = harness();
        h.orchestrator.queue().start(1).await;
        let record = h.orchestrator.add_memory(page("https://tokio.rs/", "Tokio")).await.unwrap();

        let (indexer, id) = (h.indexer.clone(), record.id);
        wait_until(|| {
            let indexer = indexer.clone();
            async move { indexer.get(id).is_some() }
        })
        .await;

        assert!(h.orchestrator.delete_memory(record.id).await.unwrap());
        assert!(h.indexer.get(record.id).is_none());
        assert!(h.orchestrator.get_memory(record.id).await.unwrap().is_none());
        assert!(!h.orchestrator.delete_memory(record.id).await.unwrap());

        h.orchestrator.queue().stop().await;
    }

    #[tokio::test]
    async fn test_notify_update_and_health() {
        let h = harness();
        let (sink, mut rx) = ChannelSink::channel();
        h.orchestrator.registry().connect(device("phone"), Arc::new(sink));
        h.orchestrator.add_memory(page("https://tokio.rs/", "Tokio")).await.unwrap();

        let memory_id = MemoryId::new();
        assert_eq!(h.orchestrator.notify_update(memory_id, device("laptop")).await, 1);
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::MemoryUpdated { memory_id: id, .. }) if id == memory_id
        ));

        let report = h.orchestrator.health().await.unwrap();
        assert_eq!(report.status, "healthy");
        assert_eq!(report.pending, 1);
        assert_eq!(report.connected_devices, 1);
        assert_eq!(report.indexed_documents, 0);
    }

    #[test]
    fn test_memory_id_from_identity() {
        let id = MemoryId::new();
        assert_eq!(memory_id_from_identity(&id.task_identity()), Some(id));
        assert_eq!(memory_id_from_identity("cleanup_job"), None);
        assert_eq!(memory_id_from_identity("process_not-a-uuid"), None);
    }
}
