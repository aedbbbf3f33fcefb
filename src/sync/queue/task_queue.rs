//! In-process work queue drained by a fixed pool of workers.
//!
//! Items are admitted FIFO and retried by re-appending them to the tail.
//! Idle workers poll the queue on a fixed interval and are also woken on
//! enqueue. Items sharing an identity never run concurrently: a worker skips
//! an item whose identity is already in flight and takes the next one.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::sync::core::config::QueueConfig;
use crate::sync::core::errors::{TaskError, TaskResult};
use crate::sync::queue::work_item::{Disposition, WorkItem, disposition};

/// Callback invoked once an item is dropped for good. Runs on its own task.
pub type ExhaustedHook = Arc<dyn Fn(String, TaskError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Snapshot of queue counters for health reporting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Items waiting to be picked up.
    pub pending: usize,
    /// Items currently executing.
    pub in_flight: usize,
    /// Attempts started since creation.
    pub attempts: u64,
    /// Items that completed successfully.
    pub completed: u64,
    /// Attempts that failed and were re-queued.
    pub retried: u64,
    /// Items given up on.
    pub dropped: u64,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    in_flight: HashSet<String>,
}

impl QueueState {
    /// Pop the first item whose identity is not already executing.
    fn take_eligible(&mut self) -> Option<WorkItem> {
        let position = self
            .items
            .iter()
            .position(|item| !self.in_flight.contains(&item.identity))?;
        let item = self.items.remove(position)?;
        self.in_flight.insert(item.identity.clone());
        Some(item)
    }
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

/// Work queue with a worker pool.
pub struct TaskQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    wake: Notify,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
    exhausted_hook: OnceLock<ExhaustedHook>,
}

impl TaskQueue {
    /// Create a stopped queue.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            running: AtomicBool::new(false),
            shutdown,
            workers: Mutex::new(Vec::new()),
            counters: Counters::default(),
            exhausted_hook: OnceLock::new(),
        }
    }

    /// Register the callback run when an item exhausts its retries.
    ///
    /// Returns `false` if a hook was already registered.
    pub fn on_exhausted(&self, hook: ExhaustedHook) -> bool {
        self.exhausted_hook.set(hook).is_ok()
    }

    /// Append an operation to the tail with the configured retry limit.
    ///
    /// Never waits for execution and never deduplicates by identity.
    pub async fn enqueue<F, Fut>(&self, identity: impl Into<String>, operation: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let item = WorkItem::new(identity, operation).with_retry_limit(self.config.retry_limit);
        self.enqueue_item(item).await;
    }

    /// Append a prepared work item to the tail.
    pub async fn enqueue_item(&self, item: WorkItem) {
        let identity = item.identity.clone();
        self.state.lock().await.items.push_back(item);
        self.wake.notify_one();
        info!(task = %identity, "Task enqueued");
    }

    /// Number of items waiting to be picked up.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Whether workers are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of spawned worker loops.
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Snapshot of queue counters.
    pub async fn stats(&self) -> QueueStats {
        let (pending, in_flight) = {
            let state = self.state.lock().await;
            (state.items.len(), state.in_flight.len())
        };
        QueueStats {
            pending,
            in_flight,
            attempts: self.counters.attempts.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            retried: self.counters.retried.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
        }
    }

    /// Spawn `worker_count` consumer loops. No-op while already running.
    pub async fn start(self: &Arc<Self>, worker_count: usize) {
        // The workers lock covers the whole flag transition of start and stop.
        let mut workers = self.workers.lock().await;
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Task queue already running");
            return;
        }
        self.shutdown.send_replace(false);

        for worker_id in 0..worker_count {
            let queue = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            workers.push(tokio::spawn(async move {
                queue.run_worker(worker_id, shutdown).await;
            }));
        }
        info!(workers = worker_count, "Task queue started");
    }

    /// Stop the pool cooperatively.
    ///
    /// Workers finish the item they are executing and exit. Workers still
    /// busy after the shutdown timeout are aborted and their items are lost.
    /// Items that were never picked up stay queued for a later `start`.
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        self.wake.notify_waiters();

        let handles = std::mem::take(&mut *workers);
        let deadline = Instant::now() + self.config.shutdown_timeout();
        let mut aborted = 0_usize;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
                aborted += 1;
            }
        }

        // Every worker is gone, so nothing can still be executing.
        let lost = {
            let mut state = self.state.lock().await;
            let lost = state.in_flight.len();
            state.in_flight.clear();
            lost
        };
        if aborted > 0 {
            warn!(aborted, lost, "Aborted workers that outlived the shutdown timeout");
        }
        info!("Task queue stopped");
    }

    async fn run_worker(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker_id, "Worker started");
        let poll_interval = self.config.poll_interval();

        while !*shutdown.borrow() {
            let next = self.state.lock().await.take_eligible();
            match next {
                Some(item) => self.execute(worker_id, item).await,
                None => {
                    tokio::select! {
                        () = tokio::time::sleep(poll_interval) => {}
                        () = self.wake.notified() => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        debug!(worker_id, "Worker exiting");
    }

    async fn execute(&self, worker_id: usize, mut item: WorkItem) {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        // The operation itself may panic before handing back a future.
        let outcome = AssertUnwindSafe(async { item.attempt().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(TaskError::Transient("task panicked".to_string())));

        match disposition(&outcome, item.retries, item.retry_limit) {
            Disposition::Completed => {
                self.release(&item.identity).await;
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                info!(worker_id, task = %item.identity, "Task completed");
            }
            Disposition::Retry => {
                item.retries += 1;
                if let Err(err) = &outcome {
                    warn!(
                        worker_id,
                        task = %item.identity,
                        retry = item.retries,
                        error = %err,
                        "Task failed, requeued"
                    );
                }
                {
                    let mut state = self.state.lock().await;
                    state.in_flight.remove(&item.identity);
                    state.items.push_back(item);
                }
                self.counters.retried.fetch_add(1, Ordering::SeqCst);
                self.wake.notify_one();
            }
            Disposition::Drop(err) => {
                self.release(&item.identity).await;
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                error!(
                    worker_id,
                    task = %item.identity,
                    attempts = item.retries + 1,
                    error = %err,
                    "Task dropped"
                );
                if let Some(hook) = self.exhausted_hook.get() {
                    // Detached so a slow hook never holds up this worker.
                    tokio::spawn(hook(item.identity, err));
                }
            }
        }
    }

    async fn release(&self, identity: &str) {
        self.state.lock().await.in_flight.remove(identity);
        // A same-identity item may have been waiting on this one.
        self.wake.notify_one();
    }
}
