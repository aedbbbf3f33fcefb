//! Queued units of work and the retry policy applied to their outcomes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::sync::core::errors::{TaskError, TaskResult};

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Boxed future returned by a work item attempt.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send + 'static>>;

/// Operation bound to its arguments; called once per attempt.
pub type TaskOperation = Box<dyn Fn() -> TaskFuture + Send + Sync>;

/// A unit of asynchronous work owned by the queue.
pub struct WorkItem {
    /// Caller-chosen key, e.g. `process_<memoryId>`.
    pub identity: String,
    operation: TaskOperation,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Failed attempts that were retried so far.
    pub retries: u32,
    /// Retries allowed after the first failed attempt.
    pub retry_limit: u32,
}

impl WorkItem {
    /// Bind an operation to an identity with the default retry limit.
    pub fn new<F, Fut>(identity: impl Into<String>, operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            identity: identity.into(),
            operation: Box::new(move || -> TaskFuture { Box::pin(operation()) }),
            created_at: Utc::now(),
            retries: 0,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }

    /// Override the retry limit.
    #[must_use]
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Start one attempt of the bound operation.
    #[must_use]
    pub fn attempt(&self) -> TaskFuture {
        (self.operation)()
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("identity", &self.identity)
            .field("created_at", &self.created_at)
            .field("retries", &self.retries)
            .field("retry_limit", &self.retry_limit)
            .finish_non_exhaustive()
    }
}

/// What the queue does with an item after an attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The attempt succeeded; the item is discarded.
    Completed,
    /// Re-append to the tail for another attempt.
    Retry,
    /// Give up on the item.
    Drop(TaskError),
}

/// Decide the fate of an item from its latest outcome and retry budget.
#[must_use]
pub fn disposition(outcome: &TaskResult, retries: u32, retry_limit: u32) -> Disposition {
    match outcome {
        Ok(()) => Disposition::Completed,
        Err(err) if err.is_retryable() && retries < retry_limit => Disposition::Retry,
        Err(err) => Disposition::Drop(err.clone()),
    }
}
