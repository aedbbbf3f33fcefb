//! Asynchronous work queue and worker pool.

pub mod task_queue;
pub mod work_item;

pub use task_queue::{ExhaustedHook, QueueStats, TaskQueue};
pub use work_item::{
    DEFAULT_RETRY_LIMIT, Disposition, TaskFuture, TaskOperation, WorkItem, disposition,
};
