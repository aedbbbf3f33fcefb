//! Sync orchestration tying storage, processing and real-time fan-out.

pub mod orchestrator;

pub use orchestrator::{HealthReport, SyncMemory, SyncOrchestrator, SyncRequest, SyncResponse};
