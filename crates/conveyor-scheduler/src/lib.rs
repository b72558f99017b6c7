//! Job coordination for the Conveyor pipeline.
//!
//! Moves jobs through per-stage queues held in a shared store, parks failed
//! jobs for exponential-backoff retries, and tracks worker liveness with
//! expiring heartbeats. All coordination goes through the store, so any
//! number of coordinator instances can share one pipeline.

pub mod coordinator;
pub mod error;
pub mod heartbeat;
pub mod inspector;
pub mod queue;
pub mod retry;
pub mod sweeper;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Coordinator, TimeoutReport};
pub use error::{SchedulerError, SchedulerResult};
pub use heartbeat::LivenessMonitor;
pub use inspector::{QueueInspector, QueueStats};
pub use queue::StageQueue;
pub use retry::{RetryEntry, RetryOutcome, RetryScheduler, SweepReport};
pub use sweeper::{SweepSummary, Sweeper};
pub use worker::{StageHandler, Worker, WorkerConfig};
