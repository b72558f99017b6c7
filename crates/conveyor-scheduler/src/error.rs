//! Scheduler error types.

use conveyor_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] conveyor_core::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Whether the shared store could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SchedulerError::Store(e) if e.is_unreachable())
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
