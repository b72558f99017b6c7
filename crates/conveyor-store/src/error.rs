//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Connection(String),

    #[error("store error: {0}")]
    Backend(String),

    #[error("store connection closed")]
    Closed,
}

impl StoreError {
    /// Whether the store could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Closed)
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
        {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
