//! The shared store contract.

use async_trait::async_trait;
use std::time::Duration;

use crate::StoreResult;

/// Keys written alongside an atomic pop, marking the popped entry as owned
/// by a worker.
#[derive(Debug, Clone)]
pub struct ClaimSpec {
    /// Expiring liveness marker.
    pub heartbeat_key: String,
    pub heartbeat_value: String,
    pub heartbeat_ttl: Duration,
    /// Receives a copy of the popped entry.
    pub claim_key: String,
    pub claim_ttl: Duration,
}

/// A key/list/expiring-value store shared by every coordinator instance.
///
/// Each method is a single atomic operation at the store level.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Append to the tail of a list, returning the new length.
    async fn push_back(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Length of a list; zero when the key is absent.
    async fn list_len(&self, key: &str) -> StoreResult<u64>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value, replacing any previous one. `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete a key. Returns `true` only to the caller that removed it.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete `key` only while it still holds `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Set `key` with an expiry only while `guard_key` exists. Returns whether
    /// the write happened.
    async fn set_guarded(
        &self,
        guard_key: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// All keys matching a glob pattern (`*` and `?`).
    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Atomically pop the head of `list_key` and, if an entry was popped,
    /// write the heartbeat marker and the claim record described by `claim`.
    ///
    /// Pops nothing while the claim record already exists, so a list has at
    /// most one claimed entry at a time.
    async fn pop_and_claim(&self, list_key: &str, claim: &ClaimSpec)
    -> StoreResult<Option<String>>;

    async fn ping(&self) -> StoreResult<()>;

    /// Release the connection. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> StoreResult<()>;
}
