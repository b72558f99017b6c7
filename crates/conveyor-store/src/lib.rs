//! Shared store layer for the Conveyor job pipeline coordinator.
//!
//! Provides the `Store` trait with a Redis implementation for production and
//! an in-process implementation for tests and single-process deployments.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{ClaimSpec, Store};
