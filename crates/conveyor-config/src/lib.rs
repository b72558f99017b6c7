//! KDL configuration parsing for the Conveyor job pipeline coordinator.
//!
//! This crate handles parsing of:
//! - Shared store connection settings
//! - Retry, heartbeat and job timeout policy
//! - Sweeper scheduling

pub mod coordinator;
pub mod error;

pub use coordinator::{
    CoordinatorConfig, HeartbeatConfig, RetryConfig, StoreBackend, StoreConfig,
    load_coordinator_config, parse_coordinator_config,
};
pub use error::{ConfigError, ConfigResult};
