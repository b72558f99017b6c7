//! Core domain types for the Conveyor job pipeline coordinator.
//!
//! This crate contains:
//! - Job identifiers and work-item fingerprints
//! - Pipeline stages and the job model
//! - The typed key layout used in the shared store

pub mod error;
pub mod id;
pub mod job;
pub mod keys;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{CompletionResult, Fingerprint, Job, Stage};
pub use keys::{KeyKind, KeySpace};
