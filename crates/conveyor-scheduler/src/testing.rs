//! Helpers shared by the scheduler's unit tests.

use conveyor_config::{CoordinatorConfig, StoreBackend};
use conveyor_core::Fingerprint;
use conveyor_store::MemoryStore;
use std::sync::Arc;

use crate::Coordinator;

pub fn memory_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.store.backend = StoreBackend::Memory;
    config
}

/// Coordinator over a fresh in-memory store, plus the store for inspection.
pub fn coordinator() -> (Coordinator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let coordinator =
        Coordinator::new(store.clone(), memory_config()).expect("default config is valid");
    (coordinator, store)
}

pub fn fingerprint(value: &str) -> Fingerprint {
    Fingerprint::new(value).expect("test fingerprints are non-empty")
}
