//! Coordinator configuration parsing.

use crate::{ConfigError, ConfigResult};
use conveyor_core::KeySpace;
use conveyor_core::keys::DEFAULT_PREFIX;
use kdl::{KdlDocument, KdlNode};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";

/// Everything a coordinator needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub store: StoreConfig,
    pub retry: RetryConfig,
    pub heartbeat: HeartbeatConfig,
    /// Processing budget stamped on new jobs.
    pub job_timeout: Duration,
    /// Resubmit jobs whose heartbeat lapsed through the retry scheduler.
    pub retry_stalled: bool,
    /// How often the sweeper promotes retries and reaps stalled jobs.
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Namespace for every key the coordinator writes.
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Redis {
        url: String,
        password: Option<String>,
    },
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Failed attempts after which a job is dropped.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// How long the store keeps a retry entry past its release time.
    pub retention: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Lifetime of a heartbeat that is not renewed.
    pub window: Duration,
    /// How long the store keeps the record of a dequeued job.
    pub claim_retention: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            job_timeout: Duration::from_secs(conveyor_core::job::DEFAULT_JOB_TIMEOUT_SECS),
            retry_stalled: true,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis {
                url: DEFAULT_STORE_URL.to_string(),
                password: None,
            },
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            retention: Duration::from_secs(3600),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            claim_retention: Duration::from_secs(86_400),
        }
    }
}

impl CoordinatorConfig {
    /// Check cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        KeySpace::new(self.store.prefix.as_str()).map_err(|e| ConfigError::InvalidValue {
            field: "store prefix".to_string(),
            message: e.to_string(),
        })?;

        if let StoreBackend::Redis { url, .. } = &self.store.backend {
            if url.is_empty() {
                return Err(ConfigError::MissingField("store url".to_string()));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry max-attempts", "must be at least 1"));
        }

        for (field, value) in [
            ("retry base-delay-ms", self.retry.base_delay),
            ("heartbeat window-secs", self.heartbeat.window),
            ("job timeout-secs", self.job_timeout),
            ("sweeper interval-secs", self.sweep_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be positive"));
            }
        }

        if self.heartbeat.claim_retention <= self.heartbeat.window {
            return Err(invalid(
                "heartbeat claim-retention-secs",
                "must be longer than the heartbeat window",
            ));
        }

        Ok(())
    }
}

/// Parse coordinator configuration from KDL text.
///
/// Every node is optional; missing settings keep their defaults.
pub fn parse_coordinator_config(kdl: &str) -> ConfigResult<CoordinatorConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = CoordinatorConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "store" => {
                config.store = parse_store(node)?;
            }
            "retry" => {
                if let Some(max) = get_u64_prop(node, "max-attempts")? {
                    config.retry.max_attempts = u32::try_from(max)
                        .map_err(|_| invalid("retry max-attempts", "out of range"))?;
                }
                if let Some(ms) = get_u64_prop(node, "base-delay-ms")? {
                    config.retry.base_delay = Duration::from_millis(ms);
                }
                if let Some(secs) = get_u64_prop(node, "retention-secs")? {
                    config.retry.retention = Duration::from_secs(secs);
                }
            }
            "heartbeat" => {
                if let Some(secs) = get_u64_prop(node, "window-secs")? {
                    config.heartbeat.window = Duration::from_secs(secs);
                }
                if let Some(secs) = get_u64_prop(node, "claim-retention-secs")? {
                    config.heartbeat.claim_retention = Duration::from_secs(secs);
                }
            }
            "job" => {
                if let Some(secs) = get_u64_prop(node, "timeout-secs")? {
                    config.job_timeout = Duration::from_secs(secs);
                }
            }
            "stalled" => {
                if let Some(retry) = get_bool_prop(node, "retry") {
                    config.retry_stalled = retry;
                }
            }
            "sweeper" => {
                if let Some(secs) = get_u64_prop(node, "interval-secs")? {
                    config.sweep_interval = Duration::from_secs(secs);
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    config.validate()?;
    Ok(config)
}

/// Read and parse a configuration file.
pub fn load_coordinator_config(path: impl AsRef<Path>) -> ConfigResult<CoordinatorConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_coordinator_config(&content)
}

fn parse_store(node: &KdlNode) -> ConfigResult<StoreConfig> {
    let prefix = get_string_prop(node, "prefix").unwrap_or_else(|| DEFAULT_PREFIX.to_string());
    let backend = get_string_prop(node, "backend").unwrap_or_else(|| "redis".to_string());

    let backend = match backend.as_str() {
        "redis" => StoreBackend::Redis {
            url: get_first_string_arg(node)
                .or_else(|| get_string_prop(node, "url"))
                .unwrap_or_else(|| DEFAULT_STORE_URL.to_string()),
            password: get_string_prop(node, "password"),
        },
        "memory" => StoreBackend::Memory,
        other => {
            return Err(invalid(
                "store backend",
                &format!("unknown backend: {}", other),
            ));
        }
    };

    Ok(StoreConfig { backend, prefix })
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

fn get_u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    let field = format!("{} {}", node.name().value(), name);
    let n = value
        .as_integer()
        .ok_or_else(|| invalid(&field, "expected an integer"))?;
    u64::try_from(n)
        .map(Some)
        .map_err(|_| invalid(&field, "must not be negative"))
}
