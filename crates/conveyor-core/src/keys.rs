//! Key layout in the shared store.
//!
//! Every key the coordinator reads or writes is built here:
//!
//! - `{prefix}:queue:{fingerprint}:{stage}` holds a list of serialized jobs
//! - `{prefix}:retry:{fingerprint}:{stage}` holds one parked retry
//! - `{prefix}:heartbeat:{fingerprint}:{stage}` holds the last renewal time
//! - `{prefix}:claim:{fingerprint}:{stage}` holds the job a worker dequeued

use crate::{Error, Fingerprint, Result, Stage};

pub const DEFAULT_PREFIX: &str = "conveyor";

/// The kinds of record kept per `(fingerprint, stage)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Queue,
    Retry,
    Heartbeat,
    Claim,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Queue => "queue",
            KeyKind::Retry => "retry",
            KeyKind::Heartbeat => "heartbeat",
            KeyKind::Claim => "claim",
        }
    }
}

/// Builds and parses keys under a fixed namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Create a key space. The prefix must be non-empty and free of glob
    /// metacharacters, since it is embedded in scan patterns.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(Error::InvalidInput("key prefix must not be empty".to_string()));
        }
        if prefix.contains(['*', '?', '[', ']']) {
            return Err(Error::InvalidInput(format!(
                "key prefix must not contain glob characters: {}",
                prefix
            )));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, kind: KeyKind, fingerprint: &Fingerprint, stage: Stage) -> String {
        format!("{}:{}:{}:{}", self.prefix, kind.as_str(), fingerprint, stage)
    }

    pub fn queue(&self, fingerprint: &Fingerprint, stage: Stage) -> String {
        self.key(KeyKind::Queue, fingerprint, stage)
    }

    pub fn retry(&self, fingerprint: &Fingerprint, stage: Stage) -> String {
        self.key(KeyKind::Retry, fingerprint, stage)
    }

    pub fn heartbeat(&self, fingerprint: &Fingerprint, stage: Stage) -> String {
        self.key(KeyKind::Heartbeat, fingerprint, stage)
    }

    pub fn claim(&self, fingerprint: &Fingerprint, stage: Stage) -> String {
        self.key(KeyKind::Claim, fingerprint, stage)
    }

    /// Pattern matching every key of `kind` for one stage.
    pub fn stage_pattern(&self, kind: KeyKind, stage: Stage) -> String {
        format!("{}:{}:*:{}", self.prefix, kind.as_str(), stage)
    }

    /// Pattern matching every key of `kind`.
    pub fn pattern(&self, kind: KeyKind) -> String {
        format!("{}:{}:*", self.prefix, kind.as_str())
    }

    /// Recover `(fingerprint, stage)` from a key of the given kind.
    ///
    /// Returns `None` for keys outside this key space or with an unknown stage.
    pub fn parse(&self, kind: KeyKind, key: &str) -> Option<(Fingerprint, Stage)> {
        let rest = key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(':')?
            .strip_prefix(kind.as_str())?
            .strip_prefix(':')?;
        let (fingerprint, stage) = rest.rsplit_once(':')?;
        let stage = stage.parse().ok()?;
        let fingerprint = Fingerprint::new(fingerprint).ok()?;
        Some((fingerprint, stage))
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}
