//! Work items, stages and jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

use crate::{Error, JobId, Result};

/// Default processing budget for a job.
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;

/// Opaque identifier grouping every job that belongs to one work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing fingerprint. Empty strings are rejected.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::InvalidInput("fingerprint must not be empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Derive a fingerprint from the bytes of the originating request.
    pub fn of(request: impl AsRef<[u8]>) -> Self {
        Self(hex::encode(Sha256::digest(request.as_ref())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A step in the processing pipeline, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Recon,
    Correlation,
    Analyst,
    Advisory,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 4] = [
        Stage::Recon,
        Stage::Correlation,
        Stage::Analyst,
        Stage::Advisory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Recon => "recon",
            Stage::Correlation => "correlation",
            Stage::Analyst => "analyst",
            Stage::Advisory => "advisory",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown stage: {}", s)))
    }
}

/// The unit of work moved through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Assigned at enqueue time.
    pub id: JobId,
    /// Work item this job belongs to.
    pub fingerprint: Fingerprint,
    /// Stage whose queue holds this job.
    pub stage: Stage,
    /// Stage-defined data.
    pub payload: Value,
    /// Number of failed attempts so far.
    pub attempts: u32,
    /// Stamped at enqueue time.
    pub created_at: DateTime<Utc>,
    /// Processing budget in seconds.
    pub timeout_secs: u64,
}

impl Job {
    pub fn new(fingerprint: Fingerprint, stage: Stage, payload: Value) -> Self {
        Self {
            id: JobId::new(),
            fingerprint,
            stage,
            payload,
            attempts: 0,
            created_at: Utc::now(),
            timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Outcome reported by a worker when it finishes a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub success: bool,
    /// Stage to enqueue next, if any.
    #[serde(default)]
    pub next_stage: Option<Stage>,
    /// Payload for the next stage.
    #[serde(default)]
    pub data: Value,
}

impl CompletionResult {
    /// Successful completion that ends the pipeline for this work item.
    pub fn done() -> Self {
        Self {
            success: true,
            next_stage: None,
            data: Value::Null,
        }
    }

    /// Successful completion that hands `data` to `next_stage`.
    pub fn then(next_stage: Stage, data: Value) -> Self {
        Self {
            success: true,
            next_stage: Some(next_stage),
            data,
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            next_stage: None,
            data: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_fingerprint_rejected() {
        assert!(matches!(Fingerprint::new(""), Err(Error::InvalidInput(_))));
        assert!(serde_json::from_str::<Fingerprint>("\"\"").is_err());
    }

    #[test]
    fn test_fingerprint_of_request_is_stable() {
        let a = Fingerprint::of("GET /records?region=mn");
        let b = Fingerprint::of("GET /records?region=mn");
        let c = Fingerprint::of("GET /records?region=wi");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_stage_names() {
        for stage in Stage::ALL {
            assert_eq!(stage.to_string().parse::<Stage>().unwrap(), stage);
        }
        assert!("deploy".parse::<Stage>().is_err());
        assert_eq!(
            serde_json::to_string(&Stage::Correlation).unwrap(),
            "\"correlation\""
        );
    }

    #[test]
    fn test_stages_sort_in_pipeline_order() {
        let mut stages = [Stage::Advisory, Stage::Recon, Stage::Analyst, Stage::Correlation];
        stages.sort();
        assert_eq!(stages, Stage::ALL);
    }

    #[test]
    fn test_job_json_keeps_payload() {
        let job = Job::new(
            Fingerprint::new("abc123").unwrap(),
            Stage::Recon,
            json!({"url": "http://x"}),
        )
        .with_timeout(Duration::from_secs(60));

        let decoded = Job::from_json(&job.to_json().unwrap()).unwrap();
        assert_eq!(decoded, job);
        assert_eq!(decoded.payload["url"], "http://x");
        assert_eq!(decoded.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_completion_result_defaults() {
        let result: CompletionResult = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert_eq!(result, CompletionResult::done());

        let chained = CompletionResult::then(Stage::Correlation, json!({"foo": 1}));
        assert_eq!(chained.next_stage, Some(Stage::Correlation));
    }
}
