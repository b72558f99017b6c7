//! Exponential-backoff retries for failed jobs.
//!
//! A failed job is parked under `retry:{fingerprint}:{stage}` with the time
//! it becomes eligible again. At most one retry is pending per key; a newer
//! failure overwrites the older entry. A periodic sweep moves due entries
//! back into the stage queue.

use chrono::{DateTime, Utc};
use conveyor_core::{Fingerprint, Job, KeyKind, KeySpace, Stage};
use conveyor_store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::{SchedulerResult, StageQueue};

/// A job parked until `release_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEntry {
    pub job: Job,
    pub release_at: DateTime<Utc>,
    pub last_error: String,
}

/// What `schedule_retry` did with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Parked; eligible again after `delay`.
    Scheduled { attempt: u32, delay: Duration },
    /// Attempt budget used up; the job was dropped.
    Exhausted { attempts: u32 },
}

/// Result of one retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries moved back into their stage queue.
    pub requeued: usize,
    /// Entries not yet due.
    pub pending: usize,
    /// Entries that were due but could not be re-enqueued or decoded.
    pub failed: usize,
}

pub struct RetryScheduler {
    store: Arc<dyn Store>,
    keys: KeySpace,
    queue: StageQueue,
    max_attempts: u32,
    base_delay: Duration,
    retention: Duration,
}

impl RetryScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        keys: KeySpace,
        queue: StageQueue,
        max_attempts: u32,
        base_delay: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            queue,
            max_attempts,
            base_delay,
            retention,
        }
    }

    /// `base * 2^attempts`, saturating.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Record a failed attempt of `job` and park it for a retry.
    ///
    /// The attempt count is incremented in place. Once it reaches the
    /// maximum the job is dropped for good, along with any retry still
    /// pending for its `(fingerprint, stage)`.
    pub async fn schedule_retry(&self, job: &mut Job, error: &str) -> SchedulerResult<RetryOutcome> {
        let previous = job.attempts;
        job.attempts = previous.saturating_add(1);
        let key = self.keys.retry(&job.fingerprint, job.stage);

        if job.attempts >= self.max_attempts {
            error!(
                fingerprint = %job.fingerprint,
                stage = %job.stage,
                job_id = %job.id,
                attempts = job.attempts,
                error = error,
                "Job permanently failed; dropping"
            );
            self.store.delete(&key).await.inspect_err(|e| {
                warn!(fingerprint = %job.fingerprint, stage = %job.stage, error = %e, "Failed to discard pending retry")
            })?;
            return Ok(RetryOutcome::Exhausted {
                attempts: job.attempts,
            });
        }

        let delay = self.backoff_delay(previous);
        let release_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365));
        let entry = RetryEntry {
            job: job.clone(),
            release_at,
            last_error: error.to_string(),
        };

        self.store
            .set(
                &key,
                &serde_json::to_string(&entry)?,
                Some(delay.saturating_add(self.retention)),
            )
            .await
            .inspect_err(|e| {
                error!(
                    fingerprint = %job.fingerprint,
                    stage = %job.stage,
                    job_id = %job.id,
                    error = %e,
                    "Failed to park job for retry; job lost"
                )
            })?;

        info!(
            fingerprint = %job.fingerprint,
            stage = %job.stage,
            job_id = %job.id,
            attempt = job.attempts,
            delay_ms = delay.as_millis() as u64,
            error = error,
            "Scheduled retry"
        );
        Ok(RetryOutcome::Scheduled {
            attempt: job.attempts,
            delay,
        })
    }

    /// Move every retry that is due now back into its stage queue.
    pub async fn sweep(&self) -> SchedulerResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Move every retry due at `now` back into its stage queue.
    ///
    /// An entry is removed before it is re-enqueued and only the caller that
    /// removed it re-enqueues it, so overlapping sweeps resubmit each entry
    /// at most once. Removal only succeeds while the key still holds the
    /// entry that was read; a newer failure written in between is left
    /// pending.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SchedulerResult<SweepReport> {
        let mut report = SweepReport::default();

        for key in self.store.scan(&self.keys.pattern(KeyKind::Retry)).await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };

            let entry: RetryEntry = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    if self.store.delete_if_eq(&key, &raw).await? {
                        warn!(key = %key, error = %e, "Discarded undecodable retry entry");
                        report.failed += 1;
                    }
                    continue;
                }
            };

            if entry.release_at > now {
                report.pending += 1;
                continue;
            }

            if !self.store.delete_if_eq(&key, &raw).await? {
                // Released by another sweep or replaced by a newer failure
                continue;
            }

            let fingerprint = entry.job.fingerprint.clone();
            let stage = entry.job.stage;
            match self.queue.enqueue(entry.job).await {
                Ok(job_id) => {
                    info!(fingerprint = %fingerprint, stage = %stage, job_id = %job_id, "Released retry");
                    report.requeued += 1;
                }
                Err(e) => {
                    error!(
                        fingerprint = %fingerprint,
                        stage = %stage,
                        error = %e,
                        "Failed to re-enqueue retry; job lost"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// The retry currently parked for `(fingerprint, stage)`, if any.
    pub async fn pending(
        &self,
        fingerprint: &Fingerprint,
        stage: Stage,
    ) -> SchedulerResult<Option<RetryEntry>> {
        match self.store.get(&self.keys.retry(fingerprint, stage)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinator;
    use crate::testing::{coordinator, fingerprint, memory_config};
    use async_trait::async_trait;
    use conveyor_store::{ClaimSpec, MemoryStore, StoreResult};
    use serde_json::json;
    use tokio::sync::Mutex;

    fn failed_job(name: &str) -> Job {
        Job::new(fingerprint(name), Stage::Recon, json!({"url": "http://x"}))
    }

    #[test]
    fn test_backoff_doubles() {
        let (coordinator, _store) = coordinator();
        let retries = coordinator.retries();
        assert_eq!(retries.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(retries.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(retries.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(retries.backoff_delay(40), Duration::from_secs(u32::MAX as u64));
    }

    #[tokio::test]
    async fn test_delays_grow_until_exhausted() {
        let (coordinator, _store) = coordinator();
        let retries = coordinator.retries();
        let mut job = failed_job("abc123");

        let first = retries.schedule_retry(&mut job, "network error").await.unwrap();
        let second = retries.schedule_retry(&mut job, "network error").await.unwrap();
        let third = retries.schedule_retry(&mut job, "network error").await.unwrap();

        assert_eq!(
            first,
            RetryOutcome::Scheduled {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            second,
            RetryOutcome::Scheduled {
                attempt: 2,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(third, RetryOutcome::Exhausted { attempts: 3 });
        assert!(
            retries
                .pending(&job.fingerprint, Stage::Recon)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_new_retry_overwrites_pending_one() {
        let (coordinator, store) = coordinator();
        let retries = coordinator.retries();
        let mut a = failed_job("same");
        let mut b = failed_job("same");

        retries.schedule_retry(&mut a, "first").await.unwrap();
        retries.schedule_retry(&mut b, "second").await.unwrap();

        assert_eq!(store.scan("conveyor:retry:*").await.unwrap().len(), 1);
        let pending = retries
            .pending(&b.fingerprint, Stage::Recon)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.job.id, b.id);
        assert_eq!(pending.last_error, "second");
    }

    #[tokio::test]
    async fn test_sweep_waits_for_release_time() {
        let (coordinator, _store) = coordinator();
        let retries = coordinator.retries();
        let mut job = failed_job("later");
        retries.schedule_retry(&mut job, "boom").await.unwrap();

        let report = retries.sweep_at(Utc::now()).await.unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(report.pending, 1);
        assert_eq!(coordinator.queue().depth(Stage::Recon).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_requeues_due_entries_once() {
        let (coordinator, _store) = coordinator();
        let retries = coordinator.retries();
        let mut job = failed_job("due");
        retries.schedule_retry(&mut job, "boom").await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(5);
        let first = retries.sweep_at(later).await.unwrap();
        let second = retries.sweep_at(later).await.unwrap();
        assert_eq!(first.requeued, 1);
        assert_eq!(second, SweepReport::default());

        let requeued = coordinator.dequeue_job(Stage::Recon).await.unwrap().unwrap();
        assert_eq!(requeued.fingerprint, job.fingerprint);
        assert_eq!(requeued.attempts, 1);
        assert_eq!(requeued.payload, json!({"url": "http://x"}));
        assert_ne!(requeued.id, job.id);
    }

    /// Writes a newer retry entry just before the first conditional delete,
    /// the way a concurrent failure report would land mid-sweep.
    struct Interleaved {
        inner: MemoryStore,
        newer: Mutex<Option<(String, String)>>,
    }

    #[async_trait]
    impl Store for Interleaved {
        fn name(&self) -> &'static str {
            "interleaved"
        }
        async fn push_back(&self, key: &str, value: &str) -> StoreResult<u64> {
            self.inner.push_back(key, value).await
        }
        async fn list_len(&self, key: &str) -> StoreResult<u64> {
            self.inner.list_len(key).await
        }
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.inner.delete(key).await
        }
        async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
            let newer = self.newer.lock().await.take();
            if let Some((newer_key, newer_value)) = newer {
                self.inner.set(&newer_key, &newer_value, None).await?;
            }
            self.inner.delete_if_eq(key, expected).await
        }
        async fn set_guarded(
            &self,
            guard_key: &str,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> StoreResult<bool> {
            self.inner.set_guarded(guard_key, key, value, ttl).await
        }
        async fn exists(&self, key: &str) -> StoreResult<bool> {
            self.inner.exists(key).await
        }
        async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
            self.inner.scan(pattern).await
        }
        async fn pop_and_claim(
            &self,
            list_key: &str,
            claim: &ClaimSpec,
        ) -> StoreResult<Option<String>> {
            self.inner.pop_and_claim(list_key, claim).await
        }
        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
        async fn close(&self) -> StoreResult<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_sweep_keeps_newer_failure_written_mid_sweep() {
        let store = Arc::new(Interleaved {
            inner: MemoryStore::new(),
            newer: Mutex::new(None),
        });
        let coordinator = Coordinator::new(store.clone(), memory_config()).unwrap();
        let retries = coordinator.retries();

        let mut older = failed_job("same");
        older.payload = json!("older");
        retries.schedule_retry(&mut older, "first").await.unwrap();

        let newer = RetryEntry {
            job: Job::new(fingerprint("same"), Stage::Recon, json!("newer")),
            release_at: Utc::now() + chrono::Duration::seconds(60),
            last_error: "second".to_string(),
        };
        *store.newer.lock().await = Some((
            "conveyor:retry:same:recon".to_string(),
            serde_json::to_string(&newer).unwrap(),
        ));

        let report = retries
            .sweep_at(Utc::now() + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(coordinator.queue().depth(Stage::Recon).await.unwrap(), 0);

        let pending = retries
            .pending(&fingerprint("same"), Stage::Recon)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.job.payload, json!("newer"));
        assert_eq!(pending.last_error, "second");
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_discarded() {
        let (coordinator, store) = coordinator();
        store
            .set("conveyor:retry:bad:recon", "{", None)
            .await
            .unwrap();

        let report = coordinator.retries().sweep().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(!store.exists("conveyor:retry:bad:recon").await.unwrap());
    }
}
