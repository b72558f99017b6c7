//! Liveness tracking for dequeued jobs.
//!
//! A dequeued job leaves two records behind: an expiring heartbeat that the
//! worker keeps renewing, and a claim holding the job itself. A claim whose
//! heartbeat has expired belongs to a worker that stalled or died. While a
//! claim exists its `(fingerprint, stage)` queue is not served, so one claim
//! always describes exactly one job.

use chrono::Utc;
use conveyor_core::{Fingerprint, Job, KeyKind, KeySpace, Stage};
use conveyor_store::{ClaimSpec, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::SchedulerResult;

#[derive(Clone)]
pub struct LivenessMonitor {
    store: Arc<dyn Store>,
    keys: KeySpace,
    window: Duration,
    claim_retention: Duration,
}

impl LivenessMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        keys: KeySpace,
        window: Duration,
        claim_retention: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            window,
            claim_retention,
        }
    }

    /// Records to write when a job for `(fingerprint, stage)` is popped.
    pub fn claim_spec(&self, fingerprint: &Fingerprint, stage: Stage) -> ClaimSpec {
        ClaimSpec {
            heartbeat_key: self.keys.heartbeat(fingerprint, stage),
            heartbeat_value: Utc::now().to_rfc3339(),
            heartbeat_ttl: self.window,
            claim_key: self.keys.claim(fingerprint, stage),
            claim_ttl: self.claim_retention,
        }
    }

    /// Start (or restart) tracking a job that was claimed outside `dequeue`.
    pub async fn start(&self, job: &Job) -> SchedulerResult<()> {
        let spec = self.claim_spec(&job.fingerprint, job.stage);
        self.store
            .set(&spec.claim_key, &job.to_json()?, Some(spec.claim_ttl))
            .await?;
        self.store
            .set(&spec.heartbeat_key, &spec.heartbeat_value, Some(spec.heartbeat_ttl))
            .await?;
        debug!(fingerprint = %job.fingerprint, stage = %job.stage, "Heartbeat started");
        Ok(())
    }

    /// Extend the heartbeat window.
    ///
    /// Returns `false` when the job has already been reaped, in which case
    /// nothing is written and the worker no longer owns it.
    pub async fn renew(&self, fingerprint: &Fingerprint, stage: Stage) -> SchedulerResult<bool> {
        let renewed = self
            .store
            .set_guarded(
                &self.keys.claim(fingerprint, stage),
                &self.keys.heartbeat(fingerprint, stage),
                &Utc::now().to_rfc3339(),
                self.window,
            )
            .await?;
        if renewed {
            debug!(fingerprint = %fingerprint, stage = %stage, "Heartbeat renewed");
        }
        Ok(renewed)
    }

    /// Stop tracking `(fingerprint, stage)`.
    pub async fn stop(&self, fingerprint: &Fingerprint, stage: Stage) -> SchedulerResult<()> {
        self.store
            .delete(&self.keys.heartbeat(fingerprint, stage))
            .await?;
        self.store.delete(&self.keys.claim(fingerprint, stage)).await?;
        debug!(fingerprint = %fingerprint, stage = %stage, "Heartbeat stopped");
        Ok(())
    }

    pub async fn is_alive(&self, fingerprint: &Fingerprint, stage: Stage) -> SchedulerResult<bool> {
        Ok(self
            .store
            .exists(&self.keys.heartbeat(fingerprint, stage))
            .await?)
    }

    /// Reap every claimed job whose heartbeat has lapsed.
    ///
    /// Reaped claims are removed and their jobs returned; deciding whether to
    /// run them again is up to the caller. Each claim is reported by exactly
    /// one sweeper, even when several run at once.
    pub async fn sweep_timeouts(&self) -> SchedulerResult<Vec<Job>> {
        let mut timed_out = Vec::new();

        for claim_key in self.store.scan(&self.keys.pattern(KeyKind::Claim)).await? {
            let Some((fingerprint, stage)) = self.keys.parse(KeyKind::Claim, &claim_key) else {
                continue;
            };

            match self.reap(&claim_key, &fingerprint, stage).await {
                Ok(Some(job)) => {
                    warn!(
                        fingerprint = %fingerprint,
                        stage = %stage,
                        job_id = %job.id,
                        "Job timed out: heartbeat expired without completion"
                    );
                    timed_out.push(job);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        fingerprint = %fingerprint,
                        stage = %stage,
                        error = %e,
                        "Failed to check heartbeat"
                    );
                }
            }
        }

        Ok(timed_out)
    }

    async fn reap(
        &self,
        claim_key: &str,
        fingerprint: &Fingerprint,
        stage: Stage,
    ) -> SchedulerResult<Option<Job>> {
        if self.is_alive(fingerprint, stage).await? {
            return Ok(None);
        }
        let Some(raw) = self.store.get(claim_key).await? else {
            return Ok(None);
        };
        if !self.store.delete_if_eq(claim_key, &raw).await? {
            // Another sweeper got there first
            return Ok(None);
        }

        match Job::from_json(&raw) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                warn!(
                    fingerprint = %fingerprint,
                    stage = %stage,
                    error = %e,
                    "Discarding undecodable claim"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{coordinator, fingerprint};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_starts_heartbeat() {
        let (coordinator, _store) = coordinator();
        let f = fingerprint("abc123");
        coordinator
            .enqueue_job(json!({}), Stage::Recon, &f)
            .await
            .unwrap();

        let liveness = coordinator.liveness();
        assert!(!liveness.is_alive(&f, Stage::Recon).await.unwrap());
        coordinator.dequeue_job(Stage::Recon).await.unwrap().unwrap();
        assert!(liveness.is_alive(&f, Stage::Recon).await.unwrap());
        assert!(!liveness.is_alive(&f, Stage::Correlation).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_heartbeat_is_reaped_once() {
        let (coordinator, _store) = coordinator();
        let f = fingerprint("stalled");
        coordinator
            .enqueue_job(json!({"n": 1}), Stage::Analyst, &f)
            .await
            .unwrap();
        let job = coordinator.dequeue_job(Stage::Analyst).await.unwrap().unwrap();

        let liveness = coordinator.liveness();
        assert!(liveness.sweep_timeouts().await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let reaped = liveness.sweep_timeouts().await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id, job.id);
        assert_eq!(reaped[0].payload, json!({"n": 1}));

        assert!(liveness.sweep_timeouts().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_prevents_reaping() {
        let (coordinator, _store) = coordinator();
        let f = fingerprint("slow");
        coordinator
            .enqueue_job(json!({}), Stage::Recon, &f)
            .await
            .unwrap();
        coordinator.dequeue_job(Stage::Recon).await.unwrap().unwrap();

        let liveness = coordinator.liveness();
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(20)).await;
            assert!(liveness.renew(&f, Stage::Recon).await.unwrap());
            assert!(liveness.sweep_timeouts().await.unwrap().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_after_reap_reports_lost_ownership() {
        let (coordinator, _store) = coordinator();
        let f = fingerprint("late");
        coordinator
            .enqueue_job(json!({}), Stage::Recon, &f)
            .await
            .unwrap();
        coordinator.dequeue_job(Stage::Recon).await.unwrap().unwrap();

        let liveness = coordinator.liveness();
        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(liveness.sweep_timeouts().await.unwrap().len(), 1);
        assert!(!liveness.renew(&f, Stage::Recon).await.unwrap());
        assert!(!liveness.is_alive(&f, Stage::Recon).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_job_is_not_hidden_by_queued_sibling() {
        let (coordinator, _store) = coordinator();
        let f = fingerprint("abc123");
        let first = coordinator
            .enqueue_job(json!({"n": 1}), Stage::Recon, &f)
            .await
            .unwrap();
        let second = coordinator
            .enqueue_job(json!({"n": 2}), Stage::Recon, &f)
            .await
            .unwrap();
        coordinator.dequeue_job(Stage::Recon).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        // The stalled claim holds the key until it is reaped
        assert!(coordinator.dequeue_job(Stage::Recon).await.unwrap().is_none());

        let reaped = coordinator.liveness().sweep_timeouts().await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id, first);

        let next = coordinator.dequeue_job(Stage::Recon).await.unwrap().unwrap();
        assert_eq!(next.id, second);
    }

    #[tokio::test]
    async fn test_renew_without_claim_writes_nothing() {
        let (coordinator, store) = coordinator();
        let f = fingerprint("gone");
        assert!(!coordinator.liveness().renew(&f, Stage::Recon).await.unwrap());
        assert!(store.scan("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_clears_heartbeat_and_claim() {
        let (coordinator, store) = coordinator();
        let f = fingerprint("done");
        let job = Job::new(f.clone(), Stage::Advisory, json!(null));

        let liveness = coordinator.liveness();
        liveness.start(&job).await.unwrap();
        assert!(liveness.is_alive(&f, Stage::Advisory).await.unwrap());

        liveness.stop(&f, Stage::Advisory).await.unwrap();
        assert!(!liveness.is_alive(&f, Stage::Advisory).await.unwrap());
        assert!(store.scan("*").await.unwrap().is_empty());
    }
}
