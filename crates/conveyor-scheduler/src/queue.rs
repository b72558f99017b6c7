//! Per-stage job queues held in the shared store.
//!
//! Each `(fingerprint, stage)` pair owns one FIFO list. Producers append to
//! the tail; a dequeue pops the head of whichever list for the stage it finds
//! first and claims the job for the caller in the same atomic step. A list
//! whose previous job is still claimed is skipped until that job completes,
//! fails, or is reaped.

use chrono::Utc;
use conveyor_core::{Job, JobId, KeyKind, KeySpace, Stage};
use conveyor_store::Store;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{LivenessMonitor, SchedulerResult};

/// Job queue backed by the shared store.
#[derive(Clone)]
pub struct StageQueue {
    store: Arc<dyn Store>,
    keys: KeySpace,
    liveness: LivenessMonitor,
}

impl StageQueue {
    pub fn new(store: Arc<dyn Store>, keys: KeySpace, liveness: LivenessMonitor) -> Self {
        Self {
            store,
            keys,
            liveness,
        }
    }

    /// Enqueue a job at the tail of its `(fingerprint, stage)` list.
    ///
    /// A fresh job id and enqueue time are assigned on every call.
    pub async fn enqueue(&self, mut job: Job) -> SchedulerResult<JobId> {
        job.id = JobId::new();
        job.created_at = Utc::now();

        let key = self.keys.queue(&job.fingerprint, job.stage);
        let len = self
            .store
            .push_back(&key, &job.to_json()?)
            .await
            .inspect_err(|e| {
                error!(
                    fingerprint = %job.fingerprint,
                    stage = %job.stage,
                    error = %e,
                    "Failed to enqueue job"
                )
            })?;

        info!(
            fingerprint = %job.fingerprint,
            stage = %job.stage,
            job_id = %job.id,
            attempts = job.attempts,
            queue_len = len,
            "Enqueued job"
        );
        Ok(job.id)
    }

    /// Claim the next job for `stage`, or `None` when no queue for it has an
    /// unclaimed job ready.
    ///
    /// Never waits for work. The claimed job gets a heartbeat; the caller
    /// must complete it, retry it, or let the liveness sweep reap it.
    pub async fn dequeue(&self, stage: Stage) -> SchedulerResult<Option<Job>> {
        let pattern = self.keys.stage_pattern(KeyKind::Queue, stage);
        let queue_keys = self.store.scan(&pattern).await.inspect_err(|e| {
            error!(stage = %stage, error = %e, "Failed to list queues")
        })?;

        for key in queue_keys {
            let Some((fingerprint, key_stage)) = self.keys.parse(KeyKind::Queue, &key) else {
                continue;
            };

            // Keep popping this list past undecodable entries
            loop {
                let claim = self.liveness.claim_spec(&fingerprint, key_stage);
                let raw = self
                    .store
                    .pop_and_claim(&key, &claim)
                    .await
                    .inspect_err(|e| {
                        error!(fingerprint = %fingerprint, stage = %stage, error = %e, "Failed to dequeue job")
                    })?;
                let Some(raw) = raw else {
                    // Drained or still claimed
                    break;
                };

                match Job::from_json(&raw) {
                    Ok(job) => {
                        info!(
                            fingerprint = %fingerprint,
                            stage = %stage,
                            job_id = %job.id,
                            attempts = job.attempts,
                            "Claimed job"
                        );
                        return Ok(Some(job));
                    }
                    Err(e) => {
                        warn!(
                            fingerprint = %fingerprint,
                            stage = %stage,
                            error = %e,
                            "Dropping undecodable queue entry"
                        );
                        self.liveness
                            .stop(&fingerprint, key_stage)
                            .await
                            .inspect_err(|e| {
                                warn!(fingerprint = %fingerprint, stage = %stage, error = %e, "Failed to clear claim")
                            })?;
                    }
                }
            }
        }

        Ok(None)
    }

    /// Total number of queued jobs for `stage` across all fingerprints.
    pub async fn depth(&self, stage: Stage) -> SchedulerResult<u64> {
        let pattern = self.keys.stage_pattern(KeyKind::Queue, stage);
        let mut total = 0;
        for key in self.store.scan(&pattern).await? {
            total += self.store.list_len(&key).await?;
        }
        Ok(total)
    }
}
