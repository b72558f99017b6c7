//! Coordinator facade composing queue, retries, liveness and inspection.

use conveyor_config::{CoordinatorConfig, StoreBackend};
use conveyor_core::{CompletionResult, Fingerprint, Job, JobId, KeySpace, Stage};
use conveyor_store::{MemoryStore, RedisStore, Store};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    LivenessMonitor, QueueInspector, QueueStats, RetryOutcome, RetryScheduler, SchedulerResult,
    StageQueue, SweepReport,
};

/// Error recorded against jobs whose worker stopped renewing its heartbeat.
pub const STALLED_ERROR: &str = "heartbeat expired";

/// Result of one timeout sweep.
#[derive(Debug, Clone, Default)]
pub struct TimeoutReport {
    /// Jobs whose heartbeat lapsed.
    pub timed_out: Vec<Job>,
    /// Of those, how many were parked for another attempt.
    pub retried: usize,
    /// Of those, how many had no attempts left and were dropped.
    pub exhausted: usize,
}

/// Entry point for producers, workers and the operational sweeper.
///
/// Owns the store connection for its lifetime. Dropping the coordinator
/// releases the connection; `close` does so explicitly.
pub struct Coordinator {
    store: Arc<dyn Store>,
    config: CoordinatorConfig,
    queue: StageQueue,
    liveness: LivenessMonitor,
    retries: RetryScheduler,
    inspector: QueueInspector,
}

impl Coordinator {
    /// Build a coordinator over an existing store client.
    pub fn new(store: Arc<dyn Store>, config: CoordinatorConfig) -> SchedulerResult<Self> {
        let keys = KeySpace::new(config.store.prefix.as_str())?;
        let liveness = LivenessMonitor::new(
            store.clone(),
            keys.clone(),
            config.heartbeat.window,
            config.heartbeat.claim_retention,
        );
        let queue = StageQueue::new(store.clone(), keys.clone(), liveness.clone());
        let retries = RetryScheduler::new(
            store.clone(),
            keys,
            queue.clone(),
            config.retry.max_attempts,
            config.retry.base_delay,
            config.retry.retention,
        );
        let inspector = QueueInspector::new(queue.clone());

        Ok(Self {
            store,
            config,
            queue,
            liveness,
            retries,
            inspector,
        })
    }

    /// Connect to the configured store and build a coordinator over it.
    pub async fn connect(config: CoordinatorConfig) -> SchedulerResult<Self> {
        let store: Arc<dyn Store> = match &config.store.backend {
            StoreBackend::Redis { url, password } => {
                Arc::new(RedisStore::connect(url, password.as_deref()).await?)
            }
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        store
            .ping()
            .await
            .inspect_err(|e| error!(store = store.name(), error = %e, "Store did not answer ping"))?;
        info!(store = store.name(), prefix = %config.store.prefix, "Coordinator ready");
        Self::new(store, config)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn queue(&self) -> &StageQueue {
        &self.queue
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.retries
    }

    /// Start work on `fingerprint` at `stage`.
    pub async fn enqueue_job(
        &self,
        payload: Value,
        stage: Stage,
        fingerprint: &Fingerprint,
    ) -> SchedulerResult<JobId> {
        let job = Job::new(fingerprint.clone(), stage, payload).with_timeout(self.config.job_timeout);
        self.queue.enqueue(job).await
    }

    /// Claim the next job for `stage`, starting its heartbeat.
    pub async fn dequeue_job(&self, stage: Stage) -> SchedulerResult<Option<Job>> {
        self.queue.dequeue(stage).await
    }

    /// Keep a long-running job from being reaped. `false` means it already was.
    pub async fn renew_heartbeat(
        &self,
        fingerprint: &Fingerprint,
        stage: Stage,
    ) -> SchedulerResult<bool> {
        self.liveness.renew(fingerprint, stage).await.inspect_err(|e| {
            warn!(fingerprint = %fingerprint, stage = %stage, error = %e, "Failed to renew heartbeat")
        })
    }

    /// Record that a worker finished `(fingerprint, stage)`.
    ///
    /// On success with a successor stage, one new job carrying `result.data`
    /// is enqueued there and its id returned.
    pub async fn complete_job(
        &self,
        fingerprint: &Fingerprint,
        stage: Stage,
        result: CompletionResult,
    ) -> SchedulerResult<Option<JobId>> {
        if let Err(e) = self.liveness.stop(fingerprint, stage).await {
            warn!(fingerprint = %fingerprint, stage = %stage, error = %e, "Failed to stop heartbeat");
        }

        let next = match result.next_stage {
            Some(next_stage) if result.success => {
                let job = Job::new(fingerprint.clone(), next_stage, result.data)
                    .with_timeout(self.config.job_timeout);
                Some(self.queue.enqueue(job).await?)
            }
            _ => None,
        };

        info!(
            fingerprint = %fingerprint,
            stage = %stage,
            success = result.success,
            next_stage = ?result.next_stage,
            "Job completed"
        );
        Ok(next)
    }

    /// Report a failed attempt; the job is parked for a retry or dropped.
    pub async fn retry_job(&self, job: &mut Job, error: &str) -> SchedulerResult<RetryOutcome> {
        if let Err(e) = self.liveness.stop(&job.fingerprint, job.stage).await {
            warn!(fingerprint = %job.fingerprint, stage = %job.stage, error = %e, "Failed to stop heartbeat");
        }
        self.retries.schedule_retry(job, error).await
    }

    /// Move due retries back into their stage queues.
    pub async fn sweep(&self) -> SchedulerResult<SweepReport> {
        self.retries
            .sweep()
            .await
            .inspect_err(|e| error!(error = %e, "Retry sweep failed"))
    }

    /// Reap jobs whose heartbeat lapsed.
    ///
    /// With `retry_stalled` enabled each reaped job is charged one failed
    /// attempt and parked for a retry like any other failure.
    pub async fn sweep_timeouts(&self) -> SchedulerResult<TimeoutReport> {
        let timed_out = self
            .liveness
            .sweep_timeouts()
            .await
            .inspect_err(|e| error!(error = %e, "Timeout sweep failed"))?;

        let mut report = TimeoutReport::default();
        if self.config.retry_stalled {
            for job in &timed_out {
                let mut job = job.clone();
                match self.retries.schedule_retry(&mut job, STALLED_ERROR).await {
                    Ok(RetryOutcome::Scheduled { .. }) => report.retried += 1,
                    Ok(RetryOutcome::Exhausted { .. }) => report.exhausted += 1,
                    Err(e) => {
                        error!(
                            fingerprint = %job.fingerprint,
                            stage = %job.stage,
                            error = %e,
                            "Failed to retry stalled job"
                        );
                    }
                }
            }
        }
        report.timed_out = timed_out;
        Ok(report)
    }

    pub async fn stats(&self) -> SchedulerResult<QueueStats> {
        self.inspector
            .stats()
            .await
            .inspect_err(|e| error!(error = %e, "Failed to read queue stats"))
    }

    /// Release the store connection.
    pub async fn close(self) -> SchedulerResult<()> {
        self.store.close().await?;
        info!("Coordinator closed");
        Ok(())
    }
}
