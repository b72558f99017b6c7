//! Worker that processes jobs from one stage queue.

use async_trait::async_trait;
use conveyor_core::{CompletionResult, Job, Stage};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Coordinator, RetryOutcome, SchedulerResult};

/// Stage-specific processing logic supplied by the caller.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<CompletionResult>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Wait between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Wait after the store could not be reached.
    pub error_backoff: Duration,
    /// How often a running job's heartbeat is renewed.
    pub renew_interval: Duration,
}

impl WorkerConfig {
    /// Defaults that renew three times per heartbeat window.
    pub fn for_window(window: Duration) -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            renew_interval: window / 3,
        }
    }
}

/// A worker that claims and executes jobs for a single stage.
pub struct Worker {
    id: String,
    stage: Stage,
    coordinator: Arc<Coordinator>,
    handler: Arc<dyn StageHandler>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        stage: Stage,
        coordinator: Arc<Coordinator>,
        handler: Arc<dyn StageHandler>,
    ) -> Self {
        let config = WorkerConfig::for_window(coordinator.config().heartbeat.window);
        Self {
            id: id.into(),
            stage,
            coordinator,
            handler,
            config,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the worker loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, stage = %self.stage, "Starting worker");

        loop {
            let wait = match self.run_once().await {
                Ok(true) => continue,
                // No jobs available, wait before polling again
                Ok(false) => self.config.poll_interval,
                Err(e) if e.is_unreachable() => {
                    warn!(worker_id = %self.id, stage = %self.stage, error = %e, "Store unreachable; backing off");
                    self.config.error_backoff
                }
                Err(e) => {
                    warn!(worker_id = %self.id, stage = %self.stage, error = %e, "Failed to claim job");
                    self.config.poll_interval
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        info!(worker_id = %self.id, stage = %self.stage, "Worker stopped");
    }

    /// Claim and process at most one job. Returns whether a job was found.
    pub async fn run_once(&self) -> SchedulerResult<bool> {
        match self.coordinator.dequeue_job(self.stage).await? {
            Some(job) => {
                self.process(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, mut job: Job) {
        debug!(worker_id = %self.id, job_id = %job.id, stage = %job.stage, "Processing job");

        let renewal = CancellationToken::new();
        let renew_handle = tokio::spawn(renew_heartbeat(
            self.coordinator.clone(),
            job.clone(),
            self.config.renew_interval,
            renewal.clone(),
        ));

        let result = tokio::time::timeout(job.timeout(), self.handler.handle(&job)).await;

        renewal.cancel();
        join_renewal(renew_handle, &job).await;

        let failure = match result {
            Ok(Ok(completion)) => {
                if let Err(e) = self
                    .coordinator
                    .complete_job(&job.fingerprint, job.stage, completion)
                    .await
                {
                    warn!(worker_id = %self.id, job_id = %job.id, error = %e, "Failed to report completion");
                }
                return;
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!("timed out after {}s", job.timeout_secs),
        };

        warn!(worker_id = %self.id, job_id = %job.id, stage = %job.stage, error = %failure, "Job failed");
        match self.coordinator.retry_job(&mut job, &failure).await {
            Ok(RetryOutcome::Scheduled { attempt, delay }) => {
                debug!(job_id = %job.id, attempt = attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
            }
            Ok(RetryOutcome::Exhausted { .. }) => {}
            Err(e) => {
                warn!(worker_id = %self.id, job_id = %job.id, error = %e, "Failed to schedule retry");
            }
        }
    }
}

/// Wait for the renewal task to wind down. Returns `false` if it panicked.
async fn join_renewal(handle: JoinHandle<()>, job: &Job) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(job_id = %job.id, stage = %job.stage, error = %e, "Heartbeat renewal task failed");
            false
        }
    }
}

/// Keep a job's heartbeat alive until `cancel` fires.
async fn renew_heartbeat(
    coordinator: Arc<Coordinator>,
    job: Job,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match coordinator.renew_heartbeat(&job.fingerprint, job.stage).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(job_id = %job.id, stage = %job.stage, "Heartbeat lapsed; job may be processed twice");
                    }
                    Err(_) => {} // logged by the coordinator
                }
            }
        }
    }
}
