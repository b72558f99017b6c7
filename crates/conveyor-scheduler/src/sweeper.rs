//! Periodic promotion of due retries and reaping of stalled jobs.
//!
//! The sweeps themselves carry no timing logic; this task is the ticker a
//! host process runs to drive them.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Coordinator;

/// Totals from one sweeper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub requeued: usize,
    pub pending: usize,
    pub timed_out: usize,
    pub stalled_retried: usize,
    /// Sweeps that could not run because the store failed.
    pub errors: usize,
}

pub struct Sweeper {
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let interval = coordinator.config().sweep_interval;
        Self {
            coordinator,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run both sweeps once. A failing sweep does not stop the other.
    pub async fn tick(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        match self.coordinator.sweep().await {
            Ok(report) => {
                summary.requeued = report.requeued;
                summary.pending = report.pending;
            }
            Err(_) => summary.errors += 1,
        }

        match self.coordinator.sweep_timeouts().await {
            Ok(report) => {
                summary.timed_out = report.timed_out.len();
                summary.stalled_retried = report.retried;
            }
            Err(_) => summary.errors += 1,
        }

        if summary.requeued > 0 || summary.timed_out > 0 || summary.errors > 0 {
            info!(
                requeued = summary.requeued,
                pending = summary.pending,
                timed_out = summary.timed_out,
                stalled_retried = summary.stalled_retried,
                errors = summary.errors,
                "Sweep finished"
            );
        } else {
            debug!(pending = summary.pending, "Sweep finished");
        }
        summary
    }

    /// Sweep every interval until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting sweeper");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Sweeper stopped");
    }
}
