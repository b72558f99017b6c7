//! Retry and timeout sweeps.

use anyhow::Result;
use conveyor_scheduler::Sweeper;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Settings;

pub async fn retries(settings: &Settings) -> Result<()> {
    let coordinator = settings.connect().await?;
    let result = coordinator.sweep().await;
    coordinator.close().await?;

    let report = result?;
    println!(
        "requeued {}, pending {}, failed {}",
        report.requeued, report.pending, report.failed
    );
    Ok(())
}

pub async fn timeouts(settings: &Settings) -> Result<()> {
    let coordinator = settings.connect().await?;
    let result = coordinator.sweep_timeouts().await;
    coordinator.close().await?;

    let report = result?;
    for job in &report.timed_out {
        println!("{}  {}  {}", job.id, job.fingerprint, job.stage);
    }
    println!(
        "timed out {}, retried {}, exhausted {}",
        report.timed_out.len(),
        report.retried,
        report.exhausted
    );
    Ok(())
}

pub async fn run(settings: &Settings, interval: Option<u64>) -> Result<()> {
    let coordinator = Arc::new(settings.connect().await?);
    let mut sweeper = Sweeper::new(coordinator.clone());
    if let Some(secs) = interval {
        sweeper = sweeper.with_interval(Duration::from_secs(secs.max(1)));
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), shutdown.clone()));

    sweeper.run(shutdown).await;
    drop(sweeper);

    match Arc::try_unwrap(coordinator) {
        Ok(coordinator) => coordinator.close().await?,
        Err(_) => warn!("Coordinator still shared at shutdown; skipping close"),
    }
    Ok(())
}

/// Cancel `shutdown` once `signal` fires. A signal that could not be
/// installed leaves the token alone.
async fn cancel_on_signal<F>(signal: F, shutdown: CancellationToken)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Shutting down");
            shutdown.cancel();
        }
        Err(e) => {
            warn!(error = %e, "Failed to listen for interrupt; stop the sweeper with a kill");
        }
    }
}
