//! Job submission and queue inspection.

use anyhow::{Context, Result};
use conveyor_core::{Fingerprint, Stage};

use super::Settings;

pub async fn enqueue(
    settings: &Settings,
    fingerprint: Option<String>,
    request: Option<String>,
    stage: Stage,
    payload: &str,
) -> Result<()> {
    let fingerprint = match (fingerprint, request) {
        (Some(value), _) => Fingerprint::new(value)?,
        (None, Some(request)) => Fingerprint::of(request),
        (None, None) => anyhow::bail!("either a fingerprint or --request is required"),
    };
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;

    let coordinator = settings.connect().await?;
    let result = coordinator.enqueue_job(payload, stage, &fingerprint).await;
    coordinator.close().await?;

    let job_id = result?;
    println!("{}", job_id);
    Ok(())
}

pub async fn stats(settings: &Settings, json: bool) -> Result<()> {
    let coordinator = settings.connect().await?;
    let result = coordinator.stats().await;
    coordinator.close().await?;

    let stats = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", stats);
        println!("{:<12} {}", "total", stats.total());
    }
    Ok(())
}
