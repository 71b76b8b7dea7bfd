use std::time::Duration;

use anyhow::{Context, Result};
use enchanted_jobs::{Job, Registry};
use serde_json::Value;
use tokio::select;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// Built-in handlers so a config file can schedule something useful without
/// any code.
pub(crate) fn builtin(heartbeat: Duration) -> Registry {
    let mut registry = Registry::new();
    registry
        .define_fn("log", |job| Box::pin(log(job)))
        .define_fn("sleep", move |job| Box::pin(sleep(job, heartbeat)));
    registry
}

/// Logs the job's data.
async fn log(job: &mut Job) -> Result<()> {
    info!(name = %job.name(), data = %job.data(), "log job");
    Ok(())
}

/// Sleeps for `data.duration` (default one second), keeping the lease alive
/// and stopping early on cancellation.
async fn sleep(job: &mut Job, heartbeat: Duration) -> Result<()> {
    let duration = match job.data().get("duration") {
        Some(Value::String(text)) => humantime::parse_duration(text)
            .with_context(|| format!("parsing duration {text:?}"))?,
        Some(other) => anyhow::bail!("duration must be a string, got {other}"),
        None => Duration::from_secs(1),
    };

    let cancel = job.cancellation_token();
    let deadline = Instant::now() + duration;
    let mut ticker = time::interval_at(Instant::now() + heartbeat, heartbeat);

    loop {
        select! {
            _ = time::sleep_until(deadline) => return Ok(()),
            _ = cancel.cancelled() => {
                debug!("sleep interrupted");
                return Ok(());
            },
            _ = ticker.tick() => job.touch().await.context("renewing lease")?,
        }
    }
}
