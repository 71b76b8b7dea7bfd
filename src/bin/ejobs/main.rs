mod args;
mod handlers;

use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use enchanted_jobs::config::Config;
use enchanted_jobs::types::options::JobOptions;
use enchanted_jobs::{Job, JobContext, JobError, MemoryStore, RunOutcome};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn, Level};

use crate::args::Args;

/// Layout of the file passed with `--config`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WorkerFile {
    worker: Config,
    jobs: Vec<JobOptions>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    // Cancellation and termination channel.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    // Every in-flight run holds a sender; recv() returns once they're gone.
    let (shutdown_hold, mut shutdown_wait) = mpsc::channel::<()>(1);

    let exit_code = if let Err(error) = begin(args, cancel, shutdown_hold).await
    {
        error!(error = %format!("{error:#}"), "encountered runtime error");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    };

    shutdown_wait.recv().await;

    exit_code
}

fn load(path: &Path) -> Result<WorkerFile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))
}

async fn begin(
    args: Args,
    cancel: CancellationToken,
    shutdown_hold: mpsc::Sender<()>,
) -> Result<()> {
    let file = match &args.config {
        Some(path) => load(path)?,
        None => WorkerFile::default(),
    };
    let settings = file.worker.normalise().context("invalid worker settings")?;
    let heartbeat = (settings.lease_lifetime / 2)
        .to_std()
        .context("computing heartbeat")?;

    let ctx = JobContext::new(
        Arc::new(MemoryStore::new()),
        handlers::builtin(heartbeat),
        settings,
    );

    for options in file.jobs {
        let mut job = Job::new(ctx.clone(), options);
        let name = job.name().to_owned();
        job.save()
            .await
            .with_context(|| format!("seeding job {name:?}"))?;
        info!(id = ?job.id(), %name, "seeded job");
    }

    info!(
        worker = ctx.worker_name().unwrap_or("-"),
        lease = %humantime::format_duration(
            ctx.lease().lifetime().to_std().unwrap_or_default()
        ),
        "polling for due jobs",
    );

    let mut ticker = time::interval(args.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Poll for due jobs until an exit signal is sent, and run each claimed job
    // as its own task.
    loop {
        select! {
            _ = ticker.tick() => {},
            _ = cancel.cancelled() => break,
        }

        if let Err(error) = poll(&ctx, args.batch, &shutdown_hold).await {
            warn!(%error, "failed to poll for due jobs");
        }
    }

    // In-flight handlers observe this through their job's token.
    ctx.shutdown();

    Ok(())
}

async fn poll(
    ctx: &Arc<JobContext>,
    batch: usize,
    shutdown_hold: &mpsc::Sender<()>,
) -> Result<(), JobError> {
    let now = Utc::now();
    let due = ctx
        .store()
        .due(now, ctx.lease().stale_before(now), batch)
        .await?;
    trace!(count = due.len(), "polled");

    for attrs in due {
        let mut job = Job::from_attrs(ctx.clone(), attrs);
        match job.acquire().await {
            Ok(()) => {},
            // Another worker got there first.
            Err(JobError::LeaseConflict(id)) => {
                debug!(id, "skipping job leased elsewhere");
                continue;
            },
            Err(error) => return Err(error),
        }

        tokio::spawn(begin_run(shutdown_hold.clone(), job));
    }

    Ok(())
}

#[instrument(name = "job", fields(id = ?job.id(), name = %job.name()), skip_all)]
async fn begin_run(_shutdown_hold: mpsc::Sender<()>, mut job: Job) {
    match job.run().await {
        Ok(RunOutcome::Succeeded) => info!(
            state = %job.state(),
            next_run_at = ?job.attrs().next_run_at,
            "job succeeded"
        ),
        Ok(RunOutcome::Failed(error)) => {
            warn!(%error, state = %job.state(), "job failed")
        },
        Ok(RunOutcome::Cancelled) => info!("job cancelled"),
        Err(error) => error!(%error, "unable to run job"),
    }
}
