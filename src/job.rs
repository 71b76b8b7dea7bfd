//! The job aggregate: one unit of deferred or recurring work.
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::context::JobContext;
use crate::error::{JobError, RecurrenceError, Result};
use crate::failure;
use crate::parser::parse_time_of_day;
use crate::recurrence::{next_run_after, When};
use crate::store::UpsertMode;
use crate::types::events::JobEvent;
use crate::types::job::{JobAttrs, JobType, UniqueOptions, UniqueQuery};
use crate::types::options::JobOptions;
use crate::types::priority::{resolve, PriorityInput};
use crate::types::states::JobState;

/// Subscribers that fall this far behind start missing events.
const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepeatOptions {
    /// IANA timezone the interval is evaluated in. `None` means UTC.
    pub timezone: Option<String>,
}

impl RepeatOptions {
    pub fn in_timezone(timezone: impl Into<String>) -> Self {
        Self {
            timezone: Some(timezone.into()),
        }
    }
}

/// How a call to [`Job::run`] ended. Failures of the job's own logic are an
/// outcome, not an error: they have already been recorded on the job.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded,
    Failed(JobError),
    /// The job was cancelled before or during execution. Nothing was
    /// recorded.
    Cancelled,
}

pub struct Job {
    attrs: JobAttrs,
    ctx: Arc<JobContext>,
    cancel: CancellationToken,
    cancel_reported: AtomicBool,
    /// Set only while executable logic is in flight in this process.
    executing: bool,
    events: broadcast::Sender<JobEvent>,
}

impl Job {
    /// Creates a job from caller-supplied options. Unless told otherwise, the
    /// job is due immediately.
    pub fn new(ctx: Arc<JobContext>, options: JobOptions) -> Self {
        Self::from_attrs(ctx, options.normalise(Utc::now()))
    }

    /// Wraps a record loaded from a store.
    pub fn from_attrs(ctx: Arc<JobContext>, attrs: JobAttrs) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            attrs,
            cancel: ctx.job_token(),
            ctx,
            cancel_reported: AtomicBool::new(false),
            executing: false,
            events,
        }
    }

    pub fn id(&self) -> Option<u64> {
        self.attrs.id
    }

    pub fn name(&self) -> &str {
        &self.attrs.name
    }

    pub fn data(&self) -> &Value {
        &self.attrs.data
    }

    pub fn data_mut(&mut self) -> &mut Value {
        &mut self.attrs.data
    }

    pub fn priority(&self) -> i32 {
        self.attrs.priority
    }

    pub fn attrs(&self) -> &JobAttrs {
        &self.attrs
    }

    pub fn is_disabled(&self) -> bool {
        self.attrs.disabled
    }

    pub fn state(&self) -> JobState {
        if self.is_cancelled() {
            JobState::Cancelled
        } else if self.attrs.locked_at.is_some() {
            JobState::Leased
        } else if self.attrs.next_run_at.is_some() {
            JobState::Scheduled
        } else if self.attrs.last_finished_at.is_some() {
            // A success clears failedAt.
            if self.attrs.failed_at.is_some() {
                JobState::Failed
            } else {
                JobState::Completed
            }
        } else {
            JobState::Created
        }
    }

    /// Receives this job's lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: JobEvent) {
        trace!(?event, "emitting");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Recomputes `nextRunAt` from the recurrence spec, using the current
    /// `nextRunAt` (or now) as the reference. Jobs without a recurrence spec
    /// are left alone. On error the schedule is untouched.
    pub fn compute_next_run_at(&mut self) -> Result<Option<DateTime<Utc>>> {
        let reference = self.attrs.next_run_at.unwrap_or_else(Utc::now);
        self.compute_next_run_at_from(reference)
    }

    fn compute_next_run_at_from(
        &mut self,
        reference: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        if !self.attrs.is_recurring() {
            return Ok(self.attrs.next_run_at);
        }

        let next = next_run_after(
            reference,
            self.attrs.repeat_interval.as_deref(),
            self.attrs.repeat_at.as_deref(),
            self.attrs.repeat_timezone.as_deref(),
        )?;
        trace!(%reference, ?next, "computed next run");
        self.attrs.next_run_at = next;
        Ok(next)
    }

    /// Makes the job recur on a calendar expression (`"0 9 * * 1-5"`) or a
    /// human interval (`"2 hours"`).
    pub fn repeat_every(
        &mut self,
        interval: &str,
        options: RepeatOptions,
    ) -> Result<&mut Self> {
        let previous = (
            self.attrs.repeat_interval.replace(interval.to_owned()),
            std::mem::replace(&mut self.attrs.repeat_timezone, options.timezone),
        );

        if let Err(error) = self.compute_next_run_at() {
            (self.attrs.repeat_interval, self.attrs.repeat_timezone) = previous;
            return Err(error);
        }
        Ok(self)
    }

    /// Makes the job recur daily at a wall-clock time such as `"3:00pm"`.
    pub fn repeat_at(&mut self, time: &str) -> Result<&mut Self> {
        // Checked up front: an interval, if set, would otherwise shadow it.
        parse_time_of_day(time).map_err(|reason| RecurrenceError::TimeOfDay {
            expr: time.to_owned(),
            reason,
        })?;

        let previous = self.attrs.repeat_at.replace(time.to_owned());

        if let Err(error) = self.compute_next_run_at() {
            self.attrs.repeat_at = previous;
            return Err(error);
        }
        Ok(self)
    }

    /// Sets `nextRunAt` directly, regardless of any recurrence spec.
    pub fn schedule(&mut self, when: impl Into<When>) -> &mut Self {
        self.attrs.next_run_at = Some(when.into().resolve(Utc::now()));
        self
    }

    /// Re-resolves the priority. Unknown names leave it unchanged.
    pub fn set_priority(
        &mut self,
        priority: impl Into<PriorityInput>,
    ) -> Result<&mut Self> {
        let priority = priority.into();
        self.attrs.priority = resolve(&priority)
            .ok_or_else(|| JobError::InvalidPriority(priority.to_string()))?;
        Ok(self)
    }

    /// Makes `save` update the record matching `query` (plus this job's
    /// name) instead of inserting a new one.
    pub fn unique(
        &mut self,
        query: UniqueQuery,
        options: UniqueOptions,
    ) -> &mut Self {
        self.attrs.unique = Some(query);
        self.attrs.unique_opts = options;
        self
    }

    pub fn disable(&mut self) -> &mut Self {
        self.attrs.disabled = true;
        self
    }

    pub fn enable(&mut self) -> &mut Self {
        self.attrs.disabled = false;
        self
    }

    /// Records a failure and notifies subscribers.
    pub fn fail(&mut self, reason: impl fmt::Display) -> &mut Self {
        let reason = reason.to_string();
        let fail_count =
            failure::record_failure(&mut self.attrs, reason.clone(), Utc::now());
        warn!(name = %self.attrs.name, %reason, fail_count, "job failed");
        self.emit(JobEvent::Fail { reason, fail_count });
        self
    }

    /// Claims the execution lease for this worker.
    #[instrument(name = "acquire", skip_all, err, fields(id = ?self.attrs.id))]
    pub async fn acquire(&mut self) -> Result<()> {
        let now = Utc::now();
        self.ctx
            .lease()
            .acquire(self.ctx.store(), &mut self.attrs, now)
            .await?;
        self.emit(JobEvent::Locked { at: now });
        Ok(())
    }

    /// Gives up the execution lease.
    pub async fn release(&mut self) -> Result<()> {
        let held = self.attrs.locked_at.is_some();
        self.ctx
            .lease()
            .release(self.ctx.store(), &mut self.attrs)
            .await?;
        if held {
            self.emit(JobEvent::Released);
        }
        Ok(())
    }

    /// Renews the execution lease. Handlers that may outlive the lease
    /// lifetime must call this periodically.
    pub async fn touch(&mut self) -> Result<()> {
        let now = Utc::now();
        self.ctx
            .lease()
            .renew(self.ctx.store(), &mut self.attrs, now)
            .await?;
        self.emit(JobEvent::Touched { at: now });
        Ok(())
    }

    pub fn is_leased(&self) -> bool {
        self.ctx.lease().is_leased(&self.attrs, Utc::now())
    }

    /// Whether the job is executing here, or has been started under a live
    /// lease elsewhere and not yet finished.
    pub fn is_running(&self) -> bool {
        self.executing
            || (self.is_leased()
                && self.attrs.last_run_at > self.attrs.last_finished_at)
    }

    /// Persists the job. Jobs already saved are updated by id; otherwise
    /// `single` jobs and jobs with a unique query are upserted, and anything
    /// else is inserted.
    #[instrument(name = "save", skip_all, err, fields(name = %self.attrs.name))]
    pub async fn save(&mut self) -> Result<&mut Self> {
        let mut record = self.attrs.clone();
        record.last_modified_by = self.ctx.worker_name().map(str::to_owned);
        let store = self.ctx.store();

        let saved = if record.id.is_some() {
            store.update(&record).await?
        } else if record.kind == JobType::Single {
            let mut filter = UniqueQuery::new();
            filter.insert("name".into(), json!(record.name));
            filter.insert("type".into(), json!(JobType::Single));
            // A due single job must not push back the schedule of the
            // record it merges into.
            let mode = if record.next_run_at.is_some_and(|at| at <= Utc::now())
            {
                UpsertMode::PreserveNextRunAt
            } else {
                UpsertMode::Replace
            };
            store.upsert(&filter, &record, mode).await?
        } else if let Some(unique) = &record.unique {
            let mut filter = unique.clone();
            filter.insert("name".into(), json!(record.name));
            let mode = if record.unique_opts.insert_only {
                UpsertMode::InsertOnly
            } else {
                UpsertMode::Replace
            };
            store.upsert(&filter, &record, mode).await?
        } else {
            store.insert(&record).await?
        };

        debug!(id = saved.id, "saved");
        self.attrs.id = saved.id;
        self.attrs.next_run_at = saved.next_run_at;
        self.attrs.last_modified_by = record.last_modified_by;
        Ok(self)
    }

    /// Deletes the persisted record, returning whether one existed.
    pub async fn remove(&mut self) -> Result<bool> {
        match self.attrs.id {
            Some(id) => Ok(self.ctx.store().remove(id).await?),
            None => Ok(false),
        }
    }

    /// Flags the job as cancelled. A pending `run` becomes a no-op and an
    /// in-flight one has its outcome discarded; either way `run` releases
    /// the lease. A job leased but not being run should be passed to `run`
    /// or `release` to give the lease up.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.report_cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A token that fires on cancellation, for handlers to watch.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn report_cancel(&self) {
        if !self.cancel_reported.swap(true, Ordering::Relaxed) {
            info!(id = ?self.attrs.id, name = %self.attrs.name, "cancelled");
            self.emit(JobEvent::Cancel);
        }
    }

    /// Runs the job's executable logic and records the outcome. The lease
    /// is released however this returns.
    #[instrument(
        name = "run",
        skip_all,
        fields(id = ?self.attrs.id, name = %self.attrs.name)
    )]
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let outcome = if self.is_cancelled() {
            debug!("cancelled before start");
            self.report_cancel();
            Ok(RunOutcome::Cancelled)
        } else {
            self.executing = true;
            let outcome = self.execute().await;
            self.executing = false;
            outcome
        };

        match (outcome, self.release().await) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Err(error), Err(release_error)) => {
                error!(%release_error, "failed to release lease");
                Err(error)
            },
            (Err(error), Ok(())) | (Ok(_), Err(error)) => Err(error),
        }
    }

    async fn execute(&mut self) -> Result<RunOutcome> {
        let now = Utc::now();
        self.attrs.last_run_at = Some(now);

        // Move the schedule on before running, so a crash mid-run neither
        // loses a recurring job nor replays a finished one. Occurrences missed
        // while nobody was polling are skipped rather than replayed.
        if self.attrs.is_recurring() {
            let reference = self.attrs.next_run_at.map_or(now, |at| at.max(now));
            if let Err(error) = self.compute_next_run_at_from(reference) {
                return self.finish(Err(error)).await;
            }
        } else {
            self.attrs.next_run_at = None;
        }
        self.persist().await?;

        let Some(handler) = self.ctx.registry().get(&self.attrs.name) else {
            let error = JobError::UnknownJob(self.attrs.name.clone());
            error!(%error, "unable to run job");
            return self.finish(Err(error)).await;
        };

        self.emit(JobEvent::Start);
        debug!("starting");
        let result = AssertUnwindSafe(handler.run(self)).catch_unwind().await;

        if self.is_cancelled() {
            debug!("cancelled while running, discarding outcome");
            self.report_cancel();
            return Ok(RunOutcome::Cancelled);
        }

        let result = match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(JobError::ExecutionFailure(format!("{error:#}"))),
            Err(panic) => Err(JobError::ExecutionFailure(panic_message(&*panic))),
        };
        self.finish(result).await
    }

    /// Records the outcome of an attempted run and persists it.
    async fn finish(
        &mut self,
        result: std::result::Result<(), JobError>,
    ) -> Result<RunOutcome> {
        self.attrs.last_finished_at = Some(Utc::now());

        let outcome = match result {
            Ok(()) => {
                failure::record_success(&mut self.attrs);
                debug!("succeeded");
                self.emit(JobEvent::Success);
                RunOutcome::Succeeded
            },
            Err(error) => {
                match &error {
                    JobError::ExecutionFailure(reason) => self.fail(reason),
                    other => self.fail(other),
                };
                RunOutcome::Failed(error)
            },
        };

        self.emit(JobEvent::Complete);
        self.persist().await?;
        Ok(outcome)
    }

    /// Saves run bookkeeping for jobs that live in the store. A job run
    /// without ever being saved stays in memory only.
    async fn persist(&mut self) -> Result<()> {
        if self.attrs.id.is_some() {
            self.save().await?;
        }
        Ok(())
    }

    /// A plain copy of the persisted attributes.
    pub fn snapshot(&self) -> JobAttrs {
        self.attrs.clone()
    }

    /// The persisted attributes as JSON. In-memory state such as the
    /// cancellation flag and subscribers is not included.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.attrs)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Job")
            .field("attrs", &self.attrs)
            .field("cancelled", &self.is_cancelled())
            .field("executing", &self.executing)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map(|message| format!("panicked: {message}"))
        .unwrap_or_else(|| "panicked".to_owned())
}
