use chrono::{DateTime, Utc};
use serde::Serialize;

/// A notification published by a [`Job`](crate::job::Job) to its
/// subscribers as it moves through its lifecycle. Delivery is in-process and
/// best-effort: a job with no subscribers, or only lagging ones, carries on
/// regardless.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum JobEvent {
    /// The execution lease was acquired by this process.
    Locked { at: DateTime<Utc> },
    /// The execution lease was refreshed by `touch`.
    Touched { at: DateTime<Utc> },
    /// The execution lease was given up. Sent on every exit path from `run`,
    /// whatever the outcome.
    Released,
    /// Executable logic is about to be invoked.
    Start,
    /// Executable logic returned successfully. Any previous failure record
    /// has been cleared.
    Success,
    /// A failure was recorded, either by executable logic returning an error
    /// or by an explicit `fail`.
    Fail { reason: String, fail_count: u32 },
    /// The outcome of a run was recorded. Follows either `Success` or
    /// `Fail`, but never a cancelled run.
    Complete,
    /// The job was cancelled. Sent at most once per job instance.
    Cancel,
}
