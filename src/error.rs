//! Error types shared across the job core.
use thiserror::Error;

use crate::parser::ParsingError;

/// Raised when a recurrence, time-of-day, schedule or timezone expression
/// can't be understood. The job the expression was destined for is never
/// modified when this is returned.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RecurrenceError {
    #[error("invalid calendar expression {expr:?}: {reason}")]
    Calendar { expr: String, reason: String },
    #[error("invalid interval {expr:?}: {reason}")]
    Interval { expr: String, reason: ParsingError },
    #[error("invalid time of day {expr:?}: {reason}")]
    TimeOfDay { expr: String, reason: ParsingError },
    #[error("invalid schedule {expr:?}: {reason}")]
    When { expr: String, reason: ParsingError },
    #[error("unknown timezone {0:?}")]
    Timezone(String),
}

/// Failures reported by a [`JobStore`](crate::store::JobStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(u64),
    #[error("unable to encode job record: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("backend failure: {0}")]
    Backend(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    InvalidRecurrenceSpec(#[from] RecurrenceError),
    #[error("unknown priority {0:?}")]
    InvalidPriority(String),
    #[error("job {0} is leased by another worker")]
    LeaseConflict(u64),
    #[error("job failed: {0}")]
    ExecutionFailure(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("job has not been saved yet")]
    NotPersisted,
    #[error("no handler registered for job {0:?}")]
    UnknownJob(String),
}

pub type Result<T, E = JobError> = std::result::Result<T, E>;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("lease lifetime must be between 1ms and 1 year, got {0}")]
    LeaseLifetime(String),
    #[error("worker name must not be blank")]
    BlankWorkerName,
}
