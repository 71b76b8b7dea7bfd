use std::fmt;

/// Where a job is in its lifecycle. Derived from the persisted attributes
/// plus the in-memory cancellation flag; being disabled is tracked
/// separately as it can apply in any state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobState {
    /// Not yet given a run time.
    Created,
    /// Waiting for `nextRunAt`.
    Scheduled,
    /// A worker holds the execution lease.
    Leased,
    /// Finished successfully with nothing further scheduled.
    Completed,
    /// Finished unsuccessfully with nothing further scheduled.
    Failed,
    Cancelled,
}

impl JobState {
    fn as_str(&self) -> &'static str {
        use JobState::*;

        match self {
            Created => "created",
            Scheduled => "scheduled",
            Leased => "leased",
            Completed => "completed",
            Failed => "failed",
            Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(JobState::Scheduled.to_string(), "scheduled");
        assert_eq!(format!("{}", JobState::Cancelled), "cancelled");
    }
}
