//! Bookkeeping for job outcomes. Pure mutations of a record; persisting them
//! is the caller's business.
use chrono::{DateTime, Utc};

use crate::types::job::JobAttrs;

/// Notes a failure at `now`, returning the new consecutive failure count.
pub fn record_failure(
    attrs: &mut JobAttrs,
    reason: impl Into<String>,
    now: DateTime<Utc>,
) -> u32 {
    attrs.failed_at = Some(now);
    attrs.fail_reason = Some(reason.into());
    attrs.fail_count = attrs.fail_count.saturating_add(1);
    attrs.fail_count
}

/// Notes a success. A success forgives all earlier failures.
pub fn record_success(attrs: &mut JobAttrs) {
    attrs.failed_at = None;
    attrs.fail_reason = None;
    attrs.fail_count = 0;
}
