use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Equality constraints, keyed by dotted attribute path (e.g. `"data.to"`),
/// that identify an existing record as "the same" job on save.
pub type UniqueQuery = Map<String, Value>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Any number of instances may exist.
    #[default]
    Once,
    /// At most one record exists per job name.
    Single,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueOptions {
    /// Leave an existing matching record untouched instead of overwriting it.
    #[serde(default)]
    pub insert_only: bool,
}

/// The persisted shape of a job. Everything here survives a round trip
/// through a [`JobStore`](crate::store::JobStore).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAttrs {
    /// Assigned by the store on first insert.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: JobType,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub data: Value,

    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,

    pub failed_at: Option<DateTime<Utc>>,
    pub fail_reason: Option<String>,
    #[serde(default)]
    pub fail_count: u32,

    pub repeat_interval: Option<String>,
    pub repeat_timezone: Option<String>,
    pub repeat_at: Option<String>,

    #[serde(default)]
    pub disabled: bool,
    pub unique: Option<UniqueQuery>,
    #[serde(default)]
    pub unique_opts: UniqueOptions,

    /// Set while a worker holds the execution lease.
    pub locked_at: Option<DateTime<Utc>>,
    pub last_modified_by: Option<String>,
}

impl JobAttrs {
    /// A record with every optional attribute unset and `nextRunAt` empty.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: JobType::Once,
            priority: 0,
            data: Value::Null,
            next_run_at: None,
            last_run_at: None,
            last_finished_at: None,
            failed_at: None,
            fail_reason: None,
            fail_count: 0,
            repeat_interval: None,
            repeat_timezone: None,
            repeat_at: None,
            disabled: false,
            unique: None,
            unique_opts: UniqueOptions::default(),
            locked_at: None,
            last_modified_by: None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.repeat_interval.is_some() || self.repeat_at.is_some()
    }

    /// Whether a dispatcher polling at `now` should consider this record,
    /// ignoring any lease.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.disabled && self.next_run_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_serialised_shape() {
        let mut attrs = JobAttrs::new("email");
        attrs.id = Some(7);
        attrs.kind = JobType::Single;
        attrs.next_run_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single();
        attrs.repeat_interval = Some("1 hour".into());

        let value = serde_json::to_value(&attrs).unwrap();
        assert_eq!(value["_id"], json!(7));
        assert_eq!(value["type"], json!("single"));
        assert_eq!(value["nextRunAt"], json!("2026-01-02T03:04:05Z"));
        assert_eq!(value["repeatInterval"], json!("1 hour"));
        assert_eq!(value["lockedAt"], Value::Null);
        assert_eq!(value["uniqueOpts"], json!({ "insertOnly": false }));
        assert!(value.get("cancelled").is_none());

        let back: JobAttrs = serde_json::from_value(value).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_minimal_record_defaults() {
        let attrs: JobAttrs =
            serde_json::from_value(json!({ "name": "report" })).unwrap();
        assert_eq!(attrs, JobAttrs::new("report"));
        assert!(!attrs.is_recurring());
    }

    #[test]
    fn test_is_due() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let mut attrs = JobAttrs::new("report");
        assert!(!attrs.is_due(now));

        attrs.next_run_at = Some(now);
        assert!(attrs.is_due(now));

        attrs.disabled = true;
        assert!(!attrs.is_due(now));
    }
}
