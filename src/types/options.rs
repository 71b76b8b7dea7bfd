use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::job::{JobAttrs, JobType, UniqueOptions, UniqueQuery};
use super::priority::{resolve, PriorityInput};

/// Everything a caller may specify when creating a job. Turned into a
/// validated [`JobAttrs`] by [`JobOptions::normalise`]; the options value
/// itself is consumed rather than patched in place.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobOptions {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: JobType,
    pub priority: Option<PriorityInput>,
    #[serde(default)]
    pub data: Value,
    pub next_run_at: Option<DateTime<Utc>>,
    pub repeat_interval: Option<String>,
    pub repeat_timezone: Option<String>,
    pub repeat_at: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    pub unique: Option<UniqueQuery>,
    #[serde(default)]
    pub unique_opts: UniqueOptions,
}

impl JobOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(mut self, priority: impl Into<PriorityInput>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Applies defaults: priorities that don't resolve become 0, and
    /// `nextRunAt` becomes `now` unless given explicitly or the job starts
    /// out disabled.
    pub fn normalise(self, now: DateTime<Utc>) -> JobAttrs {
        let priority = match &self.priority {
            Some(input) => resolve(input).unwrap_or_else(|| {
                debug!(%input, "unrecognised priority, using 0");
                0
            }),
            None => 0,
        };

        let next_run_at = match self.next_run_at {
            Some(at) => Some(at),
            None if self.disabled => None,
            None => Some(now),
        };

        JobAttrs {
            kind: self.kind,
            priority,
            data: self.data,
            next_run_at,
            repeat_interval: self.repeat_interval,
            repeat_timezone: self.repeat_timezone,
            repeat_at: self.repeat_at,
            disabled: self.disabled,
            unique: self.unique,
            unique_opts: self.unique_opts,
            ..JobAttrs::new(self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_defaults() {
        let attrs = JobOptions::new("email").normalise(now());
        assert_eq!(attrs.priority, 0);
        assert_eq!(attrs.kind, JobType::Once);
        assert_eq!(attrs.next_run_at, Some(now()));
        assert_eq!(attrs.fail_count, 0);
        assert!(!attrs.disabled);
    }

    #[test]
    fn test_priority_resolution() {
        #[track_caller]
        fn check(input: impl Into<PriorityInput>, expected: i32) {
            let attrs =
                JobOptions::new("email").with_priority(input).normalise(now());
            assert_eq!(attrs.priority, expected);
        }

        check("highest", 20);
        check("low", -10);
        check(-3, -3);
        check("whenever", 0);
    }

    #[test]
    fn test_next_run_at() {
        let later = now() + chrono::TimeDelta::hours(2);
        let attrs = JobOptions {
            next_run_at: Some(later),
            ..JobOptions::new("email")
        }
        .normalise(now());
        assert_eq!(attrs.next_run_at, Some(later));

        let attrs = JobOptions {
            disabled: true,
            ..JobOptions::new("email")
        }
        .normalise(now());
        assert_eq!(attrs.next_run_at, None);
    }

    #[test]
    fn test_deserialise() {
        let options: JobOptions = serde_json::from_value(json!({
            "name": "email",
            "type": "single",
            "priority": "high",
            "data": { "to": "a@example.com" },
            "repeatInterval": "1 hour",
        }))
        .unwrap();
        let attrs = options.normalise(now());
        assert_eq!(attrs.kind, JobType::Single);
        assert_eq!(attrs.priority, 10);
        assert_eq!(attrs.data["to"], json!("a@example.com"));
        assert_eq!(attrs.repeat_interval.as_deref(), Some("1 hour"));

        assert!(serde_json::from_value::<JobOptions>(
            json!({ "name": "email", "cancelled": true })
        )
        .is_err());
    }
}
