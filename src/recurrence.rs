//! Computes when a recurring job should next run.
//!
//! Everything here is a pure function of its inputs: the reference instant is
//! always passed in, never read from the clock.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use itertools::Itertools;

use crate::error::RecurrenceError;
use crate::parser::{
    parse_interval, parse_time_of_day, ParsingError, TimeOfDay,
};

/// A parsed `repeatInterval`.
#[derive(Clone, Debug)]
pub enum Recurrence {
    /// A calendar expression in the `cron` crate's seconds-first form.
    Calendar(Box<Schedule>),
    /// A fixed gap between runs.
    Interval(TimeDelta),
}

impl Recurrence {
    /// Parses a calendar expression (5-field Unix cron, or the 6/7-field
    /// seconds-first form) or, failing that, a human-readable interval.
    pub fn parse(expr: &str) -> Result<Self, RecurrenceError> {
        let fields = expr.split_whitespace().count();
        let cron_error = if (5..=7).contains(&fields) {
            let schedule = to_cron_crate_format(expr, fields).and_then(|expr| {
                Schedule::from_str(&expr).map_err(|error| error.to_string())
            });
            match schedule {
                Ok(schedule) => return Ok(Self::Calendar(Box::new(schedule))),
                Err(reason) => Some(reason),
            }
        } else {
            None
        };

        match (parse_interval(expr), cron_error) {
            (Ok(interval), _) => Ok(Self::Interval(interval)),
            // Five or more fields with no units is far more likely to be a
            // broken cron line than a broken interval.
            (Err(_), Some(reason)) => Err(RecurrenceError::Calendar {
                expr: expr.to_owned(),
                reason,
            }),
            (Err(reason), None) => Err(RecurrenceError::Interval {
                expr: expr.to_owned(),
                reason,
            }),
        }
    }

    /// The earliest instant strictly after `reference`, evaluated in `tz`.
    /// `None` when a calendar expression has no further matches.
    pub fn next_after(
        &self,
        reference: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Calendar(schedule) => schedule
                .after(&reference.with_timezone(&tz))
                .next()
                .map(|at| at.with_timezone(&Utc)),
            Self::Interval(interval) => reference.checked_add_signed(*interval),
        }
    }
}

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Converts a standard 5-field Unix cron expression to the 7-field format
/// expected by the `cron` crate by pinning seconds to 0 and allowing any
/// year. Longer expressions are passed through.
fn to_cron_crate_format(expr: &str, fields: usize) -> Result<String, String> {
    if fields != 5 {
        return Ok(expr.trim().to_owned());
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    let weekdays = to_cron_crate_weekdays(fields[4])
        .ok_or_else(|| format!("invalid day of week {:?}", fields[4]))?;
    Ok(format!("0 {} {weekdays} *", fields[..4].join(" ")))
}

/// Unix cron numbers weekdays 0-7 with both 0 and 7 meaning Sunday, while
/// the `cron` crate numbers them 1-7 from Sunday. Rewrites the field as an
/// explicit list of day names, which both agree on.
fn to_cron_crate_weekdays(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_owned());
    }

    let mut days = [false; 7];
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                (range, step.parse::<usize>().ok().filter(|&step| step > 0)?)
            },
            None => (part, 1),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((start, end)) => (weekday(start)?, weekday(end)?),
            None if step > 1 => (weekday(range)?, 6),
            None => (weekday(range)?, weekday(range)?),
        };
        if start > end {
            return None;
        }
        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    Some(
        WEEKDAYS
            .iter()
            .zip(days)
            .filter_map(|(name, on)| on.then_some(*name))
            .join(","),
    )
}

/// A Unix weekday number (0-7) or three-letter name, as 0-7.
fn weekday(value: &str) -> Option<usize> {
    match value.parse::<usize>() {
        Ok(day) => (day <= 7).then_some(day),
        Err(_) => WEEKDAYS
            .iter()
            .position(|name| name.eq_ignore_ascii_case(value)),
    }
}

/// Parses an IANA timezone name, with `None` meaning UTC.
pub fn parse_timezone(timezone: Option<&str>) -> Result<Tz, RecurrenceError> {
    match timezone {
        Some(name) => name
            .parse()
            .map_err(|_| RecurrenceError::Timezone(name.to_owned())),
        None => Ok(Tz::UTC),
    }
}

/// Maps a wall-clock time in `tz` to an instant. Ambiguous times (the
/// repeated hour when clocks go back) take the earlier instant; times that
/// don't exist (skipped when clocks go forward) are pushed past the gap.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(local + TimeDelta::hours(1)))
                .earliest()
        })
        .map(|at| at.with_timezone(&Utc))
}

/// The next occurrence of a literal time of day strictly after `reference`.
/// A dated time occurs once, so yields `None` once it has passed.
pub fn next_time_of_day(
    reference: DateTime<Utc>,
    spec: TimeOfDay,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    if let Some(date) = spec.date {
        return resolve_local(tz, date.and_time(spec.time))
            .filter(|at| *at > reference);
    }

    // Today's occurrence may already have passed, and tomorrow's may fall in
    // a DST gap that resolves to before the reference; three days is always
    // enough.
    let mut date = reference.with_timezone(&tz).date_naive();
    for _ in 0..3 {
        if let Some(at) = resolve_local(tz, date.and_time(spec.time)) {
            if at > reference {
                return Some(at);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Computes the next run strictly after `reference`. `repeat_interval` takes
/// precedence over `repeat_at` when both are given; with neither, there is
/// no next run.
pub fn next_run_after(
    reference: DateTime<Utc>,
    repeat_interval: Option<&str>,
    repeat_at: Option<&str>,
    timezone: Option<&str>,
) -> Result<Option<DateTime<Utc>>, RecurrenceError> {
    let tz = parse_timezone(timezone)?;

    if let Some(expr) = repeat_interval {
        let recurrence = Recurrence::parse(expr)?;
        return match (&recurrence, recurrence.next_after(reference, tz)) {
            // Past the end of representable time; keep the old schedule.
            (Recurrence::Interval(_), None) => Err(RecurrenceError::Interval {
                expr: expr.to_owned(),
                reason: ParsingError::OutOfRange,
            }),
            (_, next) => Ok(next),
        };
    }

    if let Some(expr) = repeat_at {
        let spec =
            parse_time_of_day(expr).map_err(|reason| RecurrenceError::TimeOfDay {
                expr: expr.to_owned(),
                reason,
            })?;
        return Ok(next_time_of_day(reference, spec, tz));
    }

    Ok(None)
}

/// An explicit point at which a job should next run, independent of any
/// recurrence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum When {
    Now,
    At(DateTime<Utc>),
    In(TimeDelta),
}

impl When {
    pub fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Now => now,
            Self::At(at) => at,
            Self::In(delay) => now.checked_add_signed(delay).unwrap_or(now),
        }
    }
}

impl From<DateTime<Utc>> for When {
    fn from(value: DateTime<Utc>) -> Self {
        Self::At(value)
    }
}

impl From<TimeDelta> for When {
    fn from(value: TimeDelta) -> Self {
        Self::In(value)
    }
}

impl FromStr for When {
    type Err = RecurrenceError;

    /// Accepts `now`, an RFC 3339 timestamp, or a relative interval with an
    /// optional leading `in` (e.g. `in 10 minutes`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("now") {
            return Ok(Self::Now);
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::At(at.with_timezone(&Utc)));
        }

        let relative = trimmed
            .strip_prefix("in ")
            .or_else(|| trimmed.strip_prefix("In "))
            .unwrap_or(trimmed);
        parse_interval(relative)
            .map(Self::In)
            .map_err(|reason| RecurrenceError::When {
                expr: s.to_owned(),
                reason,
            })
    }
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Now => f.write_str("now"),
            Self::At(at) => write!(f, "{}", at.to_rfc3339()),
            Self::In(delay) => write!(f, "in {delay}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_human_interval() {
        let reference = utc(2026, 5, 1, 10, 0);
        assert_eq!(
            next_run_after(reference, Some("1 hour"), None, None),
            Ok(Some(utc(2026, 5, 1, 11, 0)))
        );
        assert_eq!(
            next_run_after(reference, Some("90 minutes"), None, None),
            Ok(Some(utc(2026, 5, 1, 11, 30)))
        );
    }

    #[test]
    fn test_cron_daily_midnight() {
        let reference = utc(2026, 1, 19, 10, 30);
        assert_eq!(
            next_run_after(reference, Some("0 0 * * *"), None, None),
            Ok(Some(utc(2026, 1, 20, 0, 0)))
        );
    }

    #[test]
    fn test_cron_is_strictly_after_reference() {
        let reference = utc(2026, 1, 19, 10, 0);
        assert_eq!(
            next_run_after(reference, Some("0 * * * *"), None, None),
            Ok(Some(utc(2026, 1, 19, 11, 0)))
        );
        // Seconds-first form is accepted as-is.
        assert_eq!(
            next_run_after(reference, Some("30 0 10 * * *"), None, None),
            Ok(Some(Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 30).unwrap()))
        );
    }

    #[test]
    fn test_cron_keeps_local_time_across_dst() {
        // Clocks in New York go forward on 2026-03-08.
        let tz = Some("America/New_York");
        let before = utc(2026, 3, 6, 15, 0);
        assert_eq!(
            next_run_after(before, Some("0 9 * * *"), None, tz),
            Ok(Some(utc(2026, 3, 7, 14, 0)))
        );
        let after = utc(2026, 3, 7, 15, 0);
        assert_eq!(
            next_run_after(after, Some("0 9 * * *"), None, tz),
            Ok(Some(utc(2026, 3, 8, 13, 0)))
        );
    }

    #[test]
    fn test_repeat_at_same_day_or_next() {
        let at = Some("3:00pm");
        assert_eq!(
            next_run_after(utc(2026, 5, 1, 14, 59), None, at, None),
            Ok(Some(utc(2026, 5, 1, 15, 0)))
        );
        assert_eq!(
            next_run_after(utc(2026, 5, 1, 15, 1), None, at, None),
            Ok(Some(utc(2026, 5, 2, 15, 0)))
        );
        // Exactly on time is not "after".
        assert_eq!(
            next_run_after(utc(2026, 5, 1, 15, 0), None, at, None),
            Ok(Some(utc(2026, 5, 2, 15, 0)))
        );
    }

    #[test]
    fn test_repeat_at_in_timezone() {
        // 15:00 in London during BST is 14:00 UTC.
        assert_eq!(
            next_run_after(
                utc(2026, 7, 1, 13, 0),
                None,
                Some("15:00"),
                Some("Europe/London"),
            ),
            Ok(Some(utc(2026, 7, 1, 14, 0)))
        );
    }

    #[test]
    fn test_repeat_at_in_dst_gap() {
        // 02:30 doesn't exist in New York on 2026-03-08; it becomes 03:30 EDT.
        assert_eq!(
            next_run_after(
                utc(2026, 3, 8, 5, 0),
                None,
                Some("2:30am"),
                Some("America/New_York"),
            ),
            Ok(Some(utc(2026, 3, 8, 7, 30)))
        );
    }

    #[test]
    fn test_repeat_at_with_date() {
        let spec = Some("2026-06-01 08:00");
        assert_eq!(
            next_run_after(utc(2026, 5, 1, 0, 0), None, spec, None),
            Ok(Some(utc(2026, 6, 1, 8, 0)))
        );
        assert_eq!(
            next_run_after(utc(2026, 6, 1, 8, 0), None, spec, None),
            Ok(None)
        );
    }

    #[test]
    fn test_interval_takes_precedence() {
        let reference = utc(2026, 5, 1, 14, 0);
        assert_eq!(
            next_run_after(reference, Some("5 minutes"), Some("3:00pm"), None),
            Ok(Some(utc(2026, 5, 1, 14, 5)))
        );
    }

    #[test]
    fn test_idempotent() {
        let reference = utc(2026, 5, 1, 14, 0);
        for (interval, at) in [
            (Some("*/15 * * * *"), None),
            (Some("2 days"), None),
            (None, Some("noon")),
        ] {
            let first = next_run_after(reference, interval, at, None);
            let second = next_run_after(reference, interval, at, None);
            assert!(first.as_ref().is_ok_and(Option::is_some));
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_nothing_to_repeat() {
        assert_eq!(
            next_run_after(utc(2026, 5, 1, 14, 0), None, None, None),
            Ok(None)
        );
    }

    #[test]
    fn test_cron_uses_unix_weekdays() {
        // A Saturday.
        let saturday = utc(2026, 5, 2, 12, 0);

        #[track_caller]
        fn next(expr: &str, reference: DateTime<Utc>) -> DateTime<Utc> {
            next_run_after(reference, Some(expr), None, None)
                .unwrap()
                .unwrap()
        }

        assert_eq!(next("0 9 * * 1-5", saturday), utc(2026, 5, 4, 9, 0));
        assert_eq!(next("0 0 * * 1", saturday), utc(2026, 5, 4, 0, 0));
        assert_eq!(next("0 0 * * 0", saturday), utc(2026, 5, 3, 0, 0));
        assert_eq!(next("0 0 * * 7", saturday), utc(2026, 5, 3, 0, 0));
        assert_eq!(next("0 0 * * 5-7", saturday), utc(2026, 5, 3, 0, 0));
        assert_eq!(next("0 0 * * MON,fri", saturday), utc(2026, 5, 4, 0, 0));

        // Sunday, Tuesday, Thursday, Saturday.
        assert_eq!(next("0 0 * * */2", saturday), utc(2026, 5, 3, 0, 0));
        assert_eq!(
            next("0 0 * * */2", utc(2026, 5, 3, 12, 0)),
            utc(2026, 5, 5, 0, 0)
        );
        assert_eq!(
            next("0 0 * * 1-5/2", utc(2026, 5, 4, 12, 0)),
            utc(2026, 5, 6, 0, 0)
        );

        for bad in ["0 0 * * 8", "0 0 * * 5-1", "0 0 * * 1/0", "0 0 * * XYZ"] {
            assert!(
                matches!(
                    next_run_after(saturday, Some(bad), None, None),
                    Err(RecurrenceError::Calendar { .. })
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_interval_past_end_of_time() {
        let reference = utc(2026, 5, 1, 14, 0);
        assert_eq!(
            next_run_after(reference, Some("300000 years"), None, None),
            Err(RecurrenceError::Interval {
                expr: "300000 years".into(),
                reason: ParsingError::OutOfRange,
            })
        );
    }

    #[test]
    fn test_invalid_specs() {
        let reference = utc(2026, 5, 1, 14, 0);

        assert!(matches!(
            next_run_after(reference, Some("61 * * * *"), None, None),
            Err(RecurrenceError::Calendar { .. })
        ));
        assert_eq!(
            next_run_after(reference, Some("every so often"), None, None),
            Err(RecurrenceError::Interval {
                expr: "every so often".into(),
                reason: ParsingError::BadFormat,
            })
        );
        assert!(matches!(
            next_run_after(reference, None, Some("teatime"), None),
            Err(RecurrenceError::TimeOfDay { .. })
        ));
        assert_eq!(
            next_run_after(reference, Some("1 hour"), None, Some("Mars/Base")),
            Err(RecurrenceError::Timezone("Mars/Base".into()))
        );
    }

    #[test]
    fn test_when() {
        let now = utc(2026, 5, 1, 14, 0);

        #[track_caller]
        fn ok(expr: &str, now: DateTime<Utc>, expected: DateTime<Utc>) {
            assert_eq!(expr.parse::<When>().unwrap().resolve(now), expected);
        }

        ok("now", now, now);
        ok("in 10 minutes", now, utc(2026, 5, 1, 14, 10));
        ok("2 hours", now, utc(2026, 5, 1, 16, 0));
        ok("2026-05-03T09:30:00+02:00", now, utc(2026, 5, 3, 7, 30));

        assert!(matches!(
            "whenever".parse::<When>(),
            Err(RecurrenceError::When { .. })
        ));
    }
}
