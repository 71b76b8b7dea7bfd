//! implements parsers for human-readable intervals and times of day.
use std::fmt;

use chrono::{NaiveDate, NaiveTime, TimeDelta};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParsingError {
    BadFormat,
    UnknownUnit,
    OutOfRange,
}

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::BadFormat => "bad format",
            Self::UnknownUnit => "unknown unit",
            Self::OutOfRange => "value out of range",
        })
    }
}

const MS_PER_SECOND: f64 = 1_000.0;
const MS_PER_MINUTE: f64 = 60.0 * MS_PER_SECOND;
const MS_PER_HOUR: f64 = 60.0 * MS_PER_MINUTE;
const MS_PER_DAY: f64 = 24.0 * MS_PER_HOUR;

/// A literal wall-clock time, optionally pinned to a calendar date.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeOfDay {
    pub date: Option<NaiveDate>,
    pub time: NaiveTime,
}

/// Provides a minimal, zero-copy parser over a lowercased expression.
struct ParseState<'a> {
    from: &'a str,
}

impl<'a> ParseState<'a> {
    fn is_done(&self) -> bool {
        self.from.is_empty()
    }

    /// Asserts there's no more input to take, returning `result` if so, and a
    /// `BadFormat` error otherwise.
    fn expect_done_and<R>(&self, result: R) -> Result<R, ParsingError> {
        if self.is_done() {
            Ok(result)
        } else {
            Err(ParsingError::BadFormat)
        }
    }

    /// Consumes whitespace, returning whether any was seen.
    fn skip_space(&mut self) -> bool {
        let rest = self.from.trim_start();
        let skipped = rest.len() != self.from.len();
        self.from = rest;
        skipped
    }

    /// Consumes separators between interval terms: whitespace, commas and the
    /// word "and".
    fn skip_separators(&mut self) {
        loop {
            self.skip_space();
            if self.take(",") {
                continue;
            }
            if self.peek_word() == Some("and") {
                self.next_word();
                continue;
            }
            return;
        }
    }

    /// Consumes `literal` if the input starts with it.
    fn take(&mut self, literal: &str) -> bool {
        match self.from.strip_prefix(literal) {
            Some(rest) => {
                self.from = rest;
                true
            },
            None => false,
        }
    }

    /// Consumes `literal`, failing with `BadFormat` if it isn't next.
    fn expect_literal(&mut self, literal: &str) -> Result<(), ParsingError> {
        if self.take(literal) {
            Ok(())
        } else {
            Err(ParsingError::BadFormat)
        }
    }

    /// Consumes the longest prefix whose characters satisfy `pred`.
    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let idx = self
            .from
            .find(|c: char| !pred(c))
            .unwrap_or(self.from.len());
        let (token, rest) = self.from.split_at(idx);
        self.from = rest;
        token
    }

    fn peek_word(&self) -> Option<&'a str> {
        let idx = self
            .from
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(self.from.len());
        (idx > 0).then(|| &self.from[..idx])
    }

    fn next_word(&mut self) -> Option<&'a str> {
        let word = self.take_while(|c| c.is_ascii_alphabetic());
        (!word.is_empty()).then_some(word)
    }

    fn next_digits(&mut self) -> Option<&'a str> {
        let digits = self.take_while(|c| c.is_ascii_digit());
        (!digits.is_empty()).then_some(digits)
    }

    /// Consumes a decimal number or a small English number word.
    fn expect_quantity(&mut self) -> Result<f64, ParsingError> {
        if let Some(word) = self.peek_word() {
            let value = match word {
                "a" | "an" | "one" => 1.0,
                "two" => 2.0,
                "three" => 3.0,
                "four" => 4.0,
                "five" => 5.0,
                "six" => 6.0,
                "seven" => 7.0,
                "eight" => 8.0,
                "nine" => 9.0,
                "ten" => 10.0,
                "eleven" => 11.0,
                "twelve" => 12.0,
                _ => return Err(ParsingError::BadFormat),
            };
            self.next_word();
            return Ok(value);
        }

        let token = self.take_while(|c| c.is_ascii_digit() || c == '.');
        if token.is_empty() {
            return Err(ParsingError::BadFormat);
        }
        token.parse().map_err(|_| ParsingError::BadFormat)
    }

    /// Consumes a unit name, returning its length in milliseconds.
    fn expect_unit(&mut self) -> Result<f64, ParsingError> {
        let unit = self.next_word().ok_or(ParsingError::BadFormat)?;

        Ok(match unit {
            "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
            "s" | "sec" | "secs" | "second" | "seconds" => MS_PER_SECOND,
            "m" | "min" | "mins" | "minute" | "minutes" => MS_PER_MINUTE,
            "h" | "hr" | "hrs" | "hour" | "hours" => MS_PER_HOUR,
            "d" | "day" | "days" => MS_PER_DAY,
            "w" | "wk" | "wks" | "week" | "weeks" => 7.0 * MS_PER_DAY,
            "mo" | "month" | "months" => 30.0 * MS_PER_DAY,
            "y" | "yr" | "yrs" | "year" | "years" => 365.0 * MS_PER_DAY,
            _ => return Err(ParsingError::UnknownUnit),
        })
    }

    /// Consumes a fixed-width run of digits, checking it lies in `range`.
    fn expect_fixed<const N: usize>(
        &mut self,
        range: std::ops::RangeInclusive<u32>,
    ) -> Result<u32, ParsingError> {
        let digits = self.next_digits().ok_or(ParsingError::BadFormat)?;
        if digits.len() != N {
            return Err(ParsingError::BadFormat);
        }
        let value: u32 = digits.parse().map_err(|_| ParsingError::BadFormat)?;
        if range.contains(&value) {
            Ok(value)
        } else {
            Err(ParsingError::OutOfRange)
        }
    }

    /// Consumes a `YYYY-MM-DD` date.
    fn expect_date(&mut self) -> Result<NaiveDate, ParsingError> {
        let year = self.expect_fixed::<4>(0..=9999)?;
        self.expect_literal("-")?;
        let month = self.expect_fixed::<2>(1..=12)?;
        self.expect_literal("-")?;
        let day = self.expect_fixed::<2>(1..=31)?;

        NaiveDate::from_ymd_opt(year as i32, month, day)
            .ok_or(ParsingError::OutOfRange)
    }

    /// Consumes a clock time, `H[:MM[:SS]]` with an optional meridiem, or one
    /// of the words "noon" and "midnight".
    fn expect_time(&mut self) -> Result<NaiveTime, ParsingError> {
        match self.peek_word() {
            Some("noon") => {
                self.next_word();
                return Ok(NaiveTime::MIN + TimeDelta::hours(12));
            },
            Some("midnight") => {
                self.next_word();
                return Ok(NaiveTime::MIN);
            },
            _ => {},
        }

        let hour = self.next_digits().ok_or(ParsingError::BadFormat)?;
        if hour.len() > 2 {
            return Err(ParsingError::BadFormat);
        }
        let mut hour: u32 = hour.parse().map_err(|_| ParsingError::BadFormat)?;

        let (mut minute, mut second) = (0, 0);
        if self.take(":") {
            minute = self.expect_fixed::<2>(0..=59)?;
            if self.take(":") {
                second = self.expect_fixed::<2>(0..=59)?;
            }
        }

        self.skip_space();
        let meridiem = match self.next_word() {
            Some("am" | "a") => Some(false),
            Some("pm" | "p") => Some(true),
            Some(_) => return Err(ParsingError::BadFormat),
            None => None,
        };
        if meridiem.is_some() {
            // Accept "a.m." and "p.m." spellings.
            self.take(".");
            self.take("m");
            self.take(".");
        }

        match meridiem {
            Some(pm) => {
                if !(1..=12).contains(&hour) {
                    return Err(ParsingError::OutOfRange);
                }
                hour = hour % 12 + if pm { 12 } else { 0 };
            },
            None if hour > 23 => return Err(ParsingError::OutOfRange),
            None => {},
        }

        NaiveTime::from_hms_opt(hour, minute, second)
            .ok_or(ParsingError::OutOfRange)
    }
}

impl<'a> From<&'a str> for ParseState<'a> {
    fn from(from: &'a str) -> Self {
        ParseState { from }
    }
}

/// Parses a human-readable interval such as `"2 hours"`, `"every 5 minutes"`,
/// `"1.5 days"` or `"3 days and 4 hours"`. A bare integer is read as a
/// number of milliseconds.
pub fn parse_interval(input: &str) -> Result<TimeDelta, ParsingError> {
    let input = input.trim().to_ascii_lowercase();

    if let Ok(ms) = input.parse::<u64>() {
        return positive_millis(ms as f64);
    }

    let mut ps: ParseState = input.as_str().into();
    if ps.peek_word() == Some("every") {
        ps.next_word();
    }
    ps.skip_space();
    if ps.is_done() {
        return Err(ParsingError::BadFormat);
    }

    let mut total = 0.0;
    while !ps.is_done() {
        let quantity = ps.expect_quantity()?;
        ps.skip_space();
        total += quantity * ps.expect_unit()?;
        ps.skip_separators();
    }

    ps.expect_done_and(())?;
    positive_millis(total)
}

fn positive_millis(ms: f64) -> Result<TimeDelta, ParsingError> {
    let ms = ms.round();
    if !ms.is_finite() || ms < 1.0 || ms > i64::MAX as f64 {
        return Err(ParsingError::OutOfRange);
    }
    TimeDelta::try_milliseconds(ms as i64).ok_or(ParsingError::OutOfRange)
}

/// Parses a literal wall-clock time such as `"3:00pm"`, `"at 15:30"`,
/// `"noon"` or `"2026-10-20 09:15"`.
pub fn parse_time_of_day(input: &str) -> Result<TimeOfDay, ParsingError> {
    let input = input.trim().to_ascii_lowercase();
    let mut ps: ParseState = input.as_str().into();

    if ps.peek_word() == Some("at") {
        ps.next_word();
        ps.skip_space();
    }

    // A date is four digits followed by a dash; anything else is a time.
    let head: &str = ps.from;
    let date = match head.as_bytes() {
        [a, b, c, d, b'-', ..]
            if [a, b, c, d].iter().all(|x| x.is_ascii_digit()) =>
        {
            let date = ps.expect_date()?;
            if !(ps.take("t") || ps.skip_space()) {
                return Err(ParsingError::BadFormat);
            }
            ps.skip_space();
            if ps.peek_word() == Some("at") {
                ps.next_word();
                ps.skip_space();
            }
            Some(date)
        },
        _ => None,
    };

    let time = ps.expect_time()?;
    ps.skip_space();
    ps.expect_done_and(TimeOfDay { date, time })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        use ParsingError::*;

        // Asserts the expression parses to the given number of milliseconds.
        #[track_caller]
        fn ok(expr: &str, ms: i64) {
            assert_eq!(parse_interval(expr), Ok(TimeDelta::milliseconds(ms)));
        }

        #[track_caller]
        fn err(expr: &str, error: ParsingError) {
            assert_eq!(parse_interval(expr), Err(error));
        }

        ok("1 hour", 3_600_000);
        ok("2 hours", 7_200_000);
        ok("5 minutes", 300_000);
        ok("every 5 minutes", 300_000);
        ok("Every 10 Seconds", 10_000);
        ok("1.5 hours", 5_400_000);
        ok("one minute", 60_000);
        ok("an hour", 3_600_000);
        ok("3 days and 4 hours", 273_600_000);
        ok("1 week, 2 days", 777_600_000);
        ok("2h30m", 9_000_000);
        ok("500ms", 500);
        ok("1 month", 2_592_000_000);
        ok("60000", 60_000);

        err("", BadFormat);
        err("every", BadFormat);
        err("hour", BadFormat);
        err("0", OutOfRange);
        err("0 minutes", OutOfRange);
        err("5 fortnights", UnknownUnit);
        err("5 minutes later", BadFormat);
        err("1..2 hours", BadFormat);
        err("eleventy hours", BadFormat);
    }

    #[test]
    fn test_parse_time_of_day() {
        use ParsingError::*;

        #[track_caller]
        fn ok(expr: &str, h: u32, m: u32, s: u32) {
            let parsed = parse_time_of_day(expr).unwrap();
            assert_eq!(parsed.date, None);
            assert_eq!(parsed.time, NaiveTime::from_hms_opt(h, m, s).unwrap());
        }

        #[track_caller]
        fn err(expr: &str, error: ParsingError) {
            assert_eq!(parse_time_of_day(expr), Err(error));
        }

        ok("3:00pm", 15, 0, 0);
        ok("3pm", 15, 0, 0);
        ok("3:00 PM", 15, 0, 0);
        ok("3:30 p.m.", 15, 30, 0);
        ok("12am", 0, 0, 0);
        ok("12:15pm", 12, 15, 0);
        ok("at 9:05", 9, 5, 0);
        ok("23:59:30", 23, 59, 30);
        ok("noon", 12, 0, 0);
        ok("midnight", 0, 0, 0);

        let dated = parse_time_of_day("2026-10-20 09:15").unwrap();
        assert_eq!(dated.date, NaiveDate::from_ymd_opt(2026, 10, 20));
        assert_eq!(dated.time, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        let dated = parse_time_of_day("2026-10-20T21:00").unwrap();
        assert_eq!(dated.time, NaiveTime::from_hms_opt(21, 0, 0).unwrap());

        err("", BadFormat);
        err("tomorrow", BadFormat);
        err("24:00", OutOfRange);
        err("13pm", OutOfRange);
        err("0am", OutOfRange);
        err("3:7pm", BadFormat);
        err("3:60", OutOfRange);
        err("3pm sharp", BadFormat);
        err("2026-02-30 10:00", OutOfRange);
        err("2026-10-2010:00", BadFormat);
    }
}
