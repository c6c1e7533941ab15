//! Date range resolution for time dimensions and date filters.
//!
//! Ranges are inclusive on both ends with millisecond precision, so a
//! date-only upper bound covers its whole day (`23:59:59.999`).

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime};
use serde::Serialize;

use super::error::{CompileError, CompileResult};
use super::request::DateRange;
use crate::model::Granularity;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Inclusive `[from, to]` bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateBounds {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl DateBounds {
    pub fn new(from: NaiveDateTime, to: NaiveDateTime) -> CompileResult<Self> {
        if from > to {
            return Err(CompileError::InvalidDateRange(format!(
                "{} is after {}",
                format_timestamp(from),
                format_timestamp(to)
            )));
        }
        Ok(Self { from, to })
    }

    /// First instant after the range.
    pub fn end_exclusive(&self) -> NaiveDateTime {
        self.to + Duration::milliseconds(1)
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.from <= ts && ts <= self.to
    }

    /// Do both ends fall on bucket boundaries of `granularity`?
    pub fn is_aligned_to(&self, granularity: Granularity) -> bool {
        granularity.is_aligned(self.from) && granularity.is_aligned(self.end_exclusive())
    }

    pub fn from_literal(&self) -> String {
        format_timestamp(self.from)
    }

    pub fn to_literal(&self) -> String {
        format_timestamp(self.to)
    }
}

/// `YYYY-MM-DDTHH:MM:SS.fff`, the form timestamp literals are emitted in.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Resolve a request range against `now`.
pub fn resolve(range: &DateRange, now: NaiveDateTime) -> CompileResult<DateBounds> {
    match range {
        DateRange::Absolute(bounds) => match bounds.as_slice() {
            [from, to] => DateBounds::new(start_of(from)?, end_of(to)?),
            _ => Err(CompileError::InvalidDateRange(format!(
                "expected [from, to], got {} value(s)",
                bounds.len()
            ))),
        },
        DateRange::Relative(text) => relative(text, now),
    }
}

/// Parse a date or timestamp. Date-only values report `true`.
pub fn parse_timestamp(value: &str) -> Option<(NaiveDateTime, bool)> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ts| (ts, true));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some((ts.naive_utc(), false));
    }
    let value = value.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|ts| (ts, false))
}

/// Lower bound: the instant itself.
pub fn start_of(value: &str) -> CompileResult<NaiveDateTime> {
    parse_timestamp(value)
        .map(|(ts, _)| ts)
        .ok_or_else(|| CompileError::InvalidDateRange(format!("'{value}' is not a date")))
}

/// Upper bound: a date-only value extends to the end of its day.
pub fn end_of(value: &str) -> CompileResult<NaiveDateTime> {
    match parse_timestamp(value) {
        Some((ts, true)) => Ok(ts + Duration::days(1) - Duration::milliseconds(1)),
        Some((ts, false)) => Ok(ts),
        None => Err(CompileError::InvalidDateRange(format!(
            "'{value}' is not a date"
        ))),
    }
}

fn relative(text: &str, now: NaiveDateTime) -> CompileResult<DateBounds> {
    let invalid = || CompileError::InvalidDateRange(format!("unrecognized range '{text}'"));
    let normalized = text.trim().to_lowercase();
    let words: Vec<&str> = normalized.split_whitespace().collect();

    match words.as_slice() {
        ["today"] => bucket(Granularity::Day, now, 0),
        ["yesterday"] => bucket(Granularity::Day, now, 1),
        ["this", unit] => bucket(unit_granularity(unit).ok_or_else(invalid)?, now, 0),
        ["last", unit] => last(unit_granularity(unit).ok_or_else(invalid)?, now, 1),
        ["last", n, unit] => {
            let n: u32 = n.parse().ok().filter(|n| *n > 0).ok_or_else(invalid)?;
            last(unit_granularity(unit).ok_or_else(invalid)?, now, n)
        }
        _ => Err(invalid()),
    }
}

fn unit_granularity(unit: &str) -> Option<Granularity> {
    match unit.trim_end_matches('s') {
        "day" => Some(Granularity::Day),
        "week" => Some(Granularity::Week),
        "month" => Some(Granularity::Month),
        "quarter" => Some(Granularity::Quarter),
        "year" => Some(Granularity::Year),
        _ => None,
    }
}

/// The whole bucket `back` buckets before the one containing `now`.
fn bucket(granularity: Granularity, now: NaiveDateTime, back: u32) -> CompileResult<DateBounds> {
    let start = shift_back(granularity, granularity.truncate(now), back)?;
    DateBounds::new(start, granularity.next_boundary(start) - Duration::milliseconds(1))
}

/// The `n` complete buckets before the current one.
fn last(granularity: Granularity, now: NaiveDateTime, n: u32) -> CompileResult<DateBounds> {
    let current = granularity.truncate(now);
    let start = shift_back(granularity, current, n)?;
    DateBounds::new(start, current - Duration::milliseconds(1))
}

fn shift_back(granularity: Granularity, ts: NaiveDateTime, n: u32) -> CompileResult<NaiveDateTime> {
    let shifted = match granularity {
        Granularity::Week => ts.checked_sub_signed(Duration::weeks(n as i64)),
        Granularity::Month => ts.checked_sub_months(Months::new(n)),
        Granularity::Quarter => ts.checked_sub_months(Months::new(n * 3)),
        Granularity::Year => ts.checked_sub_months(Months::new(n * 12)),
        _ => ts.checked_sub_signed(Duration::days(n as i64)),
    };
    shifted.ok_or_else(|| CompileError::InvalidDateRange("range out of bounds".into()))
}
