//! Primitive model types: member kinds, aggregations, relationships,
//! time granularities and refresh intervals.

use std::fmt;
use std::time::Duration;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Dimension value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    String,
    Number,
    Time,
    Boolean,
}

impl DimensionType {
    /// Parse a dimension type from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "string" => Some(DimensionType::String),
            "number" => Some(DimensionType::Number),
            "time" => Some(DimensionType::Time),
            "boolean" | "bool" => Some(DimensionType::Boolean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionType::String => "string",
            DimensionType::Number => "number",
            DimensionType::Time => "time",
            DimensionType::Boolean => "boolean",
        }
    }
}

/// Measure aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationType {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
}

impl AggregationType {
    /// Parse an aggregation from a string (`countDistinct` or `count_distinct`).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "").as_str() {
            "count" => Some(AggregationType::Count),
            "sum" => Some(AggregationType::Sum),
            "avg" => Some(AggregationType::Avg),
            "min" => Some(AggregationType::Min),
            "max" => Some(AggregationType::Max),
            "countdistinct" => Some(AggregationType::CountDistinct),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Count => "count",
            AggregationType::Sum => "sum",
            AggregationType::Avg => "avg",
            AggregationType::Min => "min",
            AggregationType::Max => "max",
            AggregationType::CountDistinct => "countDistinct",
        }
    }

    /// Whether partial results of this aggregation can be merged into a
    /// coarser result.
    pub fn is_additive(&self) -> bool {
        !matches!(self, AggregationType::CountDistinct)
    }
}

/// Cardinality of a declared join, seen from the declaring cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    OneToOne,
    ManyToOne,
    OneToMany,
}

impl Relationship {
    /// Parse a relationship, accepting the `belongsTo`/`hasOne`/`hasMany` spellings.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "onetoone" | "hasone" => Some(Relationship::OneToOne),
            "manytoone" | "belongsto" => Some(Relationship::ManyToOne),
            "onetomany" | "hasmany" => Some(Relationship::OneToMany),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::OneToOne => "one_to_one",
            Relationship::ManyToOne => "many_to_one",
            Relationship::OneToMany => "one_to_many",
        }
    }

    /// Does traversing the join from source to target multiply source rows?
    pub fn forward_fans_out(&self) -> bool {
        matches!(self, Relationship::OneToMany)
    }

    /// Does traversing the join from target back to source multiply rows?
    pub fn reverse_fans_out(&self) -> bool {
        matches!(self, Relationship::ManyToOne)
    }
}

/// Time granularity.
///
/// Roll-up lattice: second < minute < hour < day < week, and
/// day < month < quarter < year. Weeks straddle month boundaries, so a
/// week never rolls up into a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 8] = [
        Granularity::Second,
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Quarter,
        Granularity::Year,
    ];

    /// Parse a granularity from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "second" => Some(Granularity::Second),
            "minute" => Some(Granularity::Minute),
            "hour" => Some(Granularity::Hour),
            "day" => Some(Granularity::Day),
            "week" => Some(Granularity::Week),
            "month" => Some(Granularity::Month),
            "quarter" => Some(Granularity::Quarter),
            "year" => Some(Granularity::Year),
            _ => None,
        }
    }

    /// Unit name as used by `DATE_TRUNC`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }

    /// Can rows stored at `self` be re-aggregated to `target`?
    pub fn can_roll_up_to(&self, target: Granularity) -> bool {
        use Granularity::*;
        if *self == target {
            return true;
        }
        if *self > target {
            return false;
        }
        match (*self, target) {
            (Week, Month | Quarter | Year) => false,
            _ => true,
        }
    }

    /// Truncate a timestamp to the start of its bucket. Weeks start on Monday.
    pub fn truncate(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let date = ts.date();
        match self {
            Granularity::Second => ts.with_nanosecond(0).unwrap_or(ts),
            Granularity::Minute => start_of_day(date)
                + ChronoDuration::hours(ts.hour() as i64)
                + ChronoDuration::minutes(ts.minute() as i64),
            Granularity::Hour => start_of_day(date) + ChronoDuration::hours(ts.hour() as i64),
            Granularity::Day => start_of_day(date),
            Granularity::Week => start_of_day(
                date - ChronoDuration::days(date.weekday().num_days_from_monday() as i64),
            ),
            Granularity::Month => first_of(date.year(), date.month()).unwrap_or(ts),
            Granularity::Quarter => {
                let month = (date.month0() / 3) * 3 + 1;
                first_of(date.year(), month).unwrap_or(ts)
            }
            Granularity::Year => first_of(date.year(), 1).unwrap_or(ts),
        }
    }

    /// Is the timestamp exactly on a bucket boundary?
    pub fn is_aligned(&self, ts: NaiveDateTime) -> bool {
        self.truncate(ts) == ts
    }

    /// Start of the bucket following the one containing `ts`.
    pub fn next_boundary(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let start = self.truncate(ts);
        match self {
            Granularity::Second => start + ChronoDuration::seconds(1),
            Granularity::Minute => start + ChronoDuration::minutes(1),
            Granularity::Hour => start + ChronoDuration::hours(1),
            Granularity::Day => start + ChronoDuration::days(1),
            Granularity::Week => start + ChronoDuration::weeks(1),
            Granularity::Month => add_months(start, 1),
            Granularity::Quarter => add_months(start, 3),
            Granularity::Year => add_months(start, 12),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap_or_default()
}

fn first_of(year: i32, month: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, 1).map(start_of_day)
}

/// Add calendar months to a timestamp already truncated to a month start.
pub(crate) fn add_months(ts: NaiveDateTime, months: u32) -> NaiveDateTime {
    let total = ts.year() * 12 + ts.month0() as i32 + months as i32;
    let (year, month0) = (total.div_euclid(12), total.rem_euclid(12) as u32);
    first_of(year, month0 + 1).unwrap_or(ts)
}

/// Refresh cadence parsed from `"<N> <unit>"` (e.g. `"4 hours"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefreshEvery(pub Duration);

impl RefreshEvery {
    /// Parse an interval string. Units: second, minute, hour, day, week
    /// (singular or plural).
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split_whitespace();
        let amount: u64 = parts.next()?.parse().ok()?;
        let unit = parts.next()?.to_lowercase();
        if parts.next().is_some() || amount == 0 {
            return None;
        }
        let secs = match unit.trim_end_matches('s') {
            "second" | "sec" => 1,
            "minute" | "min" => 60,
            "hour" => 3_600,
            "day" => 86_400,
            "week" => 604_800,
            _ => return None,
        };
        Some(RefreshEvery(Duration::from_secs(amount.checked_mul(secs)?)))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}
