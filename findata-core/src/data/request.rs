//! Fetch request types: periods, intervals, and time ranges.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::network::NetworkOptions;

/// Named relative window understood by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "10y")]
    TenYears,
    #[serde(rename = "ytd")]
    YearToDate,
    #[serde(rename = "max")]
    Max,
}

impl Period {
    pub const ALL: [Period; 11] = [
        Period::OneDay,
        Period::FiveDays,
        Period::OneMonth,
        Period::ThreeMonths,
        Period::SixMonths,
        Period::OneYear,
        Period::TwoYears,
        Period::FiveYears,
        Period::TenYears,
        Period::YearToDate,
        Period::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneDay => "1d",
            Period::FiveDays => "5d",
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
            Period::TenYears => "10y",
            Period::YearToDate => "ytd",
            Period::Max => "max",
        }
    }

    /// Resolve the period to an explicit inclusive date window ending `today`.
    ///
    /// `max` starts at 1900-01-01, before any listing the provider carries.
    pub fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let months_back = |m: u32| today.checked_sub_months(Months::new(m)).unwrap_or(NaiveDate::MIN);
        let start = match self {
            Period::OneDay => today - chrono::Duration::days(1),
            Period::FiveDays => today - chrono::Duration::days(5),
            Period::OneMonth => months_back(1),
            Period::ThreeMonths => months_back(3),
            Period::SixMonths => months_back(6),
            Period::OneYear => months_back(12),
            Period::TwoYears => months_back(24),
            Period::FiveYears => months_back(60),
            Period::TenYears => months_back(120),
            Period::YearToDate => NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
            Period::Max => NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN),
        };
        (start, today)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Period::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Period::ALL.iter().map(|p| p.as_str()).collect();
                format!("unknown period '{s}'. Valid: {}", valid.join(", "))
            })
    }
}

/// Sampling granularity of the returned rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "2m")]
    TwoMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "60m")]
    SixtyMinutes,
    #[serde(rename = "90m")]
    NinetyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1wk")]
    OneWeek,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
}

impl Interval {
    pub const ALL: [Interval; 13] = [
        Interval::OneMinute,
        Interval::TwoMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::SixtyMinutes,
        Interval::NinetyMinutes,
        Interval::OneHour,
        Interval::OneDay,
        Interval::FiveDays,
        Interval::OneWeek,
        Interval::OneMonth,
        Interval::ThreeMonths,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::TwoMinutes => "2m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::SixtyMinutes => "60m",
            Interval::NinetyMinutes => "90m",
            Interval::OneHour => "1h",
            Interval::OneDay => "1d",
            Interval::FiveDays => "5d",
            Interval::OneWeek => "1wk",
            Interval::OneMonth => "1mo",
            Interval::ThreeMonths => "3mo",
        }
    }

    /// Sub-daily sampling. Intraday rows are indexed by timestamp, not date.
    pub fn is_intraday(&self) -> bool {
        matches!(
            self,
            Interval::OneMinute
                | Interval::TwoMinutes
                | Interval::FiveMinutes
                | Interval::FifteenMinutes
                | Interval::ThirtyMinutes
                | Interval::SixtyMinutes
                | Interval::NinetyMinutes
                | Interval::OneHour
        )
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Interval::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Interval::ALL.iter().map(|i| i.as_str()).collect();
                format!("unknown interval '{s}'. Valid: {}", valid.join(", "))
            })
    }
}

/// A named period or an explicit inclusive date window, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    Period(Period),
    Between { start: NaiveDate, end: NaiveDate },
}

impl TimeRange {
    /// Explicit window. Fails when `start` is after `end`.
    pub fn between(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if start > end {
            return Err(format!("start date {start} is after end date {end}"));
        }
        Ok(TimeRange::Between { start, end })
    }

    /// Build from optional caller input. Exactly one form must be present;
    /// a start without an end (or the reverse) is rejected, not defaulted.
    pub fn from_parts(
        period: Option<Period>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self, String> {
        match (period, start, end) {
            (Some(p), None, None) => Ok(TimeRange::Period(p)),
            (None, Some(s), Some(e)) => Self::between(s, e),
            (Some(_), _, _) => Err("a period and explicit dates are mutually exclusive".into()),
            (None, None, None) => Err("either a period or a start/end pair is required".into()),
            (None, _, _) => Err("explicit ranges need both a start and an end date".into()),
        }
    }

    /// Inclusive date window, resolving a named period against `today`.
    pub fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            TimeRange::Period(p) => p.window(today),
            TimeRange::Between { start, end } => (*start, *end),
        }
    }

    /// Short label used in file names and logs.
    pub fn label(&self) -> String {
        match self {
            TimeRange::Period(p) => p.as_str().to_string(),
            TimeRange::Between { start, end } => format!("{start}_{end}"),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRange::Period(p) => write!(f, "period {p}"),
            TimeRange::Between { start, end } => write!(f, "{start} to {end}"),
        }
    }
}

/// Everything needed to fetch one ticker's history. Built once per invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub ticker: String,
    pub range: TimeRange,
    pub interval: Interval,
    pub include_extended_hours: bool,
    pub auto_adjust: bool,
    pub network: NetworkOptions,
}

impl FetchRequest {
    /// Daily bars, regular hours only, auto-adjusted, default network options.
    pub fn new(ticker: impl Into<String>, range: TimeRange) -> Self {
        Self {
            ticker: ticker.into().trim().to_string(),
            range,
            interval: Interval::OneDay,
            include_extended_hours: false,
            auto_adjust: true,
            network: NetworkOptions::default(),
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_extended_hours(mut self, include: bool) -> Self {
        self.include_extended_hours = include;
        self
    }

    pub fn with_auto_adjust(mut self, auto_adjust: bool) -> Self {
        self.auto_adjust = auto_adjust;
        self
    }

    pub fn with_network(mut self, network: NetworkOptions) -> Self {
        self.network = network;
        self
    }

    /// Minimal recent-window request for the same ticker, used to check the
    /// ticker exists at all.
    pub fn probe(&self) -> Self {
        Self {
            ticker: self.ticker.clone(),
            range: TimeRange::Period(Period::FiveDays),
            interval: Interval::OneDay,
            include_extended_hours: false,
            auto_adjust: false,
            network: self.network.clone(),
        }
    }

    /// Reject requests the provider could never satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.ticker.is_empty() {
            return Err("ticker must not be empty".into());
        }
        if self.ticker.chars().any(char::is_whitespace) {
            return Err(format!("ticker '{}' contains whitespace", self.ticker));
        }
        // The ticker becomes a URL path segment.
        if let Some(c) = self
            .ticker
            .chars()
            .find(|&c| c.is_control() || matches!(c, '/' | '\\' | '?' | '#' | '%'))
        {
            return Err(format!("ticker '{}' contains '{}'", self.ticker, c.escape_default()));
        }
        if let TimeRange::Between { start, end } = self.range {
            if start > end {
                return Err(format!("start date {start} is after end date {end}"));
            }
        }
        self.network.validate()
    }
}
