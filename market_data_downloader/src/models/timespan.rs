//! Shorthand timespans (`6M`, `YTD`, ...) and date-range resolution.

use std::{fmt, str::FromStr};

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Serialize, Serializer};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimespanError {
    #[error("Invalid timespan '{input}'. Available options: {}", Timespan::tokens().join(", "))]
    UnknownTimespan { input: String },

    #[error("Invalid date format '{input}'. Expected YYYY-MM-DD format.")]
    InvalidDate { input: String },

    #[error("Start date {start} must not be after end date {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Timespan {
    OneDay,
    FiveDays,
    TenDays,
    OneWeek,
    TwoWeeks,
    OneMonth,
    ThreeMonths,
    SixMonths,
    YearToDate,
    #[default]
    OneYear,
    TwoYears,
    ThreeYears,
    FiveYears,
}

impl Timespan {
    pub const ALL: [Timespan; 13] = [
        Timespan::OneDay,
        Timespan::FiveDays,
        Timespan::TenDays,
        Timespan::OneWeek,
        Timespan::TwoWeeks,
        Timespan::OneMonth,
        Timespan::ThreeMonths,
        Timespan::SixMonths,
        Timespan::YearToDate,
        Timespan::OneYear,
        Timespan::TwoYears,
        Timespan::ThreeYears,
        Timespan::FiveYears,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Timespan::OneDay => "1D",
            Timespan::FiveDays => "5D",
            Timespan::TenDays => "10D",
            Timespan::OneWeek => "1W",
            Timespan::TwoWeeks => "2W",
            Timespan::OneMonth => "1M",
            Timespan::ThreeMonths => "3M",
            Timespan::SixMonths => "6M",
            Timespan::YearToDate => "YTD",
            Timespan::OneYear => "1Y",
            Timespan::TwoYears => "2Y",
            Timespan::ThreeYears => "3Y",
            Timespan::FiveYears => "5Y",
        }
    }

    pub fn tokens() -> Vec<&'static str> {
        Self::ALL.iter().map(Timespan::token).collect()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Timespan::OneDay => "1 Day",
            Timespan::FiveDays => "5 Days",
            Timespan::TenDays => "10 Days",
            Timespan::OneWeek => "1 Week",
            Timespan::TwoWeeks => "2 Weeks",
            Timespan::OneMonth => "1 Month",
            Timespan::ThreeMonths => "3 Months",
            Timespan::SixMonths => "6 Months",
            Timespan::YearToDate => "Year to Date",
            Timespan::OneYear => "1 Year",
            Timespan::TwoYears => "2 Years",
            Timespan::ThreeYears => "3 Years",
            Timespan::FiveYears => "5 Years",
        }
    }

    /// Period component used in output file names.
    pub fn file_label(&self) -> &'static str {
        match self {
            Timespan::OneDay => "1day",
            Timespan::FiveDays => "5days",
            Timespan::TenDays => "10d",
            Timespan::OneWeek => "1week",
            Timespan::TwoWeeks => "2weeks",
            Timespan::OneMonth => "1month",
            Timespan::ThreeMonths => "3months",
            Timespan::SixMonths => "6months",
            Timespan::YearToDate => "ytd",
            Timespan::OneYear => "1year",
            Timespan::TwoYears => "2years",
            Timespan::ThreeYears => "3years",
            Timespan::FiveYears => "5years",
        }
    }

    /// Fixed lookback in days. `None` for year-to-date.
    fn lookback_days(&self) -> Option<i64> {
        match self {
            Timespan::OneDay => Some(1),
            Timespan::FiveDays => Some(5),
            Timespan::TenDays => Some(10),
            Timespan::OneWeek => Some(7),
            Timespan::TwoWeeks => Some(14),
            Timespan::OneMonth => Some(30),
            Timespan::ThreeMonths => Some(90),
            Timespan::SixMonths => Some(180),
            Timespan::YearToDate => None,
            Timespan::OneYear => Some(365),
            Timespan::TwoYears => Some(730),
            Timespan::ThreeYears => Some(1095),
            Timespan::FiveYears => Some(1825),
        }
    }

    /// Start date of this timespan when it ends on `today`.
    pub fn start_from(&self, today: NaiveDate) -> NaiveDate {
        match self.lookback_days() {
            Some(days) => today - Duration::days(days),
            // January 1st always exists.
            None => NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
        }
    }
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl Serialize for Timespan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.token())
    }
}

impl FromStr for Timespan {
    type Err = TimespanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.token() == wanted)
            .ok_or_else(|| TimespanError::UnknownTimespan {
                input: s.to_string(),
            })
    }
}

/// Parses a strict `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> Result<NaiveDate, TimespanError> {
    let trimmed = input.trim();
    // chrono accepts single-digit fields; the format is fixed width.
    if trimmed.len() != 10 {
        return Err(TimespanError::InvalidDate {
            input: input.to_string(),
        });
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT).map_err(|_| TimespanError::InvalidDate {
        input: input.to_string(),
    })
}

/// A concrete, inclusive date range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Resolves the range a download covers.
    ///
    /// Explicit dates take precedence over the timespan:
    /// both dates are used as given, a lone start runs to `today`, and a lone
    /// end looks back one year. Without dates the timespan (default `1Y`)
    /// ends on `today`.
    pub fn resolve(
        timespan: Option<Timespan>,
        start: Option<&str>,
        end: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, TimespanError> {
        let range = match (start, end) {
            (Some(s), Some(e)) => DateRange {
                start: parse_date(s)?,
                end: parse_date(e)?,
            },
            (Some(s), None) => DateRange {
                start: parse_date(s)?,
                end: today,
            },
            (None, Some(e)) => {
                let end = parse_date(e)?;
                DateRange {
                    start: Timespan::OneYear.start_from(end),
                    end,
                }
            }
            (None, None) => {
                let ts = timespan.unwrap_or_default();
                DateRange {
                    start: ts.start_from(today),
                    end: today,
                }
            }
        };

        if range.start > range.end {
            return Err(TimespanError::Inverted {
                start: range.start,
                end: range.end,
            });
        }
        Ok(range)
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}
