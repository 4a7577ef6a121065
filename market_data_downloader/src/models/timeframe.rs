//! Bar intervals.
//!
//! A [`TimeFrame`] pairs a non-zero amount with a [`TimeFrameUnit`]. The
//! textual form is the interval token accepted on the command line:
//! `1m 5m 15m 30m 1h 2h 4h 6h 12h 1d 1wk 1mo`. `1w` and `1M` are accepted as
//! aliases for a week and a month. Units are case-sensitive: `m` is a minute,
//! `M` is a month.
//!
//! ```
//! use market_data_downloader::models::timeframe::{TimeFrame, TimeFrameUnit};
//!
//! let tf: TimeFrame = "4h".parse().unwrap();
//! assert_eq!(tf.amount.get(), 4);
//! assert_eq!(tf.unit, TimeFrameUnit::Hour);
//! assert_eq!(tf.to_string(), "4h");
//! ```

use std::{fmt, num::NonZeroU32, str::FromStr};

use nonzero_ext::nonzero;
use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeFrameError {
    #[error("Invalid amount for {unit:?}: {message}")]
    InvalidAmount {
        unit: TimeFrameUnit,
        message: String,
    },

    #[error("Invalid interval {input:?}: {message}")]
    InvalidInput { input: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeFrameUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeFrame {
    pub amount: NonZeroU32,
    pub unit: TimeFrameUnit,
}

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

impl TimeFrame {
    pub const fn new(amount: NonZeroU32, unit: TimeFrameUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn minutes(amount: NonZeroU32) -> Self {
        Self::new(amount, TimeFrameUnit::Minute)
    }

    pub const fn hours(amount: NonZeroU32) -> Self {
        Self::new(amount, TimeFrameUnit::Hour)
    }

    pub fn day() -> Self {
        Self::new(nonzero!(1u32), TimeFrameUnit::Day)
    }

    pub fn week() -> Self {
        Self::new(nonzero!(1u32), TimeFrameUnit::Week)
    }

    pub fn month() -> Self {
        Self::new(nonzero!(1u32), TimeFrameUnit::Month)
    }

    /// Builds a timeframe, rejecting amounts no supported provider offers.
    pub fn try_new(amount: u32, unit: TimeFrameUnit) -> Result<Self, TimeFrameError> {
        let allowed: &[u32] = match unit {
            TimeFrameUnit::Minute => &[1, 5, 15, 30],
            TimeFrameUnit::Hour => &[1, 2, 4, 6, 12],
            TimeFrameUnit::Day | TimeFrameUnit::Week | TimeFrameUnit::Month => &[1],
        };
        if !allowed.contains(&amount) {
            return Err(TimeFrameError::InvalidAmount {
                unit,
                message: format!("amount {amount} not in {allowed:?}"),
            });
        }
        // `allowed` never contains zero.
        let amount = NonZeroU32::new(amount).ok_or_else(|| TimeFrameError::InvalidAmount {
            unit,
            message: "amount must be > 0".into(),
        })?;
        Ok(Self::new(amount, unit))
    }

    /// Nominal bar length in milliseconds. A month counts as 30 days.
    pub fn duration_ms(&self) -> i64 {
        let unit_ms = match self.unit {
            TimeFrameUnit::Minute => MINUTE_MS,
            TimeFrameUnit::Hour => HOUR_MS,
            TimeFrameUnit::Day => DAY_MS,
            TimeFrameUnit::Week => 7 * DAY_MS,
            TimeFrameUnit::Month => 30 * DAY_MS,
        };
        unit_ms * i64::from(self.amount.get())
    }

    /// Whether bars are shorter than a day.
    pub fn is_intraday(&self) -> bool {
        matches!(self.unit, TimeFrameUnit::Minute | TimeFrameUnit::Hour)
    }
}

/// Every interval the crypto exchanges can be asked for.
pub fn supported_crypto_timeframes() -> Vec<TimeFrame> {
    [
        "1m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "12h", "1d", "1wk", "1mo",
    ]
    .iter()
    .filter_map(|s| s.parse().ok())
    .collect()
}

/// Intervals offered by the stock quote providers.
pub fn supported_stock_timeframes() -> Vec<TimeFrame> {
    vec![TimeFrame::day(), TimeFrame::week(), TimeFrame::month()]
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.amount.get();
        let u = match self.unit {
            TimeFrameUnit::Minute => "m",
            TimeFrameUnit::Hour => "h",
            TimeFrameUnit::Day => "d",
            TimeFrameUnit::Week => "wk",
            TimeFrameUnit::Month => "mo",
        };
        write!(f, "{a}{u}")
    }
}

impl FromStr for TimeFrame {
    type Err = TimeFrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |message: &str| TimeFrameError::InvalidInput {
            input: s.to_string(),
            message: message.to_string(),
        };

        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| invalid("missing unit"))?;
        let (digits, unit) = s.split_at(split);
        if digits.is_empty() {
            return Err(invalid("missing amount"));
        }
        let amount: u32 = digits.parse().map_err(|_| invalid("amount is not a number"))?;

        let unit = match unit {
            "m" | "min" => TimeFrameUnit::Minute,
            "h" => TimeFrameUnit::Hour,
            "d" | "D" => TimeFrameUnit::Day,
            "w" | "wk" | "W" => TimeFrameUnit::Week,
            "M" | "mo" => TimeFrameUnit::Month,
            _ => return Err(invalid("unknown unit")),
        };
        Self::try_new(amount, unit)
    }
}

impl Serialize for TimeFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_and_month_by_case() {
        let minute: TimeFrame = "1m".parse().unwrap();
        assert_eq!(minute.unit, TimeFrameUnit::Minute);

        let month: TimeFrame = "1M".parse().unwrap();
        assert_eq!(month.unit, TimeFrameUnit::Month);
        assert_eq!(month.to_string(), "1mo");
    }

    #[test]
    fn week_aliases_render_canonically() {
        for token in ["1w", "1wk", "1W"] {
            let tf: TimeFrame = token.parse().unwrap();
            assert_eq!(tf, TimeFrame::week());
            assert_eq!(tf.to_string(), "1wk");
        }
    }

    #[test]
    fn display_round_trips_for_supported_tokens() {
        for tf in supported_crypto_timeframes() {
            let reparsed: TimeFrame = tf.to_string().parse().unwrap();
            assert_eq!(reparsed, tf);
        }
        assert_eq!(supported_crypto_timeframes().len(), 12);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("".parse::<TimeFrame>().is_err());
        assert!("h".parse::<TimeFrame>().is_err());
        assert!("5".parse::<TimeFrame>().is_err());
        assert!("1y".parse::<TimeFrame>().is_err());
        assert!("3h".parse::<TimeFrame>().is_err());
        assert!("2d".parse::<TimeFrame>().is_err());
        assert!("0m".parse::<TimeFrame>().is_err());
    }

    #[test]
    fn invalid_amount_names_the_unit() {
        match TimeFrame::try_new(60, TimeFrameUnit::Minute) {
            Err(TimeFrameError::InvalidAmount { unit, .. }) => {
                assert_eq!(unit, TimeFrameUnit::Minute)
            }
            other => panic!("Expected InvalidAmount error, got {other:?}"),
        }
    }

    #[test]
    fn durations() {
        assert_eq!(TimeFrame::hours(nonzero!(1u32)).duration_ms(), 3_600_000);
        assert_eq!(TimeFrame::minutes(nonzero!(15u32)).duration_ms(), 900_000);
        assert_eq!(TimeFrame::week().duration_ms(), 7 * 86_400_000);
        assert!(TimeFrame::hours(nonzero!(4u32)).is_intraday());
        assert!(!TimeFrame::day().is_intraday());
    }
}
