//! Canonical in-memory representation of a time-series bar (OHLCV).
//!
//! This struct is used as the standard output for all
//! [`DataProvider`](crate::providers::DataProvider) implementations,
//! regardless of asset class (stocks or crypto).

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::timeframe::TimeFrame;

/// A single time-series bar (OHLCV) for a given timestamp.
///
/// This struct is vendor-agnostic and is used throughout the download pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    /// The timestamp for this bar (UTC).
    pub timestamp: DateTime<Utc>,

    /// Opening price.
    pub open: f64,

    /// Highest price during the bar interval.
    pub high: f64,

    /// Lowest price during the bar interval.
    pub low: f64,

    /// Closing price.
    pub close: f64,

    /// Volume traded during the bar interval.
    pub volume: f64,
}

impl Bar {
    /// Finite prices and a finite, non-negative volume.
    pub fn is_well_formed(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite())
            && self.volume.is_finite()
            && self.volume >= 0.0
    }
}

/// Represents a complete set of time-series data for a single symbol.
///
/// This struct groups a vector of [`Bar`]s with their corresponding symbol
/// and [`TimeFrame`], making the data set self-describing.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    /// The symbol this data represents (e.g., "AAPL", "BTC/USDT").
    pub symbol: String,
    /// The time interval for each bar in the series.
    pub timeframe: TimeFrame,
    /// The collection of OHLCV bars.
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, timeframe: TimeFrame, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.first().map(|b| b.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }

    /// Restricts the series to the inclusive `[start, end]` range and puts it
    /// in canonical order.
    ///
    /// Malformed bars are dropped, the rest are sorted by timestamp and
    /// duplicate timestamps are collapsed onto their first occurrence. After
    /// this call timestamps are strictly increasing.
    pub fn normalize(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let before = self.bars.len();
        self.bars.retain(|b| b.timestamp >= start && b.timestamp <= end);
        let in_range = self.bars.len();

        self.bars.retain(Bar::is_well_formed);
        let malformed = in_range - self.bars.len();
        if malformed > 0 {
            warn!(symbol = %self.symbol, malformed, "dropped bars with invalid values");
        }

        // Stable sort keeps arrival order among equal timestamps.
        self.bars.sort_by_key(|b| b.timestamp);
        self.bars.dedup_by_key(|b| b.timestamp);

        debug!(
            symbol = %self.symbol,
            before,
            after = self.bars.len(),
            "normalized bar series"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn bar(ts: i64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn normalize_sorts_and_keeps_first_duplicate() {
        let mut series = BarSeries::new(
            "BTC/USDT",
            TimeFrame::day(),
            vec![bar(300, 3.0), bar(100, 1.0), bar(200, 2.0), bar(100, 9.0)],
        );
        series.normalize(Utc.timestamp_opt(0, 0).unwrap(), Utc.timestamp_opt(1_000, 0).unwrap());

        let closes: Vec<f64> = series.bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn normalize_range_is_inclusive() {
        let mut series = BarSeries::new(
            "AAPL",
            TimeFrame::day(),
            vec![bar(99, 0.0), bar(100, 1.0), bar(200, 2.0), bar(201, 3.0)],
        );
        series.normalize(Utc.timestamp_opt(100, 0).unwrap(), Utc.timestamp_opt(200, 0).unwrap());
        assert_eq!(series.len(), 2);
        assert_eq!(series.first_timestamp(), Some(Utc.timestamp_opt(100, 0).unwrap()));
        assert_eq!(series.last_timestamp(), Some(Utc.timestamp_opt(200, 0).unwrap()));
    }

    #[test]
    fn normalize_drops_malformed_bars() {
        let mut negative_volume = bar(20, 2.0);
        negative_volume.volume = -1.0;
        let mut nan_price = bar(30, 3.0);
        nan_price.high = f64::NAN;

        let mut series = BarSeries::new(
            "AAPL",
            TimeFrame::day(),
            vec![bar(10, 1.0), negative_volume, nan_price],
        );
        series.normalize(Utc.timestamp_opt(0, 0).unwrap(), Utc.timestamp_opt(100, 0).unwrap());
        assert_eq!(series.len(), 1);
    }

    proptest! {
        #[test]
        fn normalized_series_is_strictly_increasing_and_bounded(
            stamps in proptest::collection::vec(0i64..10_000, 0..200),
            lo in 0i64..5_000,
            span in 0i64..5_000,
        ) {
            let start = Utc.timestamp_opt(lo, 0).unwrap();
            let end = Utc.timestamp_opt(lo + span, 0).unwrap();
            let bars = stamps.iter().map(|&ts| bar(ts, ts as f64)).collect();
            let mut series = BarSeries::new("X", TimeFrame::day(), bars);
            series.normalize(start, end);

            for pair in series.bars.windows(2) {
                prop_assert!(pair[0].timestamp < pair[1].timestamp);
            }
            if let (Some(first), Some(last)) = (series.first_timestamp(), series.last_timestamp()) {
                prop_assert!(first >= start);
                prop_assert!(last <= end);
            }
        }
    }
}
