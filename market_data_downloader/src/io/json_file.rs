use std::path::PathBuf;

use async_trait::async_trait;
use snafu::ResultExt;
use tracing::info;

use crate::io::sink::{DataSink, JsonSnafu, SinkError, records, write_atomically};
use crate::models::bar::BarSeries;

/// Writes a pretty-printed array of `{date, open, high, low, close, volume}`
/// objects.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSink for JsonFileSink {
    type Output = PathBuf;

    async fn write(&self, series: &BarSeries) -> Result<PathBuf, SinkError> {
        let rows = records(series)?;
        let bytes = serde_json::to_vec_pretty(&rows).context(JsonSnafu)?;
        write_atomically(&self.path, &bytes)?;
        info!(path = %self.path.display(), rows = rows.len(), "wrote JSON");
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::models::{bar::Bar, timeframe::TimeFrame};

    #[tokio::test]
    async fn intraday_records_carry_full_timestamps() {
        let bars = vec![Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap(),
            open: 42283.58,
            high: 42554.57,
            low: 42261.02,
            close: 42475.23,
            volume: 1271.68,
        }];
        let series = BarSeries::new("BTC/USDT", "1h".parse().unwrap(), bars);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("BTC-USDT_binance_1day_1h.json");
        JsonFileSink::new(&path).write(&series).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let row = &value.as_array().unwrap()[0];
        assert_eq!(row["date"], "2024-01-01T05:00:00Z");
        assert_eq!(row["close"], 42475.23);
        let keys: Vec<&String> = row.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 6);
    }

    #[tokio::test]
    async fn daily_records_use_dates() {
        let bars = vec![Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        }];
        let series = BarSeries::new("AAPL", TimeFrame::day(), bars);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("AAPL.json");
        JsonFileSink::new(&path).write(&series).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"date\": \"2024-03-01\""));
    }
}
