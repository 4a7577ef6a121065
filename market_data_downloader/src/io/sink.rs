use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use snafu::{Backtrace, ResultExt, Snafu};

use crate::models::{
    bar::{Bar, BarSeries},
    timeframe::TimeFrame,
    timespan::DATE_FORMAT,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// An error occurred while trying to write the data (e.g., file I/O error).
    #[snafu(display("Failed to write {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// An error occurred while converting the canonical `BarSeries` model into the
    /// destination format.
    #[snafu(display("Data conversion error: {message}"))]
    Conversion {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("CSV encoding failed: {source}"))]
    Csv {
        source: csv::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("JSON encoding failed: {source}"))]
    Json {
        source: serde_json::Error,
        backtrace: Backtrace,
    },
}

#[async_trait]
pub trait DataSink {
    /// The type of output returned after a successful write operation.
    ///
    /// A file sink returns the path it wrote; a database sink might return
    /// the number of rows inserted.
    type Output;

    /// Writes one series to the destination.
    async fn write(&self, series: &BarSeries) -> Result<Self::Output, SinkError>;
}

/// On-disk formats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        ext.parse().ok()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unsupported output format '{other}' (expected csv or json)")),
        }
    }
}

/// One output row. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcvRecord {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcvRecord {
    pub fn from_bar(bar: &Bar, timeframe: &TimeFrame) -> Self {
        Self {
            date: format_timestamp(bar.timestamp, timeframe),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

/// Calendar date for daily-or-longer bars, RFC 3339 instant for intraday bars.
pub fn format_timestamp(ts: DateTime<Utc>, timeframe: &TimeFrame) -> String {
    if timeframe.is_intraday() {
        ts.to_rfc3339_opts(SecondsFormat::Secs, true)
    } else {
        ts.format(DATE_FORMAT).to_string()
    }
}

pub(crate) fn records(series: &BarSeries) -> Result<Vec<OhlcvRecord>, SinkError> {
    if series.is_empty() {
        return ConversionSnafu {
            message: format!("refusing to write an empty series for {}", series.symbol),
        }
        .fail();
    }
    Ok(series
        .bars
        .iter()
        .map(|bar| OhlcvRecord::from_bar(bar, &series.timeframe))
        .collect())
}

/// Writes `contents` next to `path` and renames it into place, so a failed
/// write never leaves a truncated file at `path`.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), SinkError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context(WriteSnafu { path: parent })?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).context(WriteSnafu { path: &tmp })?;
    if let Err(source) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(source).context(WriteSnafu { path });
    }
    Ok(())
}
