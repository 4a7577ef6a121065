//! Output sinks for downloaded series.

pub mod csv_file;
pub mod json_file;
pub mod sink;

use std::path::PathBuf;

pub use csv_file::CsvFileSink;
pub use json_file::JsonFileSink;
pub use sink::{DataSink, OhlcvRecord, OutputFormat, SinkError};

use crate::models::bar::BarSeries;

/// Writes `series` to `path` in the requested format.
pub async fn write_series(
    format: OutputFormat,
    path: PathBuf,
    series: &BarSeries,
) -> Result<PathBuf, SinkError> {
    match format {
        OutputFormat::Csv => CsvFileSink::new(path).write(series).await,
        OutputFormat::Json => JsonFileSink::new(path).write(series).await,
    }
}
