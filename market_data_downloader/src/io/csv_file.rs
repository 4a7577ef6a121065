use std::path::PathBuf;

use async_trait::async_trait;
use snafu::ResultExt;
use tracing::info;

use crate::io::sink::{CsvSnafu, DataSink, SinkError, WriteSnafu, records, write_atomically};
use crate::models::bar::BarSeries;

/// Writes `date,open,high,low,close,volume` rows with a header line.
pub struct CsvFileSink {
    path: PathBuf,
}

impl CsvFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSink for CsvFileSink {
    type Output = PathBuf;

    async fn write(&self, series: &BarSeries) -> Result<PathBuf, SinkError> {
        let rows = records(series)?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &rows {
            writer.serialize(row).context(CsvSnafu)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .context(WriteSnafu { path: &self.path })?;

        write_atomically(&self.path, &bytes)?;
        info!(path = %self.path.display(), rows = rows.len(), "wrote CSV");
        Ok(self.path.clone())
    }
}
