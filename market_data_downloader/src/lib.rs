//! Downloads historical OHLCV bars for stocks and crypto pairs from a choice
//! of providers and writes them as CSV or JSON.
//!
//! ```no_run
//! use market_data_downloader::{config::Settings, service::{DownloadRequest, DownloadService}};
//!
//! # async fn run() -> Result<(), market_data_downloader::errors::Error> {
//! let service = DownloadService::new(Settings::load(None)?);
//! let mut request = DownloadRequest::new("yahoo", "AAPL");
//! request.timespan = Some("6M".to_string());
//! let result = service.download(&request).await?;
//! println!("{} rows -> {}", result.rows, result.path.display());
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod errors;
pub mod io;
pub mod models;
pub mod providers;
pub mod service;

pub use errors::Error;
