//! Provider abstraction for market data sources.
//!
//! This module defines the [`DataProvider`] trait, which serves as a unified interface
//! for fetching time-series bar data from any market data vendor (e.g., Yahoo, Polygon.io,
//! a crypto exchange).
//!
//! Each concrete provider implementation handles vendor-specific API logic, interval
//! mapping and validation, and returns a [`BarSeries`] in the canonical OHLCV shape.
//!
//! The trait is designed for async usage and supports dynamic dispatch (`dyn DataProvider`)
//! for runtime selection of providers through the [`registry`].
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use market_data_downloader::models::{bar::BarSeries, request_params::BarsRequestParams};
//! use market_data_downloader::providers::{DataProvider, ProviderError};
//!
//! struct MyProvider;
//!
//! #[async_trait]
//! impl DataProvider for MyProvider {
//!     fn name(&self) -> &'static str {
//!         "mine"
//!     }
//!
//!     async fn fetch_bars(&self, params: &BarsRequestParams) -> Result<BarSeries, ProviderError> {
//!         Ok(BarSeries::new(params.symbol.clone(), params.timeframe, vec![]))
//!     }
//! }
//! ```

pub mod crypto;
pub mod finnhub;
pub mod fmp;
pub mod polygon;
pub mod registry;
pub mod yahoo;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use secrecy::SecretString;
use shared_utils::env::{MissingEnvVarError, get_env_var};
use snafu::{Backtrace, Snafu};

use crate::models::{bar::BarSeries, request_params::BarsRequestParams, timeframe::TimeFrame};
use crate::providers::registry::ProviderOptions;

/// Trait for fetching time-series bar data from a market data provider.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Registry name of the provider (e.g. `"yahoo"`).
    fn name(&self) -> &'static str;

    /// Fetches time-series bar data for the given request parameters.
    ///
    /// # Returns
    ///
    /// * `Ok(BarSeries)` - Bars sorted ascending, without duplicate timestamps.
    /// * `Err(ProviderError::NotFound)` - The request was valid but produced no bars.
    /// * `Err(ProviderError)` - Any other failure, categorized by variant.
    async fn fetch_bars(&self, params: &BarsRequestParams) -> Result<BarSeries, ProviderError>;
}

/// Errors that can occur during the creation of a provider instance
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderInitError {
    /// missed environment variable.
    #[snafu(context(false), display("{source}"))]
    MissingEnvVar {
        source: MissingEnvVarError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(context(false), display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// API key contains invalid characters.
    #[snafu(context(false), display("Invalid API key format: {source}"))]
    InvalidApiKey {
        source: reqwest::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },

    /// The provider needs an exchange and none was given.
    #[snafu(display("Provider '{provider}' requires an exchange"))]
    MissingExchange {
        provider: String,
        backtrace: Backtrace,
    },

    /// The exchange id is not one of the built-in exchange clients.
    #[snafu(display("Exchange '{exchange}' is not supported. Available exchanges: {available}"))]
    UnknownExchange {
        exchange: String,
        available: String,
        backtrace: Backtrace,
    },
}

/// Errors that can occur within a `DataProvider` implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderError {
    /// An error during an API request (e.g., network failure, timeout).
    #[snafu(context(false), display("API request failed: {source}"))]
    Reqwest {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The provider's API returned a specific error message (e.g., invalid API key).
    #[snafu(display("API error: {message}"))]
    Api {
        message: String,
        backtrace: Backtrace,
    },

    /// The request parameters were invalid for this specific provider.
    #[snafu(display("Invalid parameters for provider: {message}"))]
    Validation {
        message: String,
        backtrace: Backtrace,
    },

    /// The request was valid but the provider has no bars for it.
    #[snafu(display("No data found: {message}"))]
    NotFound {
        message: String,
        backtrace: Backtrace,
    },

    /// An internal error occurred while processing data within the provider.
    #[snafu(display("Internal provider error: {message}"))]
    Internal {
        message: String,
        backtrace: Backtrace,
    },

    /// An error during provider configuration or initialization.
    #[snafu(context(false), display("Provider initialization error: {source}"))]
    Init {
        #[snafu(backtrace)]
        source: ProviderInitError,
    },
}

impl ProviderError {
    /// Transport failures that could succeed on another attempt.
    ///
    /// Nothing in this crate retries; the flag is informational for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Reqwest { source, .. } => !source.is_decode() && !source.is_builder(),
            _ => false,
        }
    }
}

/// Builds the HTTP client shared by the REST providers.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, ProviderInitError> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("market_data_downloader/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// API key from the options, falling back to the provider's environment variable.
pub(crate) fn resolve_api_key(
    options: &ProviderOptions,
    env_var: &str,
) -> Result<SecretString, ProviderInitError> {
    let key = match &options.api_key {
        Some(key) => key.clone(),
        None => get_env_var(env_var)?,
    };
    Ok(SecretString::new(key.into()))
}

/// Passes successful responses through; anything else becomes an API error
/// carrying the status and the beginning of the body.
pub(crate) async fn ensure_success(
    provider: &str,
    response: Response,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown API error".to_string());
    let snippet: String = body.chars().take(200).collect();
    ApiSnafu {
        message: format!("{provider} HTTP {}: {snippet}", status.as_u16()),
    }
    .fail()
}

/// Daily-or-longer bars are keyed by calendar date; drop the time of day.
pub(crate) fn midnight_utc(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Trims a fetched series to the requested range and rejects it if nothing
/// is left.
pub(crate) fn finish_series(
    provider: &str,
    mut series: BarSeries,
    params: &BarsRequestParams,
) -> Result<BarSeries, ProviderError> {
    series.normalize(params.start, params.end);
    if series.is_empty() {
        return NotFoundSnafu {
            message: format!(
                "{provider} returned no bars for {} between {} and {}",
                params.symbol,
                params.start.date_naive(),
                params.end.date_naive()
            ),
        }
        .fail();
    }
    Ok(series)
}

/// Rejects intervals the provider does not offer.
pub(crate) fn validate_timeframe(
    provider: &str,
    timeframe: &TimeFrame,
    supported: &[TimeFrame],
) -> Result<(), ProviderError> {
    if supported.contains(timeframe) {
        return Ok(());
    }
    let list: Vec<String> = supported.iter().map(ToString::to_string).collect();
    ValidationSnafu {
        message: format!(
            "Interval '{timeframe}' not supported by {provider}. Supported intervals: {}",
            list.join(", ")
        ),
    }
    .fail()
}
