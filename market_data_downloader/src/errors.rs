use shared_utils::config::ConfigError;
use thiserror::Error;

use crate::io::SinkError;
use crate::models::{market::UnknownMarketError, timeframe::TimeFrameError, timespan::TimespanError};
use crate::providers::{ProviderError, ProviderInitError};

/// The unified error type for the `market_data_downloader` crate.
///
/// Variants follow the failure categories a caller acts on: bad input
/// (`Validation`), a valid request with nothing to return (`NotFound`), and
/// upstream or local failures.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// The request was valid but produced no records.
    #[error("{0}")]
    NotFound(String),

    /// An error originating from a data provider (network, upstream rejection).
    #[error("Provider error: {0}")]
    Provider(#[source] ProviderError),

    /// A provider could not be constructed (missing API key, bad exchange).
    #[error("Provider setup failed: {0}")]
    ProviderInit(#[from] ProviderInitError),

    /// An error originating from a data sink (e.g., file I/O).
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// An error related to configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure is transient (network) and worth trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Provider(e) if e.is_retryable())
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Validation { message, .. } => Error::Validation(message),
            ProviderError::NotFound { message, .. } => Error::NotFound(message),
            ProviderError::Init { source } => Error::ProviderInit(source),
            other => Error::Provider(other),
        }
    }
}

impl From<TimeFrameError> for Error {
    fn from(err: TimeFrameError) -> Self {
        Error::Validation(err.to_string())
    }
}

impl From<TimespanError> for Error {
    fn from(err: TimespanError) -> Self {
        Error::Validation(err.to_string())
    }
}

impl From<UnknownMarketError> for Error {
    fn from(err: UnknownMarketError) -> Self {
        Error::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{NotFoundSnafu, ValidationSnafu};

    #[test]
    fn provider_categories_are_lifted() {
        let err: Error = ValidationSnafu { message: "bad interval" }.build().into();
        assert!(matches!(err, Error::Validation(ref m) if m == "bad interval"));

        let err: Error = NotFoundSnafu { message: "nothing" }.build().into();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn model_errors_are_validation() {
        let err: Error = "7X".parse::<crate::models::timespan::Timespan>().unwrap_err().into();
        assert!(matches!(err, Error::Validation(_)));
    }
}
