use chrono::{DateTime, Utc};

use crate::models::{asset::AssetClass, timeframe::TimeFrame};

/// Universal parameters for requesting time-series bar data from any market data provider.
///
/// This struct is vendor-agnostic and is the standard input for all
/// [`DataProvider`](crate::providers::DataProvider) implementations.
#[derive(Clone, Debug)]
pub struct BarsRequestParams {
    /// Symbol as the provider expects it (e.g. `"BHP.AX"`, `"BTC/USDT"`).
    pub symbol: String,

    /// The time interval for each bar (e.g., 1 hour, 1 day).
    ///
    /// **Validation of allowed values is performed by each data provider
    /// implementation, according to their own API rules.**
    pub timeframe: TimeFrame,

    /// Start of the requested time range (inclusive, UTC).
    pub start: DateTime<Utc>,

    /// End of the requested time range (inclusive, UTC).
    pub end: DateTime<Utc>,

    /// The asset class for the requested symbol.
    pub asset_class: AssetClass,
}
