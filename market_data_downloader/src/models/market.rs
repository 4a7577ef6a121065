//! Stock market configurations and their ticker suffixes.
//!
//! Quote services address non-US listings by appending an exchange suffix to
//! the ticker (`BHP` on the ASX is `BHP.AX`).

use serde::Serialize;
use thiserror::Error;

/// The market used when none is requested.
pub const DEFAULT_MARKET: &str = "america";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown market: {name}. Available: {}", available.join(", "))]
pub struct UnknownMarketError {
    pub name: String,
    pub available: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MarketConfig {
    /// Lookup key, e.g. `"australia"`.
    pub name: &'static str,
    /// Human-readable market name.
    pub label: &'static str,
    /// Suffix appended to tickers; empty for markets that need none.
    pub ticker_suffix: &'static str,
}

const MARKETS: &[MarketConfig] = &[
    MarketConfig { name: "america", label: "United States", ticker_suffix: "" },
    MarketConfig { name: "australia", label: "Australia (ASX)", ticker_suffix: ".AX" },
    MarketConfig { name: "brazil", label: "Brazil (B3)", ticker_suffix: ".SA" },
    MarketConfig { name: "canada", label: "Canada (TSX)", ticker_suffix: ".TO" },
    MarketConfig { name: "uk", label: "United Kingdom (LSE)", ticker_suffix: ".L" },
    MarketConfig { name: "germany", label: "Germany (XETRA)", ticker_suffix: ".DE" },
    MarketConfig { name: "japan", label: "Japan (TSE)", ticker_suffix: ".T" },
    MarketConfig { name: "hong_kong", label: "Hong Kong (HKEX)", ticker_suffix: ".HK" },
    MarketConfig { name: "india", label: "India (NSE)", ticker_suffix: ".NS" },
    MarketConfig { name: "crypto", label: "Cryptocurrency", ticker_suffix: "" },
];

impl MarketConfig {
    /// Looks a market up by name.
    pub fn lookup(name: &str) -> Result<&'static MarketConfig, UnknownMarketError> {
        MARKETS
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| UnknownMarketError {
                name: name.to_string(),
                available: market_names().iter().map(|s| s.to_string()).collect(),
            })
    }

    /// Appends the market suffix unless the ticker already carries it.
    pub fn apply_suffix(&self, ticker: &str) -> String {
        if self.ticker_suffix.is_empty() || ticker.ends_with(self.ticker_suffix) {
            ticker.to_string()
        } else {
            format!("{ticker}{}", self.ticker_suffix)
        }
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_MARKET
    }
}

/// All markets in display order.
pub fn markets() -> &'static [MarketConfig] {
    MARKETS
}

pub fn market_names() -> Vec<&'static str> {
    MARKETS.iter().map(|m| m.name).collect()
}
