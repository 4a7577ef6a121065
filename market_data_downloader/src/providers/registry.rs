//! Name-to-constructor table of the available data providers.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;

use crate::config::{CryptoSettings, Settings};
use crate::models::{
    asset::AssetClass,
    timeframe::{TimeFrame, supported_crypto_timeframes, supported_stock_timeframes},
};
use crate::providers::{
    crypto::{self, CryptoProvider},
    finnhub::{self, FinnhubProvider},
    fmp::{self, FmpProvider},
    polygon::{self, PolygonProvider},
    yahoo::{self, YahooProvider},
    DataProvider, ProviderInitError,
};

/// Everything a provider constructor may need.
#[derive(Clone)]
pub struct ProviderOptions {
    /// Exchange id for providers that require one.
    pub exchange: Option<String>,
    pub http_timeout: Duration,
    /// Replaces the provider's API host; used to point adapters at mock servers.
    pub base_url: Option<String>,
    /// API key taking precedence over the provider's environment variable.
    pub api_key: Option<String>,
    pub crypto: CryptoSettings,
}

impl ProviderOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            exchange: None,
            http_timeout: settings.http_timeout(),
            base_url: None,
            api_key: None,
            crypto: settings.crypto.clone(),
        }
    }

    pub fn with_exchange(mut self, exchange: Option<String>) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Static facts about a provider, shown by `--list-datasources`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub asset_class: AssetClass,
    /// Environment variable holding the API key, when one is required.
    pub api_key_env: Option<&'static str>,
    pub requires_exchange: bool,
    pub timeframes: Vec<TimeFrame>,
}

impl ProviderDescriptor {
    pub fn requires_api_key(&self) -> bool {
        self.api_key_env.is_some()
    }

    pub fn supports(&self, timeframe: &TimeFrame) -> bool {
        self.timeframes.contains(timeframe)
    }
}

pub type ProviderConstructor =
    fn(&ProviderOptions) -> Result<Box<dyn DataProvider>, ProviderInitError>;

struct Entry {
    descriptor: ProviderDescriptor,
    constructor: ProviderConstructor,
}

/// Registered providers in display order.
pub struct ProviderRegistry {
    entries: IndexMap<&'static str, Entry>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// The built-in providers: `yahoo`, `polygon`, `finnhub`, `fmp`, `crypto`.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(
            ProviderDescriptor {
                name: yahoo::NAME,
                description: "Yahoo Finance stock quotes (no API key)",
                asset_class: AssetClass::Stock,
                api_key_env: None,
                requires_exchange: false,
                timeframes: supported_stock_timeframes(),
            },
            |opts| {
                let mut provider = YahooProvider::new(opts.http_timeout)?;
                if let Some(url) = &opts.base_url {
                    provider = provider.with_base_url(url);
                }
                Ok(Box::new(provider))
            },
        );
        registry.register(
            ProviderDescriptor {
                name: polygon::NAME,
                description: "Polygon.io aggregates",
                asset_class: AssetClass::Stock,
                api_key_env: Some(polygon::API_KEY_ENV),
                requires_exchange: false,
                timeframes: supported_stock_timeframes(),
            },
            |opts| Ok(Box::new(PolygonProvider::new(opts)?)),
        );
        registry.register(
            ProviderDescriptor {
                name: finnhub::NAME,
                description: "Finnhub stock candles",
                asset_class: AssetClass::Stock,
                api_key_env: Some(finnhub::API_KEY_ENV),
                requires_exchange: false,
                timeframes: supported_stock_timeframes(),
            },
            |opts| Ok(Box::new(FinnhubProvider::new(opts)?)),
        );
        registry.register(
            ProviderDescriptor {
                name: fmp::NAME,
                description: "Financial Modeling Prep historical prices",
                asset_class: AssetClass::Stock,
                api_key_env: Some(fmp::API_KEY_ENV),
                requires_exchange: false,
                timeframes: supported_stock_timeframes(),
            },
            |opts| Ok(Box::new(FmpProvider::new(opts)?)),
        );
        registry.register(
            ProviderDescriptor {
                name: crypto::NAME,
                description: "Cryptocurrency OHLCV from public exchange candle APIs",
                asset_class: AssetClass::Crypto,
                api_key_env: None,
                requires_exchange: true,
                timeframes: supported_crypto_timeframes(),
            },
            |opts| Ok(Box::new(CryptoProvider::new(opts)?)),
        );
        registry
    }

    /// Adds or replaces a provider.
    pub fn register(&mut self, descriptor: ProviderDescriptor, constructor: ProviderConstructor) {
        self.entries.insert(
            descriptor.name,
            Entry {
                descriptor,
                constructor,
            },
        );
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    /// Instantiates a provider. Returns `None` for unknown names; callers
    /// check names first so they can report the alternatives.
    pub fn create(
        &self,
        name: &str,
        options: &ProviderOptions,
    ) -> Option<Result<Box<dyn DataProvider>, ProviderInitError>> {
        self.entries.get(name).map(|e| (e.constructor)(options))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
