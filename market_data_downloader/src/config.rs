//! Runtime settings.
//!
//! Settings come from an optional TOML file and are then overridden by the
//! environment. The file is either given explicitly or found at
//! `<home>/config.toml`:
//!
//! ```toml
//! default_market = "australia"
//! http_timeout_secs = 30
//!
//! [crypto]
//! page_limit = 500
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use shared_utils::{
    config::ConfigError,
    env::{get_env_var_opt, parse_env_var},
};
use tracing::debug;

use crate::models::market::DEFAULT_MARKET;

pub const HOME_ENV: &str = "MARKET_DATA_HOME";
pub const MARKET_ENV: &str = "DOWNLOAD_MARKET";
pub const HTTP_TIMEOUT_ENV: &str = "MARKET_DATA_HTTP_TIMEOUT_SECS";
const CONFIG_FILE: &str = "config.toml";
const HOME_DIR_NAME: &str = ".market_data";

/// Limits applied to the paginated crypto fetch.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CryptoSettings {
    /// Candles requested per page.
    pub page_limit: usize,
    /// Upper bound on page requests for one download.
    pub max_iterations: usize,
    /// Client-side request rate per exchange.
    pub requests_per_second: u32,
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            page_limit: 1000,
            max_iterations: 1000,
            requests_per_second: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application home; datasets live under `<home>/downloads/datasets`.
    pub home: PathBuf,
    pub default_market: String,
    pub http_timeout_secs: u64,
    pub crypto: CryptoSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(HOME_DIR_NAME);
        Self {
            home,
            default_market: DEFAULT_MARKET.to_string(),
            http_timeout_secs: 20,
            crypto: CryptoSettings::default(),
        }
    }
}

impl Settings {
    /// Loads settings from `config_path` (or `<home>/config.toml` when it
    /// exists) and applies environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_home = get_env_var_opt(HOME_ENV).map(PathBuf::from);

        let file = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let home = match &env_home {
                    Some(home) => home.clone(),
                    None => default_home()?,
                };
                let candidate = home.join(CONFIG_FILE);
                candidate.is_file().then_some(candidate)
            }
        };

        let mut settings = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(home) = env_home {
            settings.home = home;
        }
        if let Some(market) = get_env_var_opt(MARKET_ENV) {
            settings.default_market = market;
        }
        if let Some(timeout) = parse_env_var::<u64>(HTTP_TIMEOUT_ENV)? {
            settings.http_timeout_secs = timeout;
        }

        settings.validate()?;
        debug!(
            home = %settings.home.display(),
            market = %settings.default_market,
            "settings loaded"
        );
        Ok(settings)
    }

    /// Parses a TOML settings file; absent keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })
    }

    /// Settings rooted at `home`, everything else default. Handy for tests
    /// and embedding.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.home.join("downloads").join("datasets")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("http_timeout_secs", self.http_timeout_secs as usize),
            ("crypto.page_limit", self.crypto.page_limit),
            ("crypto.max_iterations", self.crypto.max_iterations),
            ("crypto.requests_per_second", self.crypto.requests_per_second as usize),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn default_home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(HOME_DIR_NAME))
        .ok_or_else(|| ConfigError::NoHomeDir(HOME_ENV.to_string()))
}
