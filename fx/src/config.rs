//! Rate cache configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use cashbook_common::{constants, Currency, DurationExt};

use crate::error::{FxError, FxResult};

/// Default storage key for the persisted rate table.
pub const DEFAULT_STORAGE_KEY: &str = "exchange_rates";

/// Configuration for the currency service.
#[derive(Debug, Clone)]
pub struct FxConfig {
    /// Hub currency every conversion is routed through.
    pub pivot: Currency,
    /// Built-in rates, units of currency per one pivot unit.
    /// Also fixes the supported currency set.
    pub default_rates: BTreeMap<Currency, f64>,
    /// Age after which the table is stale; also the timer period.
    pub refresh_interval: Duration,
    /// Key the snapshot is stored under.
    pub storage_key: String,
    /// Directory for the file-backed store.
    pub store_dir: PathBuf,
    /// Optional JSON rate feed used by the file rate source.
    pub feed_path: Option<PathBuf>,
    /// Log level.
    pub log_level: String,
}

impl Default for FxConfig {
    fn default() -> Self {
        let mut default_rates = BTreeMap::new();
        default_rates.insert(Currency::syp(), 15000.0);
        default_rates.insert(Currency::new("TRY"), 32.0);

        Self {
            pivot: Currency::usd(),
            default_rates,
            refresh_interval: constants::refresh_interval().as_std(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            store_dir: PathBuf::from(".cashbook"),
            feed_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl FxConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> FxResult<Self> {
        let mut config = Self::default();

        if let Ok(pivot) = std::env::var("FX_PIVOT") {
            config.pivot = pivot
                .parse()
                .map_err(|e| FxError::Config(format!("FX_PIVOT: {}", e)))?;
        }

        if let Ok(rates) = std::env::var("FX_DEFAULT_RATES") {
            config.default_rates = parse_rate_list(&rates)?;
        }

        if let Ok(secs) = std::env::var("FX_REFRESH_INTERVAL_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| FxError::Config(format!("FX_REFRESH_INTERVAL_SECS: {:?}", secs)))?;
            config.refresh_interval = Duration::from_secs(secs);
        }

        if let Ok(key) = std::env::var("FX_STORAGE_KEY") {
            config.storage_key = key;
        }

        if let Ok(dir) = std::env::var("FX_STORE_DIR") {
            config.store_dir = PathBuf::from(dir);
        }

        if let Ok(path) = std::env::var("FX_FEED_PATH") {
            config.feed_path = Some(PathBuf::from(path));
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> FxResult<()> {
        if self.refresh_interval.is_zero() {
            return Err(FxError::Config("Refresh interval cannot be 0".to_string()));
        }

        if self.storage_key.is_empty() {
            return Err(FxError::Config("Storage key cannot be empty".to_string()));
        }

        if self.default_rates.contains_key(&self.pivot) {
            return Err(FxError::Config(format!(
                "Pivot {} cannot have a default rate",
                self.pivot
            )));
        }

        for (currency, rate) in &self.default_rates {
            if !rate.is_finite() || *rate <= 0.0 {
                return Err(FxError::Config(format!(
                    "Default rate for {} must be positive, got {}",
                    currency, rate
                )));
            }
        }

        Ok(())
    }
}

/// Parse `SYP=15000,TRY=32` into a rate map.
fn parse_rate_list(raw: &str) -> FxResult<BTreeMap<Currency, f64>> {
    let mut rates = BTreeMap::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (code, rate) = entry
            .split_once('=')
            .ok_or_else(|| FxError::Config(format!("Expected CODE=RATE, got {:?}", entry)))?;

        let currency: Currency = code
            .parse()
            .map_err(|e| FxError::Config(format!("FX_DEFAULT_RATES: {}", e)))?;
        let rate: f64 = rate
            .trim()
            .parse()
            .map_err(|_| FxError::Config(format!("Bad rate for {}: {:?}", currency, rate)))?;

        rates.insert(currency, rate);
    }

    Ok(rates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pivot, Currency::usd());
        assert_eq!(config.default_rates[&Currency::syp()], 15000.0);
        assert_eq!(config.refresh_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = FxConfig::default();
        config.refresh_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = FxConfig::default();
        config.default_rates.insert(Currency::usd(), 1.0);
        assert!(config.validate().is_err());

        let mut config = FxConfig::default();
        config.default_rates.insert(Currency::eur(), -0.9);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_rate_list() {
        let rates = parse_rate_list("syp=15000, TRY = 32 ,").unwrap();
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[&Currency::new("TRY")], 32.0);

        assert!(parse_rate_list("SYP").is_err());
        assert!(parse_rate_list("SYP=abc").is_err());
        assert!(parse_rate_list("S=1").is_err());
    }
}
