//! In-memory exchange-rate table against a pivot currency.

use std::collections::BTreeMap;
use std::time::Duration;

use cashbook_common::{is_older_than, now, Currency, CurrencyPair, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::FxConfig;
use crate::error::{FxError, FxResult};

/// Serialized form of a [`RateTable`].
///
/// Every field is optional on the way in so a partial or older record
/// still loads; absent parts keep whatever the table already holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateSnapshot {
    /// `CODE_TO_PIVOT` -> units of CODE per pivot unit.
    pub rates: BTreeMap<String, f64>,
    pub last_update: Option<Timestamp>,
    pub auto_update: Option<bool>,
}

/// Current exchange rates, all quoted against one pivot currency.
///
/// The set of supported currencies is fixed at construction; only the
/// values, the last update time and the auto-update flag change.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    pivot: Currency,
    rates: BTreeMap<Currency, f64>,
    last_update: Option<Timestamp>,
    auto_update: bool,
}

fn is_valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

impl RateTable {
    /// Create a table from default rates.
    ///
    /// Entries for the pivot itself and non-positive values are dropped.
    pub fn new(pivot: Currency, defaults: impl IntoIterator<Item = (Currency, f64)>) -> Self {
        let mut rates = BTreeMap::new();
        for (currency, rate) in defaults {
            if currency == pivot || !is_valid_rate(rate) {
                warn!(currency = %currency, rate, "Dropping invalid default rate");
                continue;
            }
            rates.insert(currency, rate);
        }

        Self {
            pivot,
            rates,
            last_update: None,
            auto_update: true,
        }
    }

    /// Create the default table described by `config`.
    pub fn from_config(config: &FxConfig) -> Self {
        Self::new(config.pivot.clone(), config.default_rates.clone())
    }

    pub fn pivot(&self) -> &Currency {
        &self.pivot
    }

    /// Rate of `code` against the pivot.
    ///
    /// The pivot is `1.0`. Unknown currencies also read as `1.0` so
    /// display code never has to handle a failure.
    pub fn get(&self, code: &Currency) -> f64 {
        match self.try_get(code) {
            Some(rate) => rate,
            None => {
                debug!(currency = %code, "Unknown currency, using identity rate");
                1.0
            }
        }
    }

    /// Like [`RateTable::get`] but `None` for unknown currencies.
    pub fn try_get(&self, code: &Currency) -> Option<f64> {
        if *code == self.pivot {
            return Some(1.0);
        }
        self.rates.get(code).copied()
    }

    /// Whether `code` is the pivot or a supported currency.
    pub fn contains(&self, code: &Currency) -> bool {
        *code == self.pivot || self.rates.contains_key(code)
    }

    /// Supported non-pivot currencies.
    pub fn codes(&self) -> impl Iterator<Item = &Currency> + '_ {
        self.rates.keys()
    }

    /// Supported non-pivot currencies with their current rates.
    pub fn rates(&self) -> impl Iterator<Item = (&Currency, f64)> + '_ {
        self.rates.iter().map(|(c, r)| (c, *r))
    }

    /// Canonical key for `code`, e.g. `SYP_TO_USD`.
    pub fn rate_key(&self, code: &Currency) -> String {
        CurrencyPair::new(code.clone(), self.pivot.clone()).rate_key()
    }

    /// Replace the rate of a supported currency.
    ///
    /// Rejects non-positive or non-finite values, the pivot and unknown
    /// currencies, leaving the table unchanged. Stamps `last_update`.
    pub fn set(&mut self, code: &Currency, rate: f64) -> FxResult<()> {
        if !is_valid_rate(rate) {
            return Err(FxError::InvalidRate {
                currency: code.clone(),
                rate,
            });
        }

        let slot = self
            .rates
            .get_mut(code)
            .ok_or_else(|| FxError::UnsupportedCurrency(code.clone()))?;
        *slot = rate;
        self.last_update = Some(now());

        Ok(())
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        self.last_update
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    pub fn set_auto_update(&mut self, enabled: bool) {
        self.auto_update = enabled;
    }

    /// True if never updated or last updated more than `max_age` ago.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        is_older_than(self.last_update, max_age)
    }

    /// Serialize the whole table.
    pub fn snapshot(&self) -> RateSnapshot {
        RateSnapshot {
            rates: self
                .rates
                .iter()
                .map(|(code, rate)| (self.rate_key(code), *rate))
                .collect(),
            last_update: self.last_update,
            auto_update: Some(self.auto_update),
        }
    }

    /// Merge a snapshot onto the current values.
    ///
    /// Keys the table does not support, keys quoted against a different
    /// pivot and invalid values are skipped. Returns how many rates were
    /// taken from the snapshot.
    pub fn restore(&mut self, snapshot: &RateSnapshot) -> usize {
        let mut restored = 0;

        for (key, rate) in &snapshot.rates {
            let pair = match CurrencyPair::from_rate_key(key) {
                Ok(pair) if pair.quote == self.pivot => pair,
                _ => {
                    warn!(key = %key, "Ignoring unrecognized rate key in snapshot");
                    continue;
                }
            };

            if !is_valid_rate(*rate) {
                warn!(key = %key, rate, "Ignoring invalid rate in snapshot");
                continue;
            }

            match self.rates.get_mut(&pair.base) {
                Some(slot) => {
                    *slot = *rate;
                    restored += 1;
                }
                None => warn!(key = %key, "Ignoring unsupported currency in snapshot"),
            }
        }

        if let Some(ts) = snapshot.last_update {
            self.last_update = Some(ts);
        }
        if let Some(enabled) = snapshot.auto_update {
            self.auto_update = enabled;
        }

        restored
    }
}

impl Default for RateTable {
    fn default() -> Self {
        Self::from_config(&FxConfig::default())
    }
}
