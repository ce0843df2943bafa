//! Caller-facing currency service.

use std::collections::BTreeMap;
use std::sync::Arc;

use cashbook_common::{Currency, CurrencyPair, Timestamp};
use tracing::{debug, info};

use crate::config::FxConfig;
use crate::conversion::{parse_amount, Conversion, ConversionEngine};
use crate::error::{FxError, FxResult};
use crate::provider::RateSource;
use crate::scheduler::{InitSummary, RefreshOutcome, RefreshScheduler, SchedulerState};
use crate::state::RateState;
use crate::store::{KeyValueStore, RateStore};
use crate::table::RateTable;

/// The exchange-rate cache as the rest of the application sees it.
///
/// Construct one per process and call [`CurrencyService::initialize`] once
/// at startup. Conversions are synchronous and never wait on a refresh.
pub struct CurrencyService {
    rates: Arc<RateState>,
    scheduler: RefreshScheduler,
    config: FxConfig,
}

impl CurrencyService {
    /// Create a service over the given store and rate source.
    ///
    /// The table starts from the configured defaults; persisted state is
    /// only read by [`CurrencyService::initialize`].
    pub fn new(
        config: FxConfig,
        backend: Arc<dyn KeyValueStore>,
        source: Arc<dyn RateSource>,
    ) -> FxResult<Self> {
        config.validate()?;

        let store = RateStore::new(backend, config.storage_key.clone());
        let rates = Arc::new(RateState::new(RateTable::from_config(&config), store));
        let scheduler = RefreshScheduler::new(rates.clone(), source, config.refresh_interval);

        Ok(Self {
            rates,
            scheduler,
            config,
        })
    }

    /// Load persisted rates, refresh if stale, and arm auto-update if enabled.
    pub async fn initialize(&self) -> InitSummary {
        let summary = self.scheduler.initialize().await;
        info!(
            pivot = %self.config.pivot,
            restored = summary.restored,
            refreshed = summary.refresh.as_ref().is_some_and(|o| o.is_updated()),
            armed = summary.armed,
            "Currency service initialized"
        );
        summary
    }

    /// Load persisted state without refreshing or arming the timer.
    ///
    /// For short-lived callers that only read or override rates.
    pub fn restore(&self) -> bool {
        self.rates.load_persisted()
    }

    /// Convert `amount` from one currency to another via the pivot.
    ///
    /// Non-finite amounts count as zero; unknown currencies use rate 1.
    pub fn convert(&self, amount: f64, from: &Currency, to: &Currency) -> f64 {
        self.rates
            .read(|t| ConversionEngine::new(t).convert(amount, from, to))
    }

    /// [`CurrencyService::convert`] for user-entered text.
    pub fn convert_str(&self, amount: &str, from: &Currency, to: &Currency) -> f64 {
        self.convert(parse_amount(amount), from, to)
    }

    /// Multiplicative factor from `from` to `to`.
    pub fn rate_between(&self, from: &Currency, to: &Currency) -> f64 {
        self.rates
            .read(|t| ConversionEngine::new(t).rate_between(from, to))
    }

    /// Convert and return the full record.
    pub fn quote(&self, amount: f64, from: &Currency, to: &Currency) -> Conversion {
        self.rates
            .read(|t| ConversionEngine::new(t).quote(amount, from, to))
    }

    /// All stored rates by canonical key, e.g. `SYP_TO_USD`.
    pub fn get_all_rates(&self) -> BTreeMap<String, f64> {
        self.rates.read(|t| t.snapshot().rates)
    }

    /// Manually override a rate.
    ///
    /// `rate` is the value of the key `FROM_TO_TO`, i.e. units of `from`
    /// per one unit of `to`. When `to` is the pivot that key is written
    /// as is; when `from` is the pivot the inverse key `TO_TO_FROM`
    /// receives `1 / rate`. Anything else (cross pairs, unsupported or
    /// identical currencies, non-positive rates) is rejected without
    /// touching the table.
    pub fn set_exchange_rate(&self, from: &Currency, to: &Currency, rate: f64) -> FxResult<()> {
        let pair = CurrencyPair::new(from.clone(), to.clone());

        let result = self.rates.update(|table| {
            if pair.is_identity() {
                return Err(FxError::UnsupportedPair(pair.clone()));
            }

            if pair.quote == *table.pivot() {
                table.set(&pair.base, rate)
            } else if pair.base == *table.pivot() {
                if !(rate.is_finite() && rate > 0.0) {
                    return Err(FxError::InvalidRate {
                        currency: pair.quote.clone(),
                        rate,
                    });
                }
                table.set(&pair.quote, 1.0 / rate)
            } else {
                Err(FxError::UnsupportedPair(pair.clone()))
            }
        });

        match &result {
            Ok(()) => info!(key = %pair.rate_key(), rate, "Exchange rate overridden"),
            Err(e) => debug!(
                key = %pair.rate_key(),
                rate,
                error = %e,
                "Exchange rate override rejected"
            ),
        }

        result
    }

    /// Turn on periodic refresh. Returns whether the timer is armed.
    pub fn enable_auto_update(&self) -> bool {
        self.scheduler.enable_auto_update()
    }

    /// Turn off periodic refresh and cancel the timer.
    pub fn disable_auto_update(&self) {
        self.scheduler.disable_auto_update()
    }

    /// Refresh from the rate source now, regardless of staleness.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.scheduler.refresh_now().await
    }

    pub fn is_stale(&self) -> bool {
        self.scheduler.is_stale()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        self.rates.read(|t| t.last_update())
    }

    pub fn is_auto_update(&self) -> bool {
        self.rates.read(|t| t.auto_update())
    }

    pub fn pivot(&self) -> &Currency {
        &self.config.pivot
    }

    /// Pivot first, then the other supported currencies.
    pub fn supported_currencies(&self) -> Vec<Currency> {
        self.rates.read(|t| {
            std::iter::once(t.pivot().clone())
                .chain(t.codes().cloned())
                .collect()
        })
    }

    /// Copy of the current table.
    pub fn table(&self) -> RateTable {
        self.rates.table()
    }

    pub fn config(&self) -> &FxConfig {
        &self.config
    }
}
