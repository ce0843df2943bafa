//! Rate source traits and implementations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cashbook_common::Currency;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{FxError, FxResult};

/// Rates keyed by currency, in units of currency per pivot unit.
pub type RateMap = HashMap<Currency, f64>;

/// Where fresh exchange rates come from.
///
/// Implementations own their transport and timeouts. Codes missing from
/// the returned map simply keep their previous value.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Fetch the latest rates for `codes` against `pivot`.
    async fn fetch_rates(&self, pivot: &Currency, codes: &[Currency]) -> FxResult<RateMap>;
}

fn select(rates: &RateMap, codes: &[Currency]) -> RateMap {
    codes
        .iter()
        .filter_map(|code| rates.get(code).map(|rate| (code.clone(), *rate)))
        .collect()
}

fn check_pivot(source: &str, expected: &Currency, actual: &Currency) -> FxResult<()> {
    if expected != actual {
        return Err(FxError::source_failed(
            source,
            format!("quoted against {}, expected {}", actual, expected),
        ));
    }
    Ok(())
}

/// Fixed rates, for offline setups.
#[derive(Debug, Clone)]
pub struct StaticRateSource {
    pivot: Currency,
    rates: RateMap,
}

impl StaticRateSource {
    pub fn new(pivot: Currency, rates: impl IntoIterator<Item = (Currency, f64)>) -> Self {
        Self {
            pivot,
            rates: rates.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    fn name(&self) -> &str {
        "STATIC"
    }

    async fn fetch_rates(&self, pivot: &Currency, codes: &[Currency]) -> FxResult<RateMap> {
        check_pivot(self.name(), pivot, &self.pivot)?;
        Ok(select(&self.rates, codes))
    }
}

/// JSON document read by [`FileRateSource`].
///
/// ```json
/// { "base": "USD", "rates": { "SYP": 15000, "TRY": 32 } }
/// ```
#[derive(Debug, Deserialize)]
struct RateFeed {
    base: Option<Currency>,
    rates: RateMap,
}

/// Reads rates from a JSON feed file on every fetch.
///
/// Lets an operator or an external job drop fresh rates on disk.
#[derive(Debug, Clone)]
pub struct FileRateSource {
    path: PathBuf,
}

impl FileRateSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RateSource for FileRateSource {
    fn name(&self) -> &str {
        "FILE"
    }

    async fn fetch_rates(&self, pivot: &Currency, codes: &[Currency]) -> FxResult<RateMap> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| FxError::source_failed(self.name(), e))?;
        let feed: RateFeed =
            serde_json::from_str(&raw).map_err(|e| FxError::source_failed(self.name(), e))?;

        if let Some(base) = &feed.base {
            check_pivot(self.name(), pivot, base)?;
        }

        debug!(path = %self.path.display(), count = feed.rates.len(), "Read rate feed");
        Ok(select(&feed.rates, codes))
    }
}

/// Queries several sources and takes the median rate per currency.
pub struct AggregatedRateSource {
    sources: Vec<Arc<dyn RateSource>>,
    min_sources: usize,
    max_deviation_bps: u32,
}

impl AggregatedRateSource {
    /// Create a new aggregated source.
    pub fn new(sources: Vec<Arc<dyn RateSource>>) -> Self {
        Self {
            sources,
            min_sources: 1,
            max_deviation_bps: 500, // 5% max deviation
        }
    }

    /// Set minimum number of sources that must answer.
    pub fn with_min_sources(mut self, min: usize) -> Self {
        self.min_sources = min.max(1);
        self
    }

    /// Set maximum allowed deviation between sources in basis points.
    pub fn with_max_deviation(mut self, bps: u32) -> Self {
        self.max_deviation_bps = bps;
        self
    }

    fn median(values: &mut [f64]) -> f64 {
        values.sort_by(|a, b| a.total_cmp(b));
        let mid = values.len() / 2;

        if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        }
    }

    fn check_deviation(&self, currency: &Currency, values: &[f64]) -> FxResult<()> {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let deviation_bps = ((max - min) / min * 10_000.0).round() as u32;
        if deviation_bps > self.max_deviation_bps {
            return Err(FxError::RateDeviation {
                currency: currency.clone(),
                deviation_bps,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl RateSource for AggregatedRateSource {
    fn name(&self) -> &str {
        "AGGREGATED"
    }

    async fn fetch_rates(&self, pivot: &Currency, codes: &[Currency]) -> FxResult<RateMap> {
        let mut samples: HashMap<Currency, Vec<f64>> = HashMap::new();
        let mut answered = 0;

        for source in &self.sources {
            match source.fetch_rates(pivot, codes).await {
                Ok(rates) => {
                    debug!(source = source.name(), count = rates.len(), "Got rates from source");
                    answered += 1;
                    for (currency, rate) in rates {
                        if rate.is_finite() && rate > 0.0 {
                            samples.entry(currency).or_default().push(rate);
                        } else {
                            warn!(
                                source = source.name(),
                                currency = %currency,
                                rate,
                                "Discarding invalid rate"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Rate source failed");
                }
            }
        }

        if answered < self.min_sources {
            return Err(FxError::NoSourcesAvailable {
                available: answered,
                required: self.min_sources,
            });
        }

        let mut result = RateMap::new();
        for (currency, mut values) in samples {
            if values.len() < self.min_sources {
                debug!(currency = %currency, quotes = values.len(), "Too few quotes, skipping");
                continue;
            }
            self.check_deviation(&currency, &values)?;
            result.insert(currency, Self::median(&mut values));
        }

        Ok(result)
    }
}

/// Scriptable rate source for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    name: String,
    rates: dashmap::DashMap<Currency, f64>,
    failing: std::sync::atomic::AtomicBool,
    fetches: std::sync::atomic::AtomicUsize,
    delay: Option<std::time::Duration>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a new mock source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
            failing: std::sync::atomic::AtomicBool::new(false),
            fetches: std::sync::atomic::AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set the rate returned for a currency.
    pub fn set_rate(&self, currency: Currency, rate: f64) {
        self.rates.insert(currency, rate);
    }

    /// Make every subsequent fetch fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rates(&self, _pivot: &Currency, codes: &[Currency]) -> FxResult<RateMap> {
        use std::sync::atomic::Ordering;

        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(FxError::source_failed(&self.name, "simulated outage"));
        }

        Ok(codes
            .iter()
            .filter_map(|code| self.rates.get(code).map(|r| (code.clone(), *r)))
            .collect())
    }
}
