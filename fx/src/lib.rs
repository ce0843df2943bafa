//! Cashbook FX
//!
//! Exchange-rate cache and conversion engine for the Cashbook app.
//!
//! # Features
//!
//! - Pivot-currency rate table with configured defaults
//! - Write-through persistence to a key-value store
//! - Conversions that never block on a refresh
//! - Periodic refresh from pluggable rate sources, with median aggregation
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cashbook_common::Currency;
//! use cashbook_fx::{CurrencyService, FileStore, FxConfig, StaticRateSource};
//!
//! let config = FxConfig::from_env()?;
//! let store = Arc::new(FileStore::open(&config.store_dir)?);
//! let source = Arc::new(StaticRateSource::new(Currency::usd(), [(Currency::syp(), 14800.0)]));
//!
//! let service = CurrencyService::new(config, store, source)?;
//! service.initialize().await;
//!
//! let usd = service.convert(15000.0, &Currency::syp(), &Currency::usd());
//! ```

pub mod config;
pub mod conversion;
pub mod error;
pub mod provider;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod store;
pub mod table;

pub use config::FxConfig;
pub use conversion::{parse_amount, Conversion, ConversionEngine};
pub use error::{ErrorKind, FxError, FxResult};
pub use provider::{AggregatedRateSource, FileRateSource, RateMap, RateSource, StaticRateSource};
pub use scheduler::{InitSummary, RefreshOutcome, RefreshScheduler, SchedulerState};
pub use service::CurrencyService;
pub use state::RateState;
pub use store::{FileStore, KeyValueStore, MemoryStore, RateStore};
pub use table::{RateSnapshot, RateTable};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateSource;
