//! FX error types.

use cashbook_common::{Currency, CurrencyPair};
use thiserror::Error;

/// Errors that can occur in the rate cache.
///
/// None of these are fatal to callers: conversions are total, a rejected
/// value leaves the table untouched, and persistence or refresh failures
/// are logged while the in-memory table stays authoritative.
#[derive(Debug, Error)]
pub enum FxError {
    /// Rate value is not a positive finite number.
    #[error("Invalid rate {rate} for {currency}")]
    InvalidRate { currency: Currency, rate: f64 },

    /// Currency is not in the fixed supported set.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(Currency),

    /// Pair does not map onto a canonical `CODE_TO_PIVOT` key.
    #[error("Unsupported pair {0}: one side must be the pivot")]
    UnsupportedPair(CurrencyPair),

    /// Durable store read or write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rate source failed (transport, timeout, bad payload).
    #[error("Rate source {source_name} failed: {message}")]
    RateSource { source_name: String, message: String },

    /// Not enough sources answered.
    #[error("Only {available} rate sources answered, {required} required")]
    NoSourcesAvailable { available: usize, required: usize },

    /// Sources disagree by more than the allowed deviation.
    #[error("Rate deviation {deviation_bps} bps exceeds threshold for {currency}")]
    RateDeviation { currency: Currency, deviation_bps: u32 },

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of [`FxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; the call was a no-op.
    Validation,
    /// Durable store failure; in-memory state unaffected.
    Persistence,
    /// Rate source failure; previous rates retained.
    Refresh,
    /// Bad configuration at startup.
    Config,
}

impl FxError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FxError::InvalidRate { .. }
            | FxError::UnsupportedCurrency(_)
            | FxError::UnsupportedPair(_) => ErrorKind::Validation,
            FxError::Persistence(_) | FxError::Serialization(_) => ErrorKind::Persistence,
            FxError::RateSource { .. }
            | FxError::NoSourcesAvailable { .. }
            | FxError::RateDeviation { .. } => ErrorKind::Refresh,
            FxError::Config(_) => ErrorKind::Config,
        }
    }

    /// Build a rate source error.
    pub fn source_failed(source_name: impl Into<String>, message: impl ToString) -> Self {
        FxError::RateSource {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for FxError {
    fn from(e: std::io::Error) -> Self {
        FxError::Persistence(e.to_string())
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let invalid = FxError::InvalidRate {
            currency: Currency::syp(),
            rate: -5.0,
        };
        assert_eq!(invalid.kind(), ErrorKind::Validation);
        assert_eq!(
            FxError::Persistence("disk full".into()).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(FxError::source_failed("feed", "timeout").kind(), ErrorKind::Refresh);
        assert_eq!(
            FxError::NoSourcesAvailable {
                available: 0,
                required: 1
            }
            .kind(),
            ErrorKind::Refresh
        );
        assert_eq!(FxError::Config("bad".into()).kind(), ErrorKind::Config);
    }

    #[test]
    fn test_io_error_is_persistence() {
        let err: FxError = std::io::Error::other("read-only").into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }
}
