//! Error types shared by the Cashbook crates.

use thiserror::Error;

/// Errors raised while parsing common value types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Not a three-letter currency code.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrencyCode(String),

    /// Not a `BASE_TO_QUOTE` rate key.
    #[error("Invalid rate key: {0:?}")]
    InvalidRateKey(String),
}
