//! Currency codes and pairs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// Separator used in canonical rate keys such as `SYP_TO_USD`.
pub const RATE_KEY_SEPARATOR: &str = "_TO_";

/// ISO 4217 style currency code, always stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    ///
    /// The code is upper-cased but otherwise not validated; use
    /// [`str::parse`] for user input.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "IDR" => 0,
            "BHD" | "KWD" | "OMR" | "IQD" | "JOD" => 3,
            _ => 2,
        }
    }

    /// Round an amount to this currency's display precision.
    ///
    /// Conversions never round; this is for callers presenting a result.
    pub fn round_amount(&self, amount: f64) -> f64 {
        let factor = 10f64.powi(self.decimal_places() as i32);
        (amount * factor).round() / factor
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn syp() -> Self {
        Self::new("SYP")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Currency {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl FromStr for Currency {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CommonError::InvalidCurrencyCode(s.to_string()));
        }
        Ok(Self::new(code))
    }
}

/// An ordered pair of currencies, read as "base to quote".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: Currency,
    pub quote: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }

    /// Whether both sides name the same currency.
    pub fn is_identity(&self) -> bool {
        self.base == self.quote
    }

    /// Canonical storage key, e.g. `SYP_TO_USD`.
    pub fn rate_key(&self) -> String {
        format!("{}{}{}", self.base, RATE_KEY_SEPARATOR, self.quote)
    }

    /// Parse a key produced by [`CurrencyPair::rate_key`].
    pub fn from_rate_key(key: &str) -> Result<Self, CommonError> {
        let (base, quote) = key
            .split_once(RATE_KEY_SEPARATOR)
            .ok_or_else(|| CommonError::InvalidRateKey(key.to_string()))?;

        let base: Currency = base
            .parse()
            .map_err(|_| CommonError::InvalidRateKey(key.to_string()))?;
        let quote: Currency = quote
            .parse()
            .map_err(|_| CommonError::InvalidRateKey(key.to_string()))?;

        Ok(Self::new(base, quote))
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_is_uppercased() {
        assert_eq!(Currency::new("syp").code(), "SYP");
        assert_eq!(Currency::from("try"), Currency::new("TRY"));
    }

    #[test]
    fn test_currency_parse_validation() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::usd());
        assert_eq!(" eur ".parse::<Currency>().unwrap(), Currency::eur());
        assert!("US".parse::<Currency>().is_err());
        assert!("US1".parse::<Currency>().is_err());
        assert!("".parse::<Currency>().is_err());
    }

    #[test]
    fn test_currency_decimal_places() {
        assert_eq!(Currency::usd().decimal_places(), 2);
        assert_eq!(Currency::new("JPY").decimal_places(), 0);
        assert_eq!(Currency::new("KWD").decimal_places(), 3);
    }

    #[test]
    fn test_round_amount() {
        assert_eq!(Currency::usd().round_amount(1.23456), 1.23);
        assert_eq!(Currency::new("JPY").round_amount(99.6), 100.0);
        assert_eq!(Currency::new("KWD").round_amount(0.12345), 0.123);
    }

    #[test]
    fn test_rate_key_round_trip() {
        let pair = CurrencyPair::new(Currency::syp(), Currency::usd());
        assert_eq!(pair.rate_key(), "SYP_TO_USD");
        assert_eq!(CurrencyPair::from_rate_key("SYP_TO_USD").unwrap(), pair);
    }

    #[test]
    fn test_rate_key_rejects_garbage() {
        assert!(CurrencyPair::from_rate_key("SYPUSD").is_err());
        assert!(CurrencyPair::from_rate_key("SYP_TO_").is_err());
        assert!(CurrencyPair::from_rate_key("S1P_TO_USD").is_err());
    }

    #[test]
    fn test_pair_inverse() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::new("TRY"));
        assert_eq!(pair.inverse().rate_key(), "TRY_TO_USD");
        assert!(!pair.is_identity());
        assert!(CurrencyPair::new(Currency::usd(), Currency::usd()).is_identity());
    }

    #[test]
    fn test_currency_serializes_as_code() {
        let json = serde_json::to_string(&Currency::syp()).unwrap();
        assert_eq!(json, "\"SYP\"");

        let parsed: Currency = serde_json::from_str("\"syp\"").unwrap();
        assert_eq!(parsed, Currency::syp());
    }
}
