//! Currency conversion over a rate table.

use cashbook_common::{now, Currency, CurrencyPair, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::table::RateTable;

/// Coerce a raw amount: anything non-finite counts as zero.
fn coerce(amount: f64) -> f64 {
    if amount.is_finite() {
        amount
    } else {
        0.0
    }
}

/// Parse user-entered text into an amount.
///
/// Surrounding whitespace and `,` / `_` digit separators are ignored.
/// Unparsable or non-finite input yields `0.0`.
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();
    cleaned.parse::<f64>().map(coerce).unwrap_or(0.0)
}

/// Conversions computed from a borrowed [`RateTable`].
///
/// Every cross conversion goes through the pivot, so no pair of results
/// can disagree with each other. Nothing is rounded here.
#[derive(Debug, Clone, Copy)]
pub struct ConversionEngine<'a> {
    table: &'a RateTable,
}

impl<'a> ConversionEngine<'a> {
    pub fn new(table: &'a RateTable) -> Self {
        Self { table }
    }

    /// Convert `amount` of `from` into `to`.
    pub fn convert(&self, amount: f64, from: &Currency, to: &Currency) -> f64 {
        let amount = coerce(amount);
        if from == to {
            return amount;
        }

        let pivot = self.table.pivot();
        let in_pivot = if from == pivot {
            amount
        } else {
            amount / self.table.get(from)
        };

        if to == pivot {
            in_pivot
        } else {
            in_pivot * self.table.get(to)
        }
    }

    /// Factor `r` with `convert(x, from, to) == x * r`.
    pub fn rate_between(&self, from: &Currency, to: &Currency) -> f64 {
        if from == to {
            return 1.0;
        }
        self.table.get(to) / self.table.get(from)
    }

    /// Convert and keep a record of the rate used.
    pub fn quote(&self, amount: f64, from: &Currency, to: &Currency) -> Conversion {
        let input = coerce(amount);
        Conversion {
            id: Uuid::now_v7(),
            pair: CurrencyPair::new(from.clone(), to.clone()),
            input,
            output: self.convert(input, from, to),
            rate: self.rate_between(from, to),
            rates_as_of: self.table.last_update(),
            quoted_at: now(),
        }
    }
}

/// A completed conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub id: Uuid,
    pub pair: CurrencyPair,
    /// Amount in `pair.base`, after coercion.
    pub input: f64,
    /// Amount in `pair.quote`, unrounded.
    pub output: f64,
    /// Units of quote per unit of base.
    pub rate: f64,
    /// When the rates used were last refreshed, if ever.
    pub rates_as_of: Option<Timestamp>,
    pub quoted_at: Timestamp,
}

impl Conversion {
    /// Output rounded to the target currency's display precision.
    pub fn rounded_output(&self) -> f64 {
        self.pair.quote.round_amount(self.output)
    }

    /// Effective rate implied by input and output.
    pub fn effective_rate(&self) -> f64 {
        if self.input == 0.0 {
            return 0.0;
        }
        self.output / self.input
    }
}
