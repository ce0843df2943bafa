//! Cashbook Common Types
//!
//! Shared types used across the Cashbook currency crates: currency codes,
//! currency pairs and their canonical rate keys, and time helpers.

pub mod currency;
pub mod error;
pub mod time;

pub use currency::*;
pub use error::*;
pub use time::*;
