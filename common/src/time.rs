//! Time utilities and constants for rate bookkeeping.

use chrono::{DateTime, Duration, Utc};

/// Timing constants.
pub mod constants {
    use super::Duration;

    /// How long a rate table stays fresh before a refresh is due (one hour).
    pub fn refresh_interval() -> Duration {
        Duration::hours(1)
    }
}

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// True when `timestamp` is missing or more than `max_age` in the past.
pub fn is_older_than(timestamp: Option<Timestamp>, max_age: Duration) -> bool {
    match timestamp {
        Some(ts) => now().signed_duration_since(ts) > max_age,
        None => true,
    }
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}
