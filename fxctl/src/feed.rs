//! Rate source selection for the CLI.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cashbook_common::Currency;
use cashbook_fx::{FileRateSource, FxError, FxResult, RateMap, RateSource};
use tracing::debug;

/// Stand-in when no feed file is configured. Every fetch fails, so
/// refreshes leave the table alone.
pub struct NoFeed;

#[async_trait]
impl RateSource for NoFeed {
    fn name(&self) -> &str {
        "NONE"
    }

    async fn fetch_rates(&self, _pivot: &Currency, _codes: &[Currency]) -> FxResult<RateMap> {
        Err(FxError::source_failed(self.name(), "no feed configured, set FX_FEED_PATH"))
    }
}

pub fn rate_source(feed_path: Option<&Path>) -> Arc<dyn RateSource> {
    match feed_path {
        Some(path) => {
            debug!(path = %path.display(), "Using file rate feed");
            Arc::new(FileRateSource::new(path))
        }
        None => Arc::new(NoFeed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_feed_always_fails() {
        let source = rate_source(None);

        let err = source
            .fetch_rates(&Currency::usd(), &[Currency::syp()])
            .await
            .unwrap_err();

        assert!(matches!(err, FxError::RateSource { .. }));
    }

    #[tokio::test]
    async fn test_file_feed_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, r#"{"base":"USD","rates":{"SYP":14750}}"#).unwrap();

        let rates = rate_source(Some(path.as_path()))
            .fetch_rates(&Currency::usd(), &[Currency::syp()])
            .await
            .unwrap();

        assert_eq!(rates[&Currency::syp()], 14750.0);
    }
}
