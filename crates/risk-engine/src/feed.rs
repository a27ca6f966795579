//! Timeout-bounded refresh of correlation data from a network feed.
//!
//! Fetches run concurrently outside any engine lock. Each one is bounded by
//! `tokio::time::timeout`; a failed or slow fetch leaves the previously
//! cached value in place so sizing never waits on the network.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use odte_risk_core::CorrelationFeed;

use crate::correlation::{CorrelationCache, SymbolPair};

/// A fetch that produced no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub key: String,
    pub reason: String,
}

/// Values gathered by one refresh round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSnapshot {
    pub betas: Vec<(String, f64)>,
    pub pairs: Vec<(SymbolPair, f64)>,
    pub failures: Vec<FetchFailure>,
}

impl CorrelationSnapshot {
    /// Stores every fetched value in `cache`. Failed keys keep their old entry.
    pub fn apply_to(&self, cache: &mut CorrelationCache, now: DateTime<Utc>) -> usize {
        for (symbol, beta) in &self.betas {
            cache.store_beta(symbol, *beta, now);
        }
        for (pair, correlation) in &self.pairs {
            cache.store_correlation(pair.clone(), *correlation, now);
        }
        if !self.failures.is_empty() {
            warn!(
                failed = self.failures.len(),
                "Correlation refresh incomplete, keeping last cached values"
            );
        }
        self.betas.len() + self.pairs.len()
    }
}

/// Fetches betas for `symbols` and correlations for every pair among them.
pub async fn fetch_correlations(
    feed: &dyn CorrelationFeed,
    symbols: &[String],
    timeout: Duration,
) -> CorrelationSnapshot {
    let mut pairs = Vec::new();
    for (i, a) in symbols.iter().enumerate() {
        for b in &symbols[i + 1..] {
            if a != b {
                pairs.push(SymbolPair::new(a, b));
            }
        }
    }
    pairs.sort();
    pairs.dedup();

    let beta_results = join_all(symbols.iter().map(|symbol| async move {
        let result = tokio::time::timeout(timeout, feed.fetch_beta(symbol)).await;
        (symbol.clone(), result)
    }))
    .await;

    let pair_results = join_all(pairs.into_iter().map(|pair| async move {
        let result = tokio::time::timeout(
            timeout,
            feed.fetch_correlation(pair.first(), pair.second()),
        )
        .await;
        (pair, result)
    }))
    .await;

    let mut snapshot = CorrelationSnapshot::default();

    for (symbol, result) in beta_results {
        match result {
            Ok(Ok(beta)) => snapshot.betas.push((symbol, beta)),
            Ok(Err(e)) => snapshot.failures.push(FetchFailure {
                key: symbol,
                reason: e.to_string(),
            }),
            Err(_) => snapshot.failures.push(FetchFailure {
                key: symbol,
                reason: format!("timed out after {}ms", timeout.as_millis()),
            }),
        }
    }

    for (pair, result) in pair_results {
        let key = format!("{}/{}", pair.first(), pair.second());
        match result {
            Ok(Ok(correlation)) => snapshot.pairs.push((pair, correlation)),
            Ok(Err(e)) => snapshot.failures.push(FetchFailure {
                key,
                reason: e.to_string(),
            }),
            Err(_) => snapshot.failures.push(FetchFailure {
                key,
                reason: format!("timed out after {}ms", timeout.as_millis()),
            }),
        }
    }

    info!(
        betas = snapshot.betas.len(),
        pairs = snapshot.pairs.len(),
        failures = snapshot.failures.len(),
        "Correlation refresh finished"
    );

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use odte_risk_core::RiskError;

    struct SlowFeed;

    #[async_trait]
    impl CorrelationFeed for SlowFeed {
        async fn fetch_beta(&self, symbol: &str) -> Result<f64, RiskError> {
            if symbol == "SLOW" {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if symbol == "DOWN" {
                return Err(RiskError::Feed("503 from upstream".to_string()));
            }
            Ok(1.1)
        }

        async fn fetch_correlation(&self, a: &str, b: &str) -> Result<f64, RiskError> {
            if a == "SLOW" || b == "SLOW" {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(0.75)
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_all_betas_and_pairs() {
        let snapshot = fetch_correlations(
            &SlowFeed,
            &symbols(&["SPY", "QQQ", "IWM"]),
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(snapshot.betas.len(), 3);
        assert_eq!(snapshot.pairs.len(), 3);
        assert!(snapshot.failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_and_failing_fetches_are_reported() {
        let snapshot = fetch_correlations(
            &SlowFeed,
            &symbols(&["SPY", "SLOW", "DOWN"]),
            Duration::from_millis(500),
        )
        .await;

        let failed: Vec<&str> = snapshot.failures.iter().map(|f| f.key.as_str()).collect();
        assert!(failed.contains(&"SLOW"));
        assert!(failed.contains(&"DOWN"));
        assert!(snapshot
            .failures
            .iter()
            .any(|f| f.reason.contains("timed out")));
        assert_eq!(snapshot.betas, vec![("SPY".to_string(), 1.1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_stale_cache_entry() {
        let t0 = Utc::now();
        let mut cache = CorrelationCache::new(chrono::Duration::hours(4));
        cache.store_beta("SLOW", 0.8, t0);

        let snapshot =
            fetch_correlations(&SlowFeed, &symbols(&["SLOW"]), Duration::from_millis(100)).await;
        let stored = snapshot.apply_to(&mut cache, t0 + chrono::Duration::hours(6));

        assert_eq!(stored, 0);
        assert_eq!(cache.last_beta("SLOW"), Some(0.8));
        assert_eq!(cache.fresh_beta("SLOW", t0 + chrono::Duration::hours(6)), None);
    }
}
