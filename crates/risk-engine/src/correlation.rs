//! Correlation-weighted portfolio exposure.
//!
//! Each open position's loss-at-risk, as a fraction of a reference cap, is
//! weighted by the larger of its benchmark beta and its strongest pairwise
//! correlation to another held position. The total is recomputed from the
//! full position set on every call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use odte_risk_core::{CorrelationConfig, CorrelationSource};

const MAX_SEARCH_STEPS: u32 = 64;

// =============================================================================
// Cache
// =============================================================================

/// Unordered symbol pair. `(A, B)` and `(B, A)` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolPair(String, String);

impl SymbolPair {
    #[must_use]
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }

    #[must_use]
    pub fn first(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn second(&self) -> &str {
        &self.1
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedValue {
    value: f64,
    fetched_at: DateTime<Utc>,
}

/// Beta and correlation values with time-based invalidation.
///
/// Expired values are not served as fresh but are kept as a last resort
/// when no fresh source is available.
#[derive(Debug, Clone)]
pub struct CorrelationCache {
    ttl: Duration,
    betas: HashMap<String, CachedValue>,
    pairs: HashMap<SymbolPair, CachedValue>,
}

impl CorrelationCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            betas: HashMap::new(),
            pairs: HashMap::new(),
        }
    }

    fn is_fresh(&self, cached: &CachedValue, now: DateTime<Utc>) -> bool {
        now - cached.fetched_at < self.ttl
    }

    #[must_use]
    pub fn fresh_beta(&self, symbol: &str, now: DateTime<Utc>) -> Option<f64> {
        self.betas
            .get(symbol)
            .filter(|c| self.is_fresh(c, now))
            .map(|c| c.value)
    }

    #[must_use]
    pub fn fresh_correlation(&self, pair: &SymbolPair, now: DateTime<Utc>) -> Option<f64> {
        self.pairs
            .get(pair)
            .filter(|c| self.is_fresh(c, now))
            .map(|c| c.value)
    }

    /// Last known beta regardless of age.
    #[must_use]
    pub fn last_beta(&self, symbol: &str) -> Option<f64> {
        self.betas.get(symbol).map(|c| c.value)
    }

    /// Last known correlation regardless of age.
    #[must_use]
    pub fn last_correlation(&self, pair: &SymbolPair) -> Option<f64> {
        self.pairs.get(pair).map(|c| c.value)
    }

    pub fn store_beta(&mut self, symbol: &str, value: f64, now: DateTime<Utc>) {
        if value.is_finite() {
            self.betas.insert(
                symbol.to_string(),
                CachedValue {
                    value,
                    fetched_at: now,
                },
            );
        }
    }

    pub fn store_correlation(&mut self, pair: SymbolPair, value: f64, now: DateTime<Utc>) {
        if value.is_finite() {
            self.pairs.insert(
                pair,
                CachedValue {
                    value: value.clamp(-1.0, 1.0),
                    fetched_at: now,
                },
            );
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.betas.len() + self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Static source
// =============================================================================

/// In-memory beta/correlation table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCorrelations {
    #[serde(default)]
    betas: HashMap<String, f64>,
    #[serde(default)]
    pairs: Vec<(String, String, f64)>,
}

impl StaticCorrelations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_beta(mut self, symbol: &str, beta: f64) -> Self {
        self.betas.insert(symbol.to_string(), beta);
        self
    }

    #[must_use]
    pub fn with_correlation(mut self, a: &str, b: &str, correlation: f64) -> Self {
        self.pairs.push((a.to_string(), b.to_string(), correlation));
        self
    }
}

impl CorrelationSource for StaticCorrelations {
    fn beta(&self, symbol: &str) -> Option<f64> {
        self.betas.get(symbol).copied()
    }

    fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        let key = SymbolPair::new(a, b);
        self.pairs
            .iter()
            .rev()
            .find(|(x, y, _)| SymbolPair::new(x, y) == key)
            .map(|(_, _, c)| *c)
    }
}

// =============================================================================
// Exposure
// =============================================================================

/// One contributor to portfolio exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureItem {
    pub symbol: String,
    pub max_loss: Decimal,
    /// Overrides the looked-up beta when present.
    pub beta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedExposure {
    pub symbol: String,
    pub exposure_fraction: f64,
    pub correlation_weight: f64,
    pub weighted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureReport {
    pub items: Vec<WeightedExposure>,
    pub total: f64,
}

/// Outcome of checking a new position against the ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExposureCheck {
    Approved {
        total_before: f64,
        total_after: f64,
        headroom: f64,
    },
    Rejected {
        total_before: f64,
        total_after: f64,
        ceiling: f64,
    },
}

impl ExposureCheck {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

/// Result of the size search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeSearch {
    /// Largest continuous size found within precision.
    pub size: f64,
    /// `size` floored to whole units, never above the search bound.
    pub units: u32,
    pub iterations: u32,
}

pub struct CorrelationBudget {
    config: CorrelationConfig,
    cache: CorrelationCache,
    source: Arc<dyn CorrelationSource>,
}

impl std::fmt::Debug for CorrelationBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationBudget")
            .field("config", &self.config)
            .field("cached_values", &self.cache.len())
            .finish()
    }
}

impl CorrelationBudget {
    #[must_use]
    pub fn new(config: CorrelationConfig, source: Arc<dyn CorrelationSource>) -> Self {
        let secs = i64::try_from(config.cache_ttl_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        let ttl = Duration::seconds(secs);
        Self {
            config,
            cache: CorrelationCache::new(ttl),
            source,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &CorrelationCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CorrelationCache {
        &mut self.cache
    }

    /// Beta from fresh cache, then the source, then stale cache, then the default.
    pub fn beta(&mut self, symbol: &str, now: DateTime<Utc>) -> f64 {
        if let Some(beta) = self.cache.fresh_beta(symbol, now) {
            return beta;
        }
        if let Some(beta) = self.source.beta(symbol).filter(|b| b.is_finite()) {
            self.cache.store_beta(symbol, beta, now);
            return beta;
        }
        if let Some(stale) = self.cache.last_beta(symbol) {
            warn!(symbol, beta = stale, "Using stale beta");
            return stale;
        }
        self.config.default_beta
    }

    /// Correlation lookup with the same fallback order as [`beta`](Self::beta).
    pub fn correlation(&mut self, a: &str, b: &str, now: DateTime<Utc>) -> f64 {
        if a == b {
            return 1.0;
        }
        let pair = SymbolPair::new(a, b);
        if let Some(c) = self.cache.fresh_correlation(&pair, now) {
            return c;
        }
        if let Some(c) = self.source.correlation(a, b).filter(|c| c.is_finite()) {
            self.cache.store_correlation(pair, c, now);
            return c.clamp(-1.0, 1.0);
        }
        if let Some(stale) = self.cache.last_correlation(&pair) {
            warn!(a, b, correlation = stale, "Using stale correlation");
            return stale;
        }
        self.config.default_correlation
    }

    fn weights(&mut self, items: &[ExposureItem], now: DateTime<Utc>) -> Vec<f64> {
        let mut weights = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let beta = item.beta.unwrap_or_else(|| self.beta(&item.symbol, now));
            let mut weight = beta.abs();
            for (j, other) in items.iter().enumerate() {
                if i != j {
                    weight = weight.max(self.correlation(&item.symbol, &other.symbol, now).abs());
                }
            }
            weights.push(weight);
        }
        weights
    }

    /// Total correlation-weighted exposure of `items` against `reference_cap`.
    pub fn total_exposure(
        &mut self,
        items: &[ExposureItem],
        reference_cap: Decimal,
        now: DateTime<Utc>,
    ) -> ExposureReport {
        let weights = self.weights(items, now);
        let items: Vec<WeightedExposure> = items
            .iter()
            .zip(weights)
            .map(|(item, weight)| {
                let fraction = exposure_fraction(item.max_loss, reference_cap);
                WeightedExposure {
                    symbol: item.symbol.clone(),
                    exposure_fraction: fraction,
                    correlation_weight: weight,
                    weighted: fraction * weight,
                }
            })
            .collect();
        let total = items.iter().map(|i| i.weighted).sum();
        ExposureReport { items, total }
    }

    /// Rejects `candidate` if adding it would push exposure above the ceiling.
    pub fn check(
        &mut self,
        open: &[ExposureItem],
        candidate: &ExposureItem,
        reference_cap: Decimal,
        now: DateTime<Utc>,
    ) -> ExposureCheck {
        let total_before = self.total_exposure(open, reference_cap, now).total;
        let mut combined = open.to_vec();
        combined.push(candidate.clone());
        let total_after = self.total_exposure(&combined, reference_cap, now).total;

        if total_after > self.config.ceiling {
            warn!(
                symbol = %candidate.symbol,
                total_before,
                total_after,
                ceiling = self.config.ceiling,
                "Correlation budget exceeded"
            );
            ExposureCheck::Rejected {
                total_before,
                total_after,
                ceiling: self.config.ceiling,
            }
        } else {
            ExposureCheck::Approved {
                total_before,
                total_after,
                headroom: self.config.ceiling - total_after,
            }
        }
    }

    /// Largest size of `symbol` at `per_unit_loss` that keeps exposure within
    /// the ceiling, searched over `[0, max_units]` to the configured precision.
    #[allow(clippy::too_many_arguments)]
    pub fn max_allowed_size(
        &mut self,
        open: &[ExposureItem],
        symbol: &str,
        beta: Option<f64>,
        per_unit_loss: Decimal,
        max_units: u32,
        reference_cap: Decimal,
        now: DateTime<Utc>,
    ) -> SizeSearch {
        let mut combined = open.to_vec();
        combined.push(ExposureItem {
            symbol: symbol.to_string(),
            max_loss: per_unit_loss,
            beta,
        });
        let weights = self.weights(&combined, now);

        let base: f64 = open
            .iter()
            .zip(&weights)
            .map(|(item, w)| exposure_fraction(item.max_loss, reference_cap) * w)
            .sum();
        let unit_exposure = exposure_fraction(per_unit_loss, reference_cap)
            * weights.last().copied().unwrap_or(self.config.default_correlation);
        let ceiling = self.config.ceiling;
        let fits = |size: f64| base + unit_exposure * size <= ceiling;

        let upper = f64::from(max_units);
        if !fits(0.0) || !unit_exposure.is_finite() {
            return SizeSearch {
                size: 0.0,
                units: 0,
                iterations: 0,
            };
        }
        if fits(upper) {
            return SizeSearch {
                size: upper,
                units: max_units,
                iterations: 0,
            };
        }

        let (mut lo, mut hi) = (0.0_f64, upper);
        let mut iterations = 0;
        while hi - lo > self.config.search_precision && iterations < MAX_SEARCH_STEPS {
            let mid = (lo + hi) / 2.0;
            if fits(mid) {
                lo = mid;
            } else {
                hi = mid;
            }
            iterations += 1;
        }

        let mut units = lo.floor().clamp(0.0, upper) as u32;
        if units < max_units && fits(f64::from(units + 1)) {
            units += 1;
        }

        debug!(symbol, size = lo, units, iterations, base, "Correlation size search");

        SizeSearch {
            size: lo,
            units,
            iterations,
        }
    }
}

fn exposure_fraction(max_loss: Decimal, reference_cap: Decimal) -> f64 {
    if reference_cap <= Decimal::ZERO {
        return f64::INFINITY;
    }
    (max_loss.max(Decimal::ZERO) / reference_cap)
        .to_f64()
        .unwrap_or(f64::INFINITY)
}
