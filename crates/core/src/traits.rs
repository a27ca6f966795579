use crate::error::RiskError;
use crate::types::StrategySpecification;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Derives the worst-case loss of one unit of a structure.
pub trait MaxLossCalculator: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the specification cannot yield a positive loss.
    fn max_loss_per_unit(&self, spec: &StrategySpecification) -> Result<Decimal, RiskError>;
}

/// Synchronous beta/correlation lookup used during sizing.
pub trait CorrelationSource: Send + Sync {
    /// Beta of `symbol` to the benchmark, if known.
    fn beta(&self, symbol: &str) -> Option<f64>;
    /// Correlation between two symbols, if known. Order of arguments is irrelevant.
    fn correlation(&self, a: &str, b: &str) -> Option<f64>;
}

/// Network-backed correlation data. Fetches may be slow or fail.
#[async_trait]
pub trait CorrelationFeed: Send + Sync {
    async fn fetch_beta(&self, symbol: &str) -> Result<f64, RiskError>;
    async fn fetch_correlation(&self, a: &str, b: &str) -> Result<f64, RiskError>;
}
