//! Error types shared by the risk engine crates.
//!
//! Trade rejections are not errors; they are decision values. These types
//! cover configuration, persistence and calculation failures.

use rust_decimal::Decimal;
use thiserror::Error;

/// Structural problems in an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} must be strictly decreasing")]
    NotDecreasing(&'static str),

    #[error("{0} must be positive")]
    Negative(&'static str),

    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("{0} lower bound exceeds upper bound")]
    InvertedBand(&'static str),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
}

/// Failures raised by engine collaborators.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Strategy specification cannot produce a positive per-unit loss.
    #[error("invalid strategy specification: {reason}")]
    InvalidSpecification { reason: String },

    #[error("non-positive per-unit loss: {0}")]
    NonPositiveLoss(Decimal),

    #[error("no open position with id {0}")]
    UnknownPosition(u64),

    #[error("correlation feed error: {0}")]
    Feed(String),

    #[error("history log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history log format error: {0}")]
    Format(String),
}
