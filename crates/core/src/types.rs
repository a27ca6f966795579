//! Shared domain types consumed and produced by the risk engine.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Calendar date partitioning all budget state. Time of day is irrelevant.
pub type TradingDay = NaiveDate;

/// Defined-risk option structures the engine can size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    PutCreditSpread,
    CallCreditSpread,
    IronCondor,
    IronButterfly,
}

impl std::fmt::Display for StructureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PutCreditSpread => write!(f, "put_credit_spread"),
            Self::CallCreditSpread => write!(f, "call_credit_spread"),
            Self::IronCondor => write!(f, "iron_condor"),
            Self::IronButterfly => write!(f, "iron_butterfly"),
        }
    }
}

/// Immutable description of a proposed structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpecification {
    pub structure: StructureType,
    /// Strike distance of the widest wing, in points.
    pub width: Decimal,
    /// Net credit received per share.
    pub net_credit: Decimal,
    /// Shares per contract.
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
}

fn default_multiplier() -> Decimal {
    Decimal::ONE_HUNDRED
}

impl StrategySpecification {
    #[must_use]
    pub fn new(structure: StructureType, width: Decimal, net_credit: Decimal) -> Self {
        Self {
            structure,
            width,
            net_credit,
            multiplier: default_multiplier(),
        }
    }

    /// Same structure at a narrower width, with the credit scaled by the same ratio.
    ///
    /// Returns `None` when the structure is already at or below `min_width`.
    #[must_use]
    pub fn narrowed_to(&self, min_width: Decimal) -> Option<Self> {
        if self.width <= min_width || self.width <= Decimal::ZERO || min_width <= Decimal::ZERO {
            return None;
        }
        Some(Self {
            structure: self.structure,
            width: min_width,
            net_credit: self.net_credit * min_width / self.width,
            multiplier: self.multiplier,
        })
    }
}

/// Broad market state label produced by an external classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Calm,
    Mixed,
    Convex,
}

/// Market conditions snapshot. Only the adaptive paths read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    /// Volatility index level (VIX-like).
    pub volatility: f64,
    pub implied_volatility: f64,
    /// Trend strength in `[-1, 1]`.
    pub trend_score: f64,
    #[serde(default)]
    pub regime: Option<MarketRegime>,
}

/// Realized result of a closed trade, fed back after each close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub day: TradingDay,
    pub pnl: Decimal,
}

impl TradeOutcome {
    #[must_use]
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}
