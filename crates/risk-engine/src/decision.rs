//! Trade proposals and the typed decisions returned for them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use odte_risk_core::{StrategySpecification, TradingDay};

use crate::cap_validator::{BudgetCapValidationRecord, CapReason};
use crate::correlation::SizeSearch;
use crate::portfolio::PositionId;
use crate::sizer::{SizingBreakdown, SizingPath, SizingRejection};

/// Why a proposal was refused. Ordinary outcome, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    InsufficientBudget,
    ExceedsBudgetCap,
    InvalidParameters,
    ExceedsCorrelationBudget,
    ZeroEligibleUnits,
    CalculationError,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientBudget => write!(f, "insufficient_budget"),
            Self::ExceedsBudgetCap => write!(f, "exceeds_budget_cap"),
            Self::InvalidParameters => write!(f, "invalid_parameters"),
            Self::ExceedsCorrelationBudget => write!(f, "exceeds_correlation_budget"),
            Self::ZeroEligibleUnits => write!(f, "zero_eligible_units"),
            Self::CalculationError => write!(f, "calculation_error"),
        }
    }
}

impl From<SizingRejection> for RejectionReason {
    fn from(rejection: SizingRejection) -> Self {
        match rejection {
            SizingRejection::InvalidParameters => Self::InvalidParameters,
            SizingRejection::CalculationError => Self::CalculationError,
            SizingRejection::ZeroEligibleUnits => Self::ZeroEligibleUnits,
            SizingRejection::ExceedsMaximum => Self::ExceedsBudgetCap,
        }
    }
}

impl RejectionReason {
    /// Rejection for a cap outcome, `None` when the cap approved.
    #[must_use]
    pub fn from_cap(reason: CapReason) -> Option<Self> {
        match reason {
            CapReason::Approved => None,
            CapReason::InsufficientBudget => Some(Self::InsufficientBudget),
            CapReason::ExceedsBudgetCap => Some(Self::ExceedsBudgetCap),
            CapReason::InvalidParameters => Some(Self::InvalidParameters),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub symbol: String,
    pub spec: StrategySpecification,
    /// Beta to the benchmark if the caller knows it; otherwise looked up.
    #[serde(default)]
    pub beta: Option<f64>,
    /// Upper bound on units. `None` takes whatever sizing allows.
    #[serde(default)]
    pub requested_units: Option<u32>,
}

impl TradeProposal {
    #[must_use]
    pub fn new(symbol: impl Into<String>, spec: StrategySpecification) -> Self {
        Self {
            symbol: symbol.into(),
            spec,
            beta: None,
            requested_units: None,
        }
    }

    #[must_use]
    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = Some(beta);
        self
    }

    #[must_use]
    pub fn with_requested_units(mut self, units: u32) -> Self {
        self.requested_units = Some(units);
        self
    }
}

/// Outcome of evaluating one proposal, with every gate's evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub day: TradingDay,
    pub symbol: String,
    pub units: u32,
    pub rejection: Option<RejectionReason>,
    pub path: Option<SizingPath>,
    pub position_id: Option<PositionId>,
    /// Structure actually approved; narrowed when scale-to-fit was used.
    pub spec: StrategySpecification,
    pub per_unit_loss: Decimal,
    pub max_loss: Decimal,
    pub daily_limit: Decimal,
    /// Unreserved budget at the start of evaluation.
    pub available_budget: Decimal,
    pub notch_limit: Decimal,
    pub sizing: Option<SizingBreakdown>,
    pub correlation: Option<SizeSearch>,
    pub cap: Vec<BudgetCapValidationRecord>,
    pub message: Option<String>,
}

impl TradeDecision {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.rejection.is_none() && self.units > 0
    }
}
