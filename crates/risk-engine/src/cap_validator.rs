//! Per-trade budget cap.
//!
//! No single trade may risk more than `risk_factor × remaining budget`.
//! The factor starts from a conservative base and adapts to recent win rate,
//! losing streaks and volatility, always inside a fixed band. Every call
//! appends an audit record; statistics are folded from that trail.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use odte_risk_core::{CapValidatorConfig, TradingDay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapReason {
    Approved,
    InsufficientBudget,
    ExceedsBudgetCap,
    InvalidParameters,
}

impl std::fmt::Display for CapReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::InsufficientBudget => write!(f, "insufficient_budget"),
            Self::ExceedsBudgetCap => write!(f, "exceeds_budget_cap"),
            Self::InvalidParameters => write!(f, "invalid_parameters"),
        }
    }
}

/// Immutable audit entry for one validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCapValidationRecord {
    pub day: TradingDay,
    pub proposed_max_loss: Decimal,
    pub per_unit_loss: Decimal,
    pub remaining_budget: Decimal,
    pub risk_factor: Decimal,
    pub allowed_risk: Decimal,
    pub approved: bool,
    pub reason: CapReason,
    /// Amount by which the proposal exceeds the cap.
    pub overage: Decimal,
    /// Largest unit count that would pass, when the cap was exceeded.
    pub suggested_units: Option<u32>,
}

/// Inputs for the adaptive risk factor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RiskFactorInputs {
    /// Share of profitable days over the lookback window.
    pub recent_win_rate: Option<f64>,
    pub loss_streak: u32,
    pub volatility: Option<f64>,
}

/// Aggregates derived from the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatistics {
    pub total: usize,
    pub approved: usize,
    pub insufficient_budget: usize,
    pub exceeds_budget_cap: usize,
    pub invalid_parameters: usize,
    pub total_overage: Decimal,
    /// Mean of `proposed / allowed` over approved records.
    pub average_utilization: Option<Decimal>,
}

impl ValidationStatistics {
    #[must_use]
    pub fn approval_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.approved as f64 / self.total as f64
    }
}

#[derive(Debug, Clone)]
pub struct CapValidator {
    config: CapValidatorConfig,
    records: Vec<BudgetCapValidationRecord>,
}

impl CapValidator {
    #[must_use]
    pub fn new(config: CapValidatorConfig) -> Self {
        Self {
            config,
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CapValidatorConfig {
        &self.config
    }

    /// Risk factor for the current conditions, clamped to the configured band.
    #[must_use]
    pub fn risk_factor(&self, inputs: &RiskFactorInputs) -> Decimal {
        let c = &self.config;
        let mut factor = c.base_risk_factor;

        if c.adaptive {
            let calm = inputs.volatility.is_some_and(|v| v < c.low_volatility);
            let winning = inputs
                .recent_win_rate
                .is_some_and(|rate| rate >= c.high_win_rate);
            if winning && calm {
                factor += c.win_rate_boost;
            }
            factor -= c.streak_penalty * Decimal::from(inputs.loss_streak);
            if inputs.volatility.is_some_and(|v| v >= c.high_volatility) {
                factor -= c.volatility_penalty;
            }
        }

        factor.clamp(c.min_risk_factor, c.max_risk_factor)
    }

    /// Gates a proposal: insufficient budget, then the cap, then input sanity.
    pub fn validate(
        &mut self,
        day: TradingDay,
        proposed_max_loss: Decimal,
        per_unit_loss: Decimal,
        remaining_budget: Decimal,
        risk_factor: Decimal,
    ) -> BudgetCapValidationRecord {
        let allowed_risk = (remaining_budget * risk_factor).max(Decimal::ZERO);

        let mut record = BudgetCapValidationRecord {
            day,
            proposed_max_loss,
            per_unit_loss,
            remaining_budget,
            risk_factor,
            allowed_risk,
            approved: false,
            reason: CapReason::Approved,
            overage: Decimal::ZERO,
            suggested_units: None,
        };

        if remaining_budget < self.config.min_remaining_budget {
            record.reason = CapReason::InsufficientBudget;
        } else if proposed_max_loss > allowed_risk {
            record.reason = CapReason::ExceedsBudgetCap;
            record.overage = proposed_max_loss - allowed_risk;
            record.suggested_units = Some(if per_unit_loss > Decimal::ZERO {
                (allowed_risk / per_unit_loss).floor().to_u32().unwrap_or(0)
            } else {
                0
            });
        } else if proposed_max_loss <= Decimal::ZERO
            || per_unit_loss <= Decimal::ZERO
            || remaining_budget <= Decimal::ZERO
        {
            record.reason = CapReason::InvalidParameters;
        } else {
            record.approved = true;
        }

        if record.approved {
            debug!(
                %day,
                proposed = %proposed_max_loss,
                allowed = %allowed_risk,
                "Budget cap passed"
            );
        } else {
            warn!(
                %day,
                reason = %record.reason,
                proposed = %proposed_max_loss,
                allowed = %allowed_risk,
                overage = %record.overage,
                suggested_units = ?record.suggested_units,
                "Budget cap rejected trade"
            );
        }

        self.records.push(record.clone());
        record
    }

    #[must_use]
    pub fn records(&self) -> &[BudgetCapValidationRecord] {
        &self.records
    }

    /// Drops records for days before `cutoff`. Later records are untouched.
    pub fn prune_before(&mut self, cutoff: TradingDay) {
        let before = self.records.len();
        self.records.retain(|r| r.day >= cutoff);
        let dropped = before - self.records.len();
        if dropped > 0 {
            debug!(%cutoff, dropped, kept = self.records.len(), "Pruned cap audit records");
        }
    }

    pub fn records_for(&self, day: TradingDay) -> impl Iterator<Item = &BudgetCapValidationRecord> {
        self.records.iter().filter(move |r| r.day == day)
    }

    #[must_use]
    pub fn statistics(&self) -> ValidationStatistics {
        let mut stats = self
            .records
            .iter()
            .fold(ValidationStatistics::default(), |mut acc, r| {
                acc.total += 1;
                match r.reason {
                    CapReason::Approved => acc.approved += 1,
                    CapReason::InsufficientBudget => acc.insufficient_budget += 1,
                    CapReason::ExceedsBudgetCap => acc.exceeds_budget_cap += 1,
                    CapReason::InvalidParameters => acc.invalid_parameters += 1,
                }
                acc.total_overage += r.overage;
                acc
            });

        let utilizations: Vec<Decimal> = self
            .records
            .iter()
            .filter(|r| r.approved && r.allowed_risk > Decimal::ZERO)
            .map(|r| r.proposed_max_loss / r.allowed_risk)
            .collect();
        if !utilizations.is_empty() {
            let sum: Decimal = utilizations.iter().copied().sum();
            stats.average_utilization = Some(sum / Decimal::from(utilizations.len()));
        }
        stats
    }
}
