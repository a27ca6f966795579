//! Integer position sizing.
//!
//! Converts the remaining budget and a structure's per-unit max loss into a
//! whole number of units. Sizing tries an ordered list of stages and stops at
//! the first that yields units:
//!
//! 1. standard: fraction of budget, floor, hard cap, safety buffer
//! 2. scale-to-fit: same arithmetic on the structure narrowed to the minimum width
//! 3. probe: exactly one unit when a unit fits the whole remaining budget
//!    and the book is flat
//!
//! A failure anywhere resolves to zero units, never to an error.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use odte_risk_core::{MarketConditions, MaxLossCalculator, SizerConfig, StrategySpecification};

use crate::max_loss::SpreadMaxLoss;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizingPath {
    Standard,
    ScaleToFit,
    Probe,
}

impl std::fmt::Display for SizingPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::ScaleToFit => write!(f, "scale_to_fit"),
            Self::Probe => write!(f, "probe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizingRejection {
    InvalidParameters,
    CalculationError,
    ZeroEligibleUnits,
    ExceedsMaximum,
}

impl std::fmt::Display for SizingRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParameters => write!(f, "invalid_parameters"),
            Self::CalculationError => write!(f, "calculation_error"),
            Self::ZeroEligibleUnits => write!(f, "zero_eligible_units"),
            Self::ExceedsMaximum => write!(f, "exceeds_maximum"),
        }
    }
}

/// Everything the sizer needs about the current state.
#[derive(Debug, Clone, Copy)]
pub struct SizingRequest<'a> {
    pub spec: &'a StrategySpecification,
    /// Unreserved budget left today.
    pub remaining_budget: Decimal,
    /// Today's total ceiling.
    pub daily_limit: Decimal,
    pub open_positions: usize,
    pub market: Option<&'a MarketConditions>,
    /// Upper bound on the sizing fraction, normally the per-trade cap's risk factor.
    pub max_fraction: Option<Decimal>,
}

/// Steps 3–6 of the pipeline for one per-unit loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSteps {
    pub derived_units: u32,
    pub capped_units: u32,
    pub buffered_units: u32,
    pub final_units: u32,
}

/// The scale-to-fit attempt, when one was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrowedAttempt {
    pub width: Decimal,
    pub per_unit_loss: Option<Decimal>,
    pub steps: UnitSteps,
}

/// Every intermediate value, for audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizingBreakdown {
    pub remaining_budget: Decimal,
    pub daily_limit: Decimal,
    pub low_cap_applied: bool,
    pub volatility_multiplier: Decimal,
    pub max_fraction: Option<Decimal>,
    pub fraction: Decimal,
    pub allowance: Decimal,
    pub per_unit_loss: Option<Decimal>,
    pub hard_cap: u32,
    pub safety_buffer: Decimal,
    pub standard: UnitSteps,
    pub narrowed: Option<NarrowedAttempt>,
    pub probe_eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    pub units: u32,
    pub is_valid: bool,
    pub path: Option<SizingPath>,
    pub rejection: Option<SizingRejection>,
    pub message: Option<String>,
    /// Structure the units refer to; narrowed when scale-to-fit was used.
    pub spec: StrategySpecification,
    /// Per-unit loss of `spec`.
    pub per_unit_loss: Decimal,
    pub breakdown: SizingBreakdown,
}

impl SizingResult {
    #[must_use]
    pub fn total_max_loss(&self) -> Decimal {
        self.per_unit_loss * Decimal::from(self.units)
    }
}

/// Outcome of checking a caller-chosen unit count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCountCheck {
    pub proposed: u32,
    pub max_allowed: u32,
    pub approved: bool,
    pub rejection: Option<SizingRejection>,
}

struct SizingContext<'a> {
    request: &'a SizingRequest<'a>,
    per_unit_loss: Decimal,
    allowance: Decimal,
}

struct SizedTrade {
    units: u32,
    spec: StrategySpecification,
    per_unit_loss: Decimal,
}

type Stage = fn(&PositionSizer, &SizingContext<'_>, &mut SizingBreakdown) -> Option<SizedTrade>;

const STAGES: [(SizingPath, Stage); 3] = [
    (SizingPath::Standard, PositionSizer::standard),
    (SizingPath::ScaleToFit, PositionSizer::scale_to_fit),
    (SizingPath::Probe, PositionSizer::probe),
];

pub struct PositionSizer {
    config: SizerConfig,
    calculator: Arc<dyn MaxLossCalculator>,
}

impl std::fmt::Debug for PositionSizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionSizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PositionSizer {
    #[must_use]
    pub fn new(config: SizerConfig, calculator: Arc<dyn MaxLossCalculator>) -> Self {
        Self { config, calculator }
    }

    /// Sizer using [`SpreadMaxLoss`].
    #[must_use]
    pub fn with_spread_calculator(config: SizerConfig) -> Self {
        Self::new(config, Arc::new(SpreadMaxLoss))
    }

    #[must_use]
    pub fn config(&self) -> &SizerConfig {
        &self.config
    }

    /// Fraction multiplier for the market snapshot.
    #[must_use]
    pub fn volatility_multiplier(&self, market: Option<&MarketConditions>) -> Decimal {
        match market.map(|m| m.volatility) {
            Some(v) if v >= self.config.extreme_volatility => dec!(0.50),
            Some(v) if v >= self.config.elevated_volatility => dec!(0.75),
            _ => Decimal::ONE,
        }
    }

    /// Share of the remaining budget this trade may use.
    #[must_use]
    pub fn fraction_for(&self, daily_limit: Decimal, market: Option<&MarketConditions>) -> Decimal {
        let base = if daily_limit < self.config.low_cap_threshold {
            self.config.low_cap_fraction
        } else {
            self.config.fraction
        };
        base * self.volatility_multiplier(market)
    }

    /// Floor, cap, buffer and minimum-one rule for one per-unit loss.
    #[must_use]
    pub fn unit_steps(&self, allowance: Decimal, per_unit_loss: Decimal) -> UnitSteps {
        if per_unit_loss <= Decimal::ZERO || allowance <= Decimal::ZERO {
            return UnitSteps::default();
        }
        let derived_units = allowance
            .checked_div(per_unit_loss)
            .map_or(u32::MAX, floor_units);
        let capped_units = derived_units.min(self.config.hard_cap);
        let buffered_units =
            floor_units(Decimal::from(capped_units) * (Decimal::ONE - self.config.safety_buffer));
        let final_units = if capped_units > 0 {
            buffered_units.max(1)
        } else {
            0
        };
        UnitSteps {
            derived_units,
            capped_units,
            buffered_units,
            final_units,
        }
    }

    pub fn size(&self, request: &SizingRequest<'_>) -> SizingResult {
        let mut fraction = self.fraction_for(request.daily_limit, request.market);
        if let Some(max) = request.max_fraction {
            fraction = fraction.min(max);
        }
        let allowance = request
            .remaining_budget
            .checked_mul(fraction)
            .unwrap_or(Decimal::ZERO)
            .max(Decimal::ZERO);

        let mut breakdown = SizingBreakdown {
            remaining_budget: request.remaining_budget,
            daily_limit: request.daily_limit,
            low_cap_applied: request.daily_limit < self.config.low_cap_threshold,
            volatility_multiplier: self.volatility_multiplier(request.market),
            max_fraction: request.max_fraction,
            fraction,
            allowance,
            per_unit_loss: None,
            hard_cap: self.config.hard_cap,
            safety_buffer: self.config.safety_buffer,
            standard: UnitSteps::default(),
            narrowed: None,
            probe_eligible: false,
        };

        if request.remaining_budget < Decimal::ZERO || request.daily_limit < Decimal::ZERO {
            return Self::rejected(
                request,
                Decimal::ZERO,
                breakdown,
                SizingRejection::InvalidParameters,
                "negative budget input".to_string(),
            );
        }

        let per_unit_loss = match self.calculator.max_loss_per_unit(request.spec) {
            Ok(loss) if loss > Decimal::ZERO => loss,
            Ok(loss) => {
                return Self::rejected(
                    request,
                    loss,
                    breakdown,
                    SizingRejection::CalculationError,
                    format!("non-positive per-unit loss {loss}"),
                );
            }
            Err(e) => {
                warn!(structure = %request.spec.structure, error = %e, "Max loss calculation failed");
                return Self::rejected(
                    request,
                    Decimal::ZERO,
                    breakdown,
                    SizingRejection::CalculationError,
                    e.to_string(),
                );
            }
        };
        breakdown.per_unit_loss = Some(per_unit_loss);

        let ctx = SizingContext {
            request,
            per_unit_loss,
            allowance,
        };

        for (path, stage) in STAGES {
            if let Some(sized) = stage(self, &ctx, &mut breakdown) {
                debug!(
                    path = %path,
                    units = sized.units,
                    per_unit_loss = %sized.per_unit_loss,
                    allowance = %allowance,
                    "Position sized"
                );
                if path != SizingPath::Standard {
                    info!(path = %path, units = sized.units, width = %sized.spec.width, "Sizing fallback used");
                }
                return SizingResult {
                    units: sized.units,
                    is_valid: true,
                    path: Some(path),
                    rejection: None,
                    message: None,
                    spec: sized.spec,
                    per_unit_loss: sized.per_unit_loss,
                    breakdown,
                };
            }
        }

        Self::rejected(
            request,
            per_unit_loss,
            breakdown,
            SizingRejection::ZeroEligibleUnits,
            format!(
                "per-unit loss {per_unit_loss} does not fit allowance {allowance} or remaining budget {}",
                request.remaining_budget
            ),
        )
    }

    /// Re-derives the maximum and rejects a proposal above it.
    pub fn validate_contract_count(
        &self,
        proposed: u32,
        request: &SizingRequest<'_>,
    ) -> ContractCountCheck {
        let sized = self.size(request);
        let max_allowed = sized.units;
        let rejection = if proposed == 0 {
            Some(SizingRejection::InvalidParameters)
        } else if !sized.is_valid {
            sized.rejection
        } else if proposed > max_allowed {
            Some(SizingRejection::ExceedsMaximum)
        } else {
            None
        };
        ContractCountCheck {
            proposed,
            max_allowed,
            approved: rejection.is_none(),
            rejection,
        }
    }

    fn standard(&self, ctx: &SizingContext<'_>, breakdown: &mut SizingBreakdown) -> Option<SizedTrade> {
        let steps = self.unit_steps(ctx.allowance, ctx.per_unit_loss);
        breakdown.standard = steps;
        (steps.final_units > 0).then(|| SizedTrade {
            units: steps.final_units,
            spec: ctx.request.spec.clone(),
            per_unit_loss: ctx.per_unit_loss,
        })
    }

    fn scale_to_fit(
        &self,
        ctx: &SizingContext<'_>,
        breakdown: &mut SizingBreakdown,
    ) -> Option<SizedTrade> {
        let min_width = self.config.min_width?;
        let narrowed = ctx.request.spec.narrowed_to(min_width)?;

        let per_unit_loss = match self.calculator.max_loss_per_unit(&narrowed) {
            Ok(loss) if loss > Decimal::ZERO => loss,
            _ => {
                breakdown.narrowed = Some(NarrowedAttempt {
                    width: narrowed.width,
                    per_unit_loss: None,
                    steps: UnitSteps::default(),
                });
                return None;
            }
        };

        let steps = self.unit_steps(ctx.allowance, per_unit_loss);
        breakdown.narrowed = Some(NarrowedAttempt {
            width: narrowed.width,
            per_unit_loss: Some(per_unit_loss),
            steps,
        });

        (steps.final_units >= 1).then_some(SizedTrade {
            units: steps.final_units,
            spec: narrowed,
            per_unit_loss,
        })
    }

    fn probe(&self, ctx: &SizingContext<'_>, breakdown: &mut SizingBreakdown) -> Option<SizedTrade> {
        let flat_enough = !self.config.probe_requires_flat || ctx.request.open_positions == 0;
        let eligible = self.config.probe_enabled
            && flat_enough
            && ctx.per_unit_loss <= ctx.request.remaining_budget;
        breakdown.probe_eligible = eligible;

        eligible.then(|| SizedTrade {
            units: 1,
            spec: ctx.request.spec.clone(),
            per_unit_loss: ctx.per_unit_loss,
        })
    }

    fn rejected(
        request: &SizingRequest<'_>,
        per_unit_loss: Decimal,
        breakdown: SizingBreakdown,
        rejection: SizingRejection,
        message: String,
    ) -> SizingResult {
        debug!(reason = %rejection, detail = %message, "Sizing produced zero units");
        SizingResult {
            units: 0,
            is_valid: false,
            path: None,
            rejection: Some(rejection),
            message: Some(message),
            spec: request.spec.clone(),
            per_unit_loss,
            breakdown,
        }
    }
}

fn floor_units(value: Decimal) -> u32 {
    if value <= Decimal::ZERO {
        return 0;
    }
    value.floor().to_u32().unwrap_or(u32::MAX)
}
