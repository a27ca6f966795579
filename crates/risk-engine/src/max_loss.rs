//! Per-unit max loss for defined-risk credit structures.

use rust_decimal::Decimal;

use odte_risk_core::{MaxLossCalculator, RiskError, StrategySpecification, StructureType};

/// `(width − net_credit) × multiplier` for credit spreads, condors and butterflies.
///
/// Condors and butterflies only lose on one side at expiry, so the widest
/// wing bounds the loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadMaxLoss;

impl MaxLossCalculator for SpreadMaxLoss {
    fn max_loss_per_unit(&self, spec: &StrategySpecification) -> Result<Decimal, RiskError> {
        if spec.width <= Decimal::ZERO {
            return Err(RiskError::InvalidSpecification {
                reason: format!("{} width must be positive, got {}", spec.structure, spec.width),
            });
        }
        if spec.net_credit < Decimal::ZERO {
            return Err(RiskError::InvalidSpecification {
                reason: format!("{} is a credit structure, got debit {}", spec.structure, spec.net_credit),
            });
        }
        if spec.multiplier <= Decimal::ZERO {
            return Err(RiskError::InvalidSpecification {
                reason: format!("multiplier must be positive, got {}", spec.multiplier),
            });
        }

        let per_share = match spec.structure {
            StructureType::PutCreditSpread
            | StructureType::CallCreditSpread
            | StructureType::IronCondor
            | StructureType::IronButterfly => spec.width.checked_sub(spec.net_credit),
        };

        let loss = per_share
            .and_then(|p| p.checked_mul(spec.multiplier))
            .ok_or_else(|| RiskError::InvalidSpecification {
                reason: format!(
                    "{} max loss overflows: width {}, credit {}, multiplier {}",
                    spec.structure, spec.width, spec.net_credit, spec.multiplier
                ),
            })?;
        if loss <= Decimal::ZERO {
            return Err(RiskError::NonPositiveLoss(loss));
        }
        Ok(loss)
    }
}
