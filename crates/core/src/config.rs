use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Complete engine configuration, one section per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ledger: LedgerConfig,
    pub notch: NotchConfig,
    pub correlation: CorrelationConfig,
    pub cap: CapValidatorConfig,
    pub sizer: SizerConfig,
}

impl EngineConfig {
    /// Checks structural invariants that the components rely on.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ledger.validate()?;
        self.notch.validate()?;
        self.correlation.validate()?;
        self.cap.validate()?;
        self.sizer.validate()
    }
}

/// Daily budget ledger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Daily loss limits indexed by consecutive losing days. Strictly decreasing.
    pub schedule: Vec<Decimal>,
    /// Remaining budget at or below this blocks new trades.
    pub min_trade_budget: Decimal,
    /// Days of ledger entries kept behind the newest entry.
    pub retention_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            schedule: vec![dec!(500), dec!(300), dec!(200), dec!(100)],
            min_trade_budget: dec!(10),
            retention_days: 30,
        }
    }
}

impl LedgerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_decreasing("ledger.schedule", &self.schedule)?;
        if self.min_trade_budget < Decimal::ZERO {
            return Err(ConfigError::Negative("ledger.min_trade_budget"));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::Zero("ledger.retention_days"));
        }
        Ok(())
    }
}

/// Notch capital ladder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotchConfig {
    /// Capital limits from most aggressive (index 0) to most conservative.
    pub ladder: Vec<Decimal>,
    /// Starting notch on cold start. `None` means the middle of the ladder.
    pub start_index: Option<usize>,
    /// Scales the loss fraction before it is compared with the thresholds.
    pub loss_sensitivity: Decimal,
    pub catastrophic_loss: Decimal,
    pub major_loss: Decimal,
    pub significant_loss: Decimal,
    pub mild_loss: Decimal,
    /// Profit fraction that moves one notch left immediately.
    pub major_profit: Decimal,
    /// Profit fraction that moves one notch left once enough profitable days accumulate.
    pub sustained_profit: Decimal,
    pub required_profitable_days: u32,
    /// Absolute daily loss that always adds one rightward notch.
    pub absolute_loss_trigger: Decimal,
    /// Losing days with a realized win rate below this add one rightward notch.
    pub min_win_rate: f64,
    /// Closed trades a day needs before its win rate counts.
    pub min_trades_for_win_rate: u32,
}

impl Default for NotchConfig {
    fn default() -> Self {
        Self {
            ladder: vec![
                dec!(1250),
                dec!(800),
                dec!(500),
                dec!(300),
                dec!(200),
                dec!(100),
            ],
            start_index: None,
            loss_sensitivity: Decimal::ONE,
            catastrophic_loss: dec!(0.60),
            major_loss: dec!(0.35),
            significant_loss: dec!(0.15),
            mild_loss: dec!(0.06),
            major_profit: dec!(0.30),
            sustained_profit: dec!(0.10),
            required_profitable_days: 2,
            absolute_loss_trigger: dec!(500),
            min_win_rate: 0.40,
            min_trades_for_win_rate: 3,
        }
    }
}

impl NotchConfig {
    /// Index used when no history exists.
    #[must_use]
    pub fn initial_index(&self) -> usize {
        let last = self.ladder.len().saturating_sub(1);
        self.start_index.unwrap_or(last / 2).min(last)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_decreasing("notch.ladder", &self.ladder)?;
        if let Some(idx) = self.start_index {
            if idx >= self.ladder.len() {
                return Err(ConfigError::OutOfRange {
                    field: "notch.start_index",
                    value: idx.to_string(),
                });
            }
        }
        if self.loss_sensitivity <= Decimal::ZERO {
            return Err(ConfigError::Negative("notch.loss_sensitivity"));
        }
        let losses = [
            self.catastrophic_loss,
            self.major_loss,
            self.significant_loss,
            self.mild_loss,
        ];
        if losses.windows(2).any(|w| w[0] <= w[1]) {
            return Err(ConfigError::NotDecreasing("notch loss thresholds"));
        }
        if self.sustained_profit > self.major_profit {
            return Err(ConfigError::InvertedBand("notch.sustained_profit"));
        }
        Ok(())
    }
}

/// Correlation exposure budget settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Maximum total correlation-weighted exposure.
    pub ceiling: f64,
    pub cache_ttl_secs: u64,
    /// Step size of the size search, in units.
    pub search_precision: f64,
    pub default_beta: f64,
    pub default_correlation: f64,
    pub fetch_timeout_ms: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            ceiling: 1.0,
            cache_ttl_secs: 4 * 3600,
            search_precision: 0.1,
            default_beta: 1.0,
            default_correlation: 1.0,
            fetch_timeout_ms: 2_000,
        }
    }
}

impl CorrelationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ceiling.is_finite() && self.ceiling > 0.0) {
            return Err(ConfigError::Negative("correlation.ceiling"));
        }
        if !(self.search_precision.is_finite() && self.search_precision > 0.0) {
            return Err(ConfigError::Negative("correlation.search_precision"));
        }
        Ok(())
    }
}

/// Per-trade budget cap validator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapValidatorConfig {
    pub base_risk_factor: Decimal,
    pub min_risk_factor: Decimal,
    pub max_risk_factor: Decimal,
    /// Remaining budget below this is rejected outright.
    pub min_remaining_budget: Decimal,
    /// Adjust the risk factor from win rate, streak and volatility.
    pub adaptive: bool,
    /// Days of history used for the win rate.
    pub lookback_days: usize,
    pub high_win_rate: f64,
    pub low_volatility: f64,
    pub high_volatility: f64,
    pub win_rate_boost: Decimal,
    pub streak_penalty: Decimal,
    pub volatility_penalty: Decimal,
}

impl Default for CapValidatorConfig {
    fn default() -> Self {
        Self {
            base_risk_factor: dec!(0.40),
            min_risk_factor: dec!(0.20),
            max_risk_factor: dec!(0.60),
            min_remaining_budget: dec!(10),
            adaptive: true,
            lookback_days: 10,
            high_win_rate: 0.70,
            low_volatility: 20.0,
            high_volatility: 30.0,
            win_rate_boost: dec!(0.10),
            streak_penalty: dec!(0.05),
            volatility_penalty: dec!(0.10),
        }
    }
}

impl CapValidatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_fraction("cap.base_risk_factor", self.base_risk_factor)?;
        check_fraction("cap.min_risk_factor", self.min_risk_factor)?;
        check_fraction("cap.max_risk_factor", self.max_risk_factor)?;
        if self.min_risk_factor > self.max_risk_factor {
            return Err(ConfigError::InvertedBand("cap.min_risk_factor"));
        }
        if self.min_remaining_budget < Decimal::ZERO {
            return Err(ConfigError::Negative("cap.min_remaining_budget"));
        }
        Ok(())
    }
}

/// Integer position sizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizerConfig {
    /// Share of the remaining budget one trade may use.
    pub fraction: Decimal,
    /// Fraction used when the day's limit is below `low_cap_threshold`.
    pub low_cap_fraction: Decimal,
    pub low_cap_threshold: Decimal,
    pub hard_cap: u32,
    pub safety_buffer: Decimal,
    /// Narrowest width scale-to-fit may use. `None` disables scale-to-fit.
    pub min_width: Option<Decimal>,
    pub probe_enabled: bool,
    /// Probe trades require zero open positions.
    pub probe_requires_flat: bool,
    /// Volatility at or above which the fraction is cut to 75%.
    pub elevated_volatility: f64,
    /// Volatility at or above which the fraction is cut to 50%.
    pub extreme_volatility: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            fraction: dec!(0.40),
            low_cap_fraction: dec!(0.60),
            low_cap_threshold: dec!(150),
            hard_cap: 10,
            safety_buffer: dec!(0.05),
            min_width: Some(Decimal::ONE),
            probe_enabled: true,
            probe_requires_flat: true,
            elevated_volatility: 30.0,
            extreme_volatility: 40.0,
        }
    }
}

impl SizerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_fraction("sizer.fraction", self.fraction)?;
        check_fraction("sizer.low_cap_fraction", self.low_cap_fraction)?;
        if self.hard_cap == 0 {
            return Err(ConfigError::Zero("sizer.hard_cap"));
        }
        if self.safety_buffer < Decimal::ZERO || self.safety_buffer >= Decimal::ONE {
            return Err(ConfigError::OutOfRange {
                field: "sizer.safety_buffer",
                value: self.safety_buffer.to_string(),
            });
        }
        if matches!(self.min_width, Some(w) if w <= Decimal::ZERO) {
            return Err(ConfigError::Negative("sizer.min_width"));
        }
        if self.elevated_volatility > self.extreme_volatility {
            return Err(ConfigError::InvertedBand("sizer.elevated_volatility"));
        }
        Ok(())
    }
}

fn check_decreasing(field: &'static str, values: &[Decimal]) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::Empty(field));
    }
    if values.iter().any(|v| *v <= Decimal::ZERO) {
        return Err(ConfigError::Negative(field));
    }
    if values.windows(2).any(|w| w[0] <= w[1]) {
        return Err(ConfigError::NotDecreasing(field));
    }
    Ok(())
}

fn check_fraction(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO || value > Decimal::ONE {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn initial_index_is_middle_of_ladder() {
        let config = NotchConfig::default();
        assert_eq!(config.initial_index(), 2);

        let five = NotchConfig {
            ladder: vec![dec!(1000), dec!(600), dec!(350), dec!(200), dec!(100)],
            ..NotchConfig::default()
        };
        assert_eq!(five.initial_index(), 2);
    }

    #[test]
    fn rejects_increasing_schedule() {
        let mut config = EngineConfig::default();
        config.ledger.schedule = vec![dec!(100), dec!(200)];
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotDecreasing("ledger.schedule"))
        );
    }

    #[test]
    fn rejects_empty_ladder() {
        let mut config = EngineConfig::default();
        config.notch.ladder.clear();
        assert_eq!(config.validate(), Err(ConfigError::Empty("notch.ladder")));
    }

    #[test]
    fn rejects_inverted_risk_band() {
        let mut config = EngineConfig::default();
        config.cap.min_risk_factor = dec!(0.7);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_full_safety_buffer() {
        let mut config = EngineConfig::default();
        config.sizer.safety_buffer = Decimal::ONE;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "sizer.safety_buffer", .. })
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "sizer": { "hard_cap": 4 } }"#).unwrap();
        assert_eq!(config.sizer.hard_cap, 4);
        assert_eq!(config.sizer.fraction, dec!(0.40));
        assert_eq!(config.ledger, LedgerConfig::default());
    }
}
