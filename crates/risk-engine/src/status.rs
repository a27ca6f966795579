//! Monitoring snapshot of one portfolio's risk state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use odte_risk_core::TradingDay;

use crate::ledger::DayEndStatus;
use crate::notch::NotchTransition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStatus {
    pub day: TradingDay,
    pub notch_index: usize,
    pub notch_count: usize,
    pub notch_limit: Decimal,
    pub daily_limit: Decimal,
    pub remaining_budget: Decimal,
    pub available_budget: Decimal,
    pub can_trade: bool,
    pub loss_streak: u32,
    pub consecutive_profitable_days: u32,
    pub open_positions: usize,
    pub open_risk: Decimal,
    pub correlation_exposure: f64,
    pub exposure_ceiling: f64,
    pub cumulative_pnl: Decimal,
    pub current_drawdown: Decimal,
    pub max_drawdown: Decimal,
    pub history_days: usize,
}

impl std::fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Risk status for {}", self.day)?;
        writeln!(
            f,
            "  notch        {}/{} (limit ${})",
            self.notch_index + 1,
            self.notch_count,
            self.notch_limit
        )?;
        writeln!(
            f,
            "  daily limit  ${} (remaining ${}, available ${})",
            self.daily_limit, self.remaining_budget, self.available_budget
        )?;
        writeln!(
            f,
            "  streak       {} losing day(s), {} profitable",
            self.loss_streak, self.consecutive_profitable_days
        )?;
        writeln!(
            f,
            "  positions    {} open, ${} at risk, exposure {:.2}/{:.2}",
            self.open_positions, self.open_risk, self.correlation_exposure, self.exposure_ceiling
        )?;
        write!(
            f,
            "  P&L          ${} cumulative, drawdown ${} (max ${}) over {} day(s)",
            self.cumulative_pnl, self.current_drawdown, self.max_drawdown, self.history_days
        )
    }
}

/// Result of finalizing one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayEndReport {
    pub status: DayEndStatus,
    /// `None` when the day had already been finalized.
    pub transition: Option<NotchTransition>,
}
