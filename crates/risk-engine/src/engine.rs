//! Per-portfolio risk engine.
//!
//! Owns the ledger, notch scale, correlation budget, cap validator, sizer,
//! open positions and history log for one portfolio. Every read-modify-write
//! happens under a single mutex, so two proposals can never both see the
//! full remaining budget. Separate portfolios use separate engines and share
//! nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use odte_risk_core::{
    CorrelationFeed, CorrelationSource, EngineConfig, MarketConditions, MaxLossCalculator,
    RiskError, TradeOutcome, TradingDay,
};

use crate::cap_validator::{
    BudgetCapValidationRecord, CapReason, CapValidator, RiskFactorInputs, ValidationStatistics,
};
use crate::correlation::CorrelationBudget;
use crate::decision::{RejectionReason, TradeDecision, TradeProposal};
use crate::feed::{fetch_correlations, CorrelationSnapshot};
use crate::history::{HistoryEntry, HistoryLog};
use crate::ledger::DailyBudgetLedger;
use crate::notch::NotchCapitalScale;
use crate::portfolio::{Portfolio, Position, PositionId};
use crate::sizer::{PositionSizer, SizingPath, SizingRequest};
use crate::status::{DayEndReport, RiskStatus};

struct EngineState {
    ledger: DailyBudgetLedger,
    notch: NotchCapitalScale,
    correlation: CorrelationBudget,
    cap: CapValidator,
    portfolio: Portfolio,
    history: HistoryLog,
}

impl EngineState {
    /// Re-reserves positions still open from earlier days against `day`.
    fn carry_open_risk(&mut self, day: TradingDay) {
        for (from, max_loss) in self.portfolio.roll_reservations(day) {
            self.ledger.release_risk(from, max_loss);
            self.ledger.reserve_risk(day, max_loss);
            debug!(%from, to = %day, max_loss = %max_loss, "Open risk carried forward");
        }
    }
}

#[derive(Clone)]
pub struct RiskEngine {
    config: Arc<EngineConfig>,
    sizer: Arc<PositionSizer>,
    state: Arc<Mutex<EngineState>>,
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RiskEngine")
            .field("notch_index", &state.notch.current_index())
            .field("loss_streak", &state.ledger.loss_streak())
            .field("open_positions", &state.portfolio.len())
            .field("history_days", &state.history.len())
            .finish_non_exhaustive()
    }
}

impl RiskEngine {
    /// Cold-start engine: top of the ledger schedule, configured notch.
    ///
    /// # Errors
    /// Returns [`RiskError::Config`] if `config` fails validation.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn CorrelationSource>,
        calculator: Arc<dyn MaxLossCalculator>,
    ) -> Result<Self, RiskError> {
        Self::restore(config, source, calculator, HistoryLog::new())
    }

    /// Rebuilds streak and notch state from `history`. An empty log is a
    /// cold start.
    ///
    /// # Errors
    /// Returns [`RiskError::Config`] if `config` fails validation.
    pub fn restore(
        config: EngineConfig,
        source: Arc<dyn CorrelationSource>,
        calculator: Arc<dyn MaxLossCalculator>,
        history: HistoryLog,
    ) -> Result<Self, RiskError> {
        config.validate()?;

        let loss_streak = history.trailing_loss_streak();
        let ledger = DailyBudgetLedger::with_streak(config.ledger.clone(), loss_streak);
        let notch = match history.last() {
            Some(last) => NotchCapitalScale::with_index(config.notch.clone(), last.notch_index_after)
                .with_profitable_days(history.trailing_profitable_days()),
            None => NotchCapitalScale::new(config.notch.clone()),
        };

        info!(
            history_days = history.len(),
            loss_streak,
            notch_index = notch.current_index(),
            notch_limit = %notch.current_limit(),
            "Risk engine initialized"
        );

        let state = EngineState {
            ledger,
            notch,
            correlation: CorrelationBudget::new(config.correlation.clone(), source),
            cap: CapValidator::new(config.cap.clone()),
            portfolio: Portfolio::new(),
            history,
        };

        Ok(Self {
            sizer: Arc::new(PositionSizer::new(config.sizer.clone(), calculator)),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        day: TradingDay,
        proposal: &TradeProposal,
        market: Option<&MarketConditions>,
    ) -> TradeDecision {
        self.evaluate_at(day, proposal, market, Utc::now())
    }

    /// Sizes `proposal`, bounds it by the correlation budget and the per-trade
    /// cap, then reserves its max loss and opens the position.
    ///
    /// `now` drives correlation cache expiry only.
    pub fn evaluate_at(
        &self,
        day: TradingDay,
        proposal: &TradeProposal,
        market: Option<&MarketConditions>,
        now: DateTime<Utc>,
    ) -> TradeDecision {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.carry_open_risk(day);

        let daily_limit = state.ledger.daily_limit(day);
        let available = state.ledger.available_budget(day);
        let notch_limit = state.notch.current_limit();

        let mut decision = TradeDecision {
            day,
            symbol: proposal.symbol.clone(),
            units: 0,
            rejection: None,
            path: None,
            position_id: None,
            spec: proposal.spec.clone(),
            per_unit_loss: Decimal::ZERO,
            max_loss: Decimal::ZERO,
            daily_limit,
            available_budget: available,
            notch_limit,
            sizing: None,
            correlation: None,
            cap: Vec::new(),
            message: None,
        };

        if proposal.requested_units == Some(0) {
            return reject(decision, RejectionReason::InvalidParameters, "zero units requested");
        }

        if !state.ledger.can_trade(day) {
            return reject(
                decision,
                RejectionReason::InsufficientBudget,
                format!("available budget {available} at or below minimum"),
            );
        }

        let inputs = RiskFactorInputs {
            recent_win_rate: state.history.recent_win_rate(self.config.cap.lookback_days),
            loss_streak: state.ledger.loss_streak(),
            volatility: market.map(|m| m.volatility),
        };
        let risk_factor = state.cap.risk_factor(&inputs);

        // Integer sizing, never above what the per-trade cap allows
        let sizing = self.sizer.size(&SizingRequest {
            spec: &proposal.spec,
            remaining_budget: available,
            daily_limit,
            open_positions: state.portfolio.len(),
            market,
            max_fraction: Some(risk_factor),
        });
        decision.sizing = Some(sizing.breakdown.clone());
        decision.per_unit_loss = sizing.per_unit_loss;
        decision.spec = sizing.spec.clone();
        decision.path = sizing.path;

        if !sizing.is_valid {
            let reason = sizing
                .rejection
                .map_or(RejectionReason::ZeroEligibleUnits, RejectionReason::from);
            let message = sizing.message.unwrap_or_default();
            return reject(decision, reason, message);
        }

        let mut units = sizing.units;
        if let Some(requested) = proposal.requested_units {
            units = units.min(requested);
        }

        // Correlation budget
        let search = state.correlation.max_allowed_size(
            &state.portfolio.exposure_items(),
            &proposal.symbol,
            proposal.beta,
            sizing.per_unit_loss,
            units,
            notch_limit,
            now,
        );
        decision.correlation = Some(search.clone());
        if search.units == 0 {
            return reject(
                decision,
                RejectionReason::ExceedsCorrelationBudget,
                format!("no units of {} fit the exposure ceiling", proposal.symbol),
            );
        }
        units = search.units;

        // Per-trade cap; probe trades are the documented exception.
        if sizing.path == Some(SizingPath::Probe) {
            info!(
                %day,
                symbol = %proposal.symbol,
                per_unit_loss = %sizing.per_unit_loss,
                "Probe trade bypasses per-trade cap"
            );
        } else {
            let per_unit = sizing.per_unit_loss;
            let record = state.cap.validate(
                day,
                per_unit * Decimal::from(units),
                per_unit,
                available,
                risk_factor,
            );
            decision.cap.push(record.clone());

            if !record.approved {
                match downsized(&record) {
                    Some(reduced) => {
                        let retry = state.cap.validate(
                            day,
                            per_unit * Decimal::from(reduced),
                            per_unit,
                            available,
                            record.risk_factor,
                        );
                        let approved = retry.approved;
                        decision.cap.push(retry);
                        if !approved {
                            return reject(decision, RejectionReason::ExceedsBudgetCap, "cap retry failed");
                        }
                        debug!(from = units, to = reduced, "Units reduced to fit per-trade cap");
                        units = reduced;
                    }
                    None => {
                        let reason = RejectionReason::from_cap(record.reason)
                            .unwrap_or(RejectionReason::ExceedsBudgetCap);
                        return reject(
                            decision,
                            reason,
                            format!("allowed risk {} below one unit", record.allowed_risk),
                        );
                    }
                }
            }
        }

        let max_loss = sizing.per_unit_loss * Decimal::from(units);
        if let Err(message) = check_reservation(max_loss, available) {
            return reject(decision, RejectionReason::InsufficientBudget, message);
        }

        state.ledger.reserve_risk(day, max_loss);
        let position_id = state
            .portfolio
            .open(
                &proposal.symbol,
                sizing.spec.clone(),
                units,
                sizing.per_unit_loss,
                proposal.beta,
                day,
            )
            .id;

        decision.units = units;
        decision.max_loss = max_loss;
        decision.position_id = Some(position_id);

        info!(
            %day,
            symbol = %proposal.symbol,
            units,
            path = ?decision.path,
            max_loss = %max_loss,
            available_after = %state.ledger.available_budget(day),
            "Trade approved"
        );

        decision
    }

    /// Closes an open position, releasing its reservation and booking `pnl`
    /// against `day`.
    ///
    /// # Errors
    /// Returns [`RiskError::UnknownPosition`] if `id` is not open.
    pub fn close_position(
        &self,
        id: PositionId,
        day: TradingDay,
        pnl: Decimal,
    ) -> Result<Position, RiskError> {
        let mut state = self.state.lock();
        if state.portfolio.get(id).is_none() {
            return Err(RiskError::UnknownPosition(id));
        }
        state.carry_open_risk(day);
        let position = state
            .portfolio
            .close(id)
            .ok_or(RiskError::UnknownPosition(id))?;

        state.ledger.release_risk(position.reserved_on, position.max_loss);
        state.ledger.record_pnl(day, pnl);

        info!(
            %day,
            id,
            symbol = %position.symbol,
            pnl = %pnl,
            remaining = %state.ledger.remaining_budget(day),
            "Position closed"
        );
        Ok(position)
    }

    /// Books a realized outcome that did not go through [`evaluate`](Self::evaluate).
    pub fn record_outcome(&self, outcome: &TradeOutcome) {
        let mut state = self.state.lock();
        state.ledger.record_pnl(outcome.day, outcome.pnl);
    }

    /// Day-end step: updates the streak, moves the notch and appends to the
    /// history log. Running it again for the same day changes nothing.
    ///
    /// Returns `None` for a day with no recorded activity.
    pub fn finalize_day(&self, day: TradingDay) -> Option<DayEndReport> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let status = state.ledger.update_day_end_status(day)?;
        if !status.newly_finalized {
            debug!(%day, "Day already finalized");
            return Some(DayEndReport {
                status,
                transition: None,
            });
        }

        let win_rate = state.notch.qualified_win_rate(status.win_rate, status.trades);
        let transition = state.notch.apply_day(day, status.net_pnl, win_rate);
        state.history.record(HistoryEntry {
            date: day,
            pnl: status.net_pnl,
            notch_index_after: transition.to_index,
        });
        let retention = i64::from(self.config.ledger.retention_days);
        let cutoff = day - chrono::Duration::days(retention);
        state.history.prune_before(cutoff);
        state.cap.prune_before(cutoff);

        if !state.portfolio.is_empty() {
            info!(
                %day,
                open = state.portfolio.len(),
                open_risk = %state.portfolio.open_risk(),
                "Positions still open at day end, risk carries to the next trading day"
            );
        }

        Some(DayEndReport {
            status,
            transition: Some(transition),
        })
    }

    pub fn status(&self, day: TradingDay) -> RiskStatus {
        self.status_at(day, Utc::now())
    }

    pub fn status_at(&self, day: TradingDay, now: DateTime<Utc>) -> RiskStatus {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.carry_open_risk(day);

        let notch_limit = state.notch.current_limit();
        let exposure = state
            .correlation
            .total_exposure(&state.portfolio.exposure_items(), notch_limit, now);
        let drawdown = state.history.drawdown();

        RiskStatus {
            day,
            notch_index: state.notch.current_index(),
            notch_count: self.config.notch.ladder.len(),
            notch_limit,
            daily_limit: state.ledger.daily_limit(day),
            remaining_budget: state.ledger.remaining_budget(day),
            available_budget: state.ledger.available_budget(day),
            can_trade: state.ledger.can_trade(day),
            loss_streak: state.ledger.loss_streak(),
            consecutive_profitable_days: state.notch.consecutive_profitable_days(),
            open_positions: state.portfolio.len(),
            open_risk: state.portfolio.open_risk(),
            correlation_exposure: exposure.total,
            exposure_ceiling: self.config.correlation.ceiling,
            cumulative_pnl: drawdown.cumulative_pnl,
            current_drawdown: drawdown.current_drawdown,
            max_drawdown: drawdown.max_drawdown,
            history_days: state.history.len(),
        }
    }

    /// Refreshes cached betas and correlations for `symbols`.
    ///
    /// Fetches run without holding the engine lock; failures keep the last
    /// cached values.
    pub async fn refresh_correlations(
        &self,
        feed: &dyn CorrelationFeed,
        symbols: &[String],
    ) -> CorrelationSnapshot {
        let timeout = Duration::from_millis(self.config.correlation.fetch_timeout_ms);
        let snapshot = fetch_correlations(feed, symbols, timeout).await;
        let stored = {
            let mut state = self.state.lock();
            snapshot.apply_to(state.correlation.cache_mut(), Utc::now())
        };
        debug!(stored, "Correlation cache updated");
        snapshot
    }

    #[must_use]
    pub fn history(&self) -> HistoryLog {
        self.state.lock().history.clone()
    }

    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        self.state.lock().portfolio.iter().cloned().collect()
    }

    #[must_use]
    pub fn validation_records(&self) -> Vec<BudgetCapValidationRecord> {
        self.state.lock().cap.records().to_vec()
    }

    #[must_use]
    pub fn validation_statistics(&self) -> ValidationStatistics {
        self.state.lock().cap.statistics()
    }
}

fn check_reservation(max_loss: Decimal, available: Decimal) -> Result<(), String> {
    if max_loss > available {
        return Err(format!("max loss {max_loss} exceeds available budget {available}"));
    }
    Ok(())
}

fn downsized(record: &BudgetCapValidationRecord) -> Option<u32> {
    match (record.reason, record.suggested_units) {
        (CapReason::ExceedsBudgetCap, Some(units)) if units >= 1 => Some(units),
        _ => None,
    }
}

fn reject(
    mut decision: TradeDecision,
    reason: RejectionReason,
    message: impl Into<String>,
) -> TradeDecision {
    let message = message.into();
    warn!(
        day = %decision.day,
        symbol = %decision.symbol,
        reason = %reason,
        detail = %message,
        "Trade rejected"
    );
    decision.units = 0;
    decision.max_loss = Decimal::ZERO;
    decision.rejection = Some(reason);
    decision.message = Some(message);
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use odte_risk_core::{StrategySpecification, StructureType};
    use rust_decimal_macros::dec;

    use crate::correlation::StaticCorrelations;
    use crate::max_loss::SpreadMaxLoss;

    fn day(d: u32) -> TradingDay {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn engine() -> RiskEngine {
        RiskEngine::new(
            EngineConfig::default(),
            Arc::new(StaticCorrelations::new()),
            Arc::new(SpreadMaxLoss),
        )
        .unwrap()
    }

    fn condor(width: Decimal, credit: Decimal) -> StrategySpecification {
        StrategySpecification::new(StructureType::IronCondor, width, credit)
    }

    #[test]
    fn approves_and_reserves() {
        let engine = engine();
        // 30 per unit, 0.40 * 500 = 200 → 6 → 5 after buffer. Exposure is
        // 5 * 30 / 500 = 0.30 against the middle notch.
        let decision = engine.evaluate(day(3), &TradeProposal::new("SPX", condor(dec!(1), dec!(0.7))), None);

        assert!(decision.is_approved(), "{decision:?}");
        assert_eq!(decision.units, 5);
        assert_eq!(decision.max_loss, dec!(150));
        assert_eq!(engine.status(day(3)).available_budget, dec!(350));
        assert_eq!(engine.open_positions().len(), 1);
    }

    #[test]
    fn requested_units_bound_the_result() {
        let engine = engine();
        let proposal = TradeProposal::new("SPX", condor(dec!(1), dec!(0.7))).with_requested_units(2);
        let decision = engine.evaluate(day(3), &proposal, None);
        assert_eq!(decision.units, 2);

        let zero = TradeProposal::new("SPX", condor(dec!(1), dec!(0.7))).with_requested_units(0);
        let decision = engine.evaluate(day(3), &zero, None);
        assert_eq!(decision.rejection, Some(RejectionReason::InvalidParameters));
    }

    #[test]
    fn malformed_spec_is_a_calculation_error() {
        let engine = engine();
        let decision = engine.evaluate(day(3), &TradeProposal::new("SPX", condor(dec!(1), dec!(2))), None);
        assert_eq!(decision.rejection, Some(RejectionReason::CalculationError));
        assert_eq!(engine.open_positions().len(), 0);
    }

    #[test]
    fn close_releases_reservation_and_books_loss() {
        let engine = engine();
        let decision = engine.evaluate(day(3), &TradeProposal::new("SPX", condor(dec!(1), dec!(0.7))), None);
        let id = decision.position_id.unwrap();

        engine.close_position(id, day(3), dec!(-60)).unwrap();
        let status = engine.status(day(3));
        assert_eq!(status.remaining_budget, dec!(440));
        assert_eq!(status.available_budget, dec!(440));
        assert!(matches!(
            engine.close_position(id, day(3), dec!(0)),
            Err(RiskError::UnknownPosition(_))
        ));
    }

    #[test]
    fn finalize_is_idempotent_and_records_history() {
        let engine = engine();
        engine.record_outcome(&TradeOutcome {
            day: day(3),
            pnl: dec!(-200),
        });

        let first = engine.finalize_day(day(3)).unwrap();
        let second = engine.finalize_day(day(3)).unwrap();

        assert!(first.transition.is_some());
        assert!(second.transition.is_none());
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.status(day(4)).loss_streak, 1);
        assert_eq!(engine.status(day(4)).daily_limit, dec!(300));
        assert!(engine.finalize_day(day(5)).is_none());
    }

    #[test]
    fn single_small_loss_keeps_the_notch() {
        let engine = engine();
        engine.record_outcome(&TradeOutcome {
            day: day(3),
            pnl: dec!(-1),
        });
        let transition = engine.finalize_day(day(3)).unwrap().transition.unwrap();

        assert_eq!(transition.from_index, 2);
        assert_eq!(transition.to_index, 2);
        assert!(!transition.movement.win_rate_trigger);
        assert_eq!(engine.status(day(4)).notch_index, 2);
    }

    #[test]
    fn losing_day_with_enough_trades_applies_win_rate_rule() {
        let engine = engine();
        for pnl in [dec!(-1), dec!(-1), dec!(1)] {
            engine.record_outcome(&TradeOutcome { day: day(3), pnl });
        }
        let transition = engine.finalize_day(day(3)).unwrap().transition.unwrap();
        assert!(transition.movement.win_rate_trigger);
        assert_eq!(transition.to_index, 3);
    }

    #[test]
    fn cap_records_are_pruned_with_history() {
        let engine = engine();
        let early = day(1);
        let proposal = TradeProposal::new("SPX", condor(dec!(1), dec!(0.7)));
        let decision = engine.evaluate(early, &proposal, None);
        engine
            .close_position(decision.position_id.unwrap(), early, dec!(20))
            .unwrap();
        engine.finalize_day(early);
        assert_eq!(engine.validation_records().len(), 1);

        let late = early + chrono::Duration::days(45);
        engine.evaluate(late, &proposal, None);
        engine.finalize_day(late);

        let records = engine.validation_records();
        assert_eq!(records.len(), 1);
        assert!(records.iter().all(|r| r.day == late));
    }

    #[test]
    fn reservation_above_available_is_refused() {
        assert!(check_reservation(dec!(150), dec!(150)).is_ok());
        assert!(check_reservation(dec!(150.01), dec!(150)).is_err());
    }

    #[test]
    fn exhausted_budget_blocks_trading() {
        let engine = engine();
        engine.record_outcome(&TradeOutcome {
            day: day(3),
            pnl: dec!(-495),
        });
        let decision = engine.evaluate(day(3), &TradeProposal::new("SPX", condor(dec!(1), dec!(0.9))), None);
        assert_eq!(decision.rejection, Some(RejectionReason::InsufficientBudget));
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = EngineConfig::default();
        config.sizer.hard_cap = 0;
        let result = RiskEngine::new(
            config,
            Arc::new(StaticCorrelations::new()),
            Arc::new(SpreadMaxLoss),
        );
        assert!(matches!(result, Err(RiskError::Config(_))));
    }
}
