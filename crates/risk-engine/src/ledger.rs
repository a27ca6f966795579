//! Daily budget ledger.
//!
//! Tracks, per trading day, the loss consumed so far and the risk reserved
//! by open trades, plus the consecutive losing-day streak that selects the
//! day's ceiling from a decreasing schedule.

use std::collections::BTreeMap;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use odte_risk_core::{LedgerConfig, TradingDay};

/// Budget state for one trading day. Created lazily on first activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLedgerEntry {
    pub date: TradingDay,
    /// Realized losses, always non-negative.
    pub loss_consumed: Decimal,
    pub net_pnl: Decimal,
    /// Max loss of trades approved today and still open.
    pub reserved_risk: Decimal,
    pub wins: u32,
    pub losses: u32,
    /// Limit in force when the day was finalized.
    pub applied_limit: Option<Decimal>,
}

impl DailyLedgerEntry {
    fn new(date: TradingDay) -> Self {
        Self {
            date,
            loss_consumed: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            reserved_risk: Decimal::ZERO,
            wins: 0,
            losses: 0,
            applied_limit: None,
        }
    }

    #[must_use]
    pub fn is_profitable(&self) -> bool {
        self.net_pnl > Decimal::ZERO
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.applied_limit.is_some()
    }

    /// Share of closed trades that were winners, if any closed.
    #[must_use]
    pub fn win_rate(&self) -> Option<f64> {
        let total = self.wins + self.losses;
        if total == 0 {
            return None;
        }
        Some(f64::from(self.wins) / f64::from(total))
    }
}

/// Result of the end-of-day step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayEndStatus {
    pub day: TradingDay,
    pub net_pnl: Decimal,
    pub win_rate: Option<f64>,
    /// Closed trades behind `win_rate`.
    pub trades: u32,
    pub loss_streak: u32,
    /// False when the day had already been finalized.
    pub newly_finalized: bool,
}

#[derive(Debug, Clone)]
pub struct DailyBudgetLedger {
    config: LedgerConfig,
    entries: BTreeMap<TradingDay, DailyLedgerEntry>,
    loss_streak: u32,
}

impl DailyBudgetLedger {
    #[must_use]
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_streak(config, 0)
    }

    /// Ledger resuming with a known losing streak.
    #[must_use]
    pub fn with_streak(config: LedgerConfig, loss_streak: u32) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
            loss_streak,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    #[must_use]
    pub fn loss_streak(&self) -> u32 {
        self.loss_streak
    }

    #[must_use]
    pub fn entry(&self, day: TradingDay) -> Option<&DailyLedgerEntry> {
        self.entries.get(&day)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DailyLedgerEntry> {
        self.entries.values()
    }

    /// Ceiling for `day`.
    ///
    /// Finalized days keep the limit they were traded under; open days use
    /// the schedule slot for the current streak.
    #[must_use]
    pub fn daily_limit(&self, day: TradingDay) -> Decimal {
        self.entries
            .get(&day)
            .and_then(|e| e.applied_limit)
            .unwrap_or_else(|| self.scheduled_limit())
    }

    fn scheduled_limit(&self) -> Decimal {
        let schedule = &self.config.schedule;
        let last = schedule.len().saturating_sub(1);
        let idx = (self.loss_streak as usize).min(last);
        schedule.get(idx).copied().unwrap_or(Decimal::ZERO)
    }

    /// Limit minus realized losses, floored at zero.
    #[must_use]
    pub fn remaining_budget(&self, day: TradingDay) -> Decimal {
        let consumed = self
            .entries
            .get(&day)
            .map_or(Decimal::ZERO, |e| e.loss_consumed);
        floor_zero(self.daily_limit(day) - consumed)
    }

    /// Remaining budget minus risk reserved by open trades, floored at zero.
    #[must_use]
    pub fn available_budget(&self, day: TradingDay) -> Decimal {
        let reserved = self
            .entries
            .get(&day)
            .map_or(Decimal::ZERO, |e| e.reserved_risk);
        floor_zero(self.remaining_budget(day) - reserved)
    }

    /// True while the unreserved budget exceeds the micro-trade threshold.
    #[must_use]
    pub fn can_trade(&self, day: TradingDay) -> bool {
        self.available_budget(day) > self.config.min_trade_budget
    }

    pub fn record_loss(&mut self, day: TradingDay, amount: Decimal) {
        let amount = amount.abs();
        let entry = self.entry_mut(day);
        entry.loss_consumed += amount;
        entry.net_pnl -= amount;
        entry.losses += 1;
        debug!(%day, loss = %amount, consumed = %entry.loss_consumed, "Loss recorded");
    }

    pub fn record_profit(&mut self, day: TradingDay, amount: Decimal) {
        let amount = amount.abs();
        let entry = self.entry_mut(day);
        entry.net_pnl += amount;
        entry.wins += 1;
        debug!(%day, profit = %amount, net = %entry.net_pnl, "Profit recorded");
    }

    /// Routes a signed P&L to [`record_profit`](Self::record_profit) or
    /// [`record_loss`](Self::record_loss). Zero is ignored.
    pub fn record_pnl(&mut self, day: TradingDay, pnl: Decimal) {
        if pnl > Decimal::ZERO {
            self.record_profit(day, pnl);
        } else if pnl < Decimal::ZERO {
            self.record_loss(day, pnl);
        }
    }

    pub fn reserve_risk(&mut self, day: TradingDay, amount: Decimal) {
        let entry = self.entry_mut(day);
        entry.reserved_risk += floor_zero(amount);
    }

    /// No-op for a day with no entry, including days already pruned.
    pub fn release_risk(&mut self, day: TradingDay, amount: Decimal) {
        if let Some(entry) = self.entries.get_mut(&day) {
            entry.reserved_risk = floor_zero(entry.reserved_risk - floor_zero(amount));
        }
    }

    /// Closes out `day`: a profitable day resets the streak, a losing day
    /// extends it, a flat day leaves it alone.
    ///
    /// Idempotent. Returns `None` for a day with no ledger activity.
    pub fn update_day_end_status(&mut self, day: TradingDay) -> Option<DayEndStatus> {
        let limit = self.scheduled_limit();
        let entry = self.entries.get_mut(&day)?;

        if entry.is_finalized() {
            return Some(DayEndStatus {
                day,
                net_pnl: entry.net_pnl,
                win_rate: entry.win_rate(),
                trades: entry.wins + entry.losses,
                loss_streak: self.loss_streak,
                newly_finalized: false,
            });
        }

        entry.applied_limit = Some(limit);
        entry.reserved_risk = Decimal::ZERO;
        let net_pnl = entry.net_pnl;
        let win_rate = entry.win_rate();
        let trades = entry.wins + entry.losses;

        if net_pnl > Decimal::ZERO {
            self.loss_streak = 0;
        } else if net_pnl < Decimal::ZERO {
            self.loss_streak += 1;
        }

        info!(
            %day,
            net_pnl = %net_pnl,
            loss_streak = self.loss_streak,
            next_limit = %self.scheduled_limit(),
            "Ledger day finalized"
        );

        self.prune(day);

        Some(DayEndStatus {
            day,
            net_pnl,
            win_rate,
            trades,
            loss_streak: self.loss_streak,
            newly_finalized: true,
        })
    }

    fn entry_mut(&mut self, day: TradingDay) -> &mut DailyLedgerEntry {
        self.entries
            .entry(day)
            .or_insert_with(|| DailyLedgerEntry::new(day))
    }

    fn prune(&mut self, newest: TradingDay) {
        let cutoff = newest - Duration::days(i64::from(self.config.retention_days));
        self.entries = self.entries.split_off(&cutoff);
    }
}

fn floor_zero(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}
