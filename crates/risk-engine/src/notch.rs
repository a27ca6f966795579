//! Notch capital scale.
//!
//! A fixed ladder of decreasing capital limits. Each finalized day moves the
//! current notch at most a few steps: losses move right (more conservative)
//! immediately and can jump several notches, profits move left one notch and
//! only on a large day or after sustained confirmation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use odte_risk_core::{NotchConfig, TradingDay};

/// Why the notch moved (or did not) on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotchReason {
    Breakeven,
    CatastrophicLoss,
    MajorLoss,
    SignificantLoss,
    MildLoss,
    ToleratedLoss,
    MajorProfit,
    SustainedProfit,
    UnconfirmedProfit,
    MinorProfit,
}

impl std::fmt::Display for NotchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Breakeven => write!(f, "breakeven"),
            Self::CatastrophicLoss => write!(f, "catastrophic_loss"),
            Self::MajorLoss => write!(f, "major_loss"),
            Self::SignificantLoss => write!(f, "significant_loss"),
            Self::MildLoss => write!(f, "mild_loss"),
            Self::ToleratedLoss => write!(f, "tolerated_loss"),
            Self::MajorProfit => write!(f, "major_profit"),
            Self::SustainedProfit => write!(f, "sustained_profit"),
            Self::UnconfirmedProfit => write!(f, "unconfirmed_profit"),
            Self::MinorProfit => write!(f, "minor_profit"),
        }
    }
}

/// Signed notch movement for one day. Positive is rightward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotchMovement {
    pub notches: i32,
    pub reason: NotchReason,
    /// Absolute-loss trigger fired.
    pub absolute_trigger: bool,
    /// Low win-rate rule fired.
    pub win_rate_trigger: bool,
}

/// One applied daily transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotchTransition {
    pub day: TradingDay,
    pub pnl: Decimal,
    pub from_index: usize,
    pub to_index: usize,
    pub movement: NotchMovement,
    pub limit_after: Decimal,
}

#[derive(Debug, Clone)]
pub struct NotchCapitalScale {
    config: NotchConfig,
    index: usize,
    profitable_days: u32,
}

impl NotchCapitalScale {
    /// Scale at the configured start notch (middle of the ladder by default).
    #[must_use]
    pub fn new(config: NotchConfig) -> Self {
        let index = config.initial_index();
        Self::with_index(config, index)
    }

    /// Scale resuming at `index`, clamped into the ladder.
    #[must_use]
    pub fn with_index(config: NotchConfig, index: usize) -> Self {
        let last = config.ladder.len().saturating_sub(1);
        Self {
            config,
            index: index.min(last),
            profitable_days: 0,
        }
    }

    /// Resumes the consecutive-profitable-day counter.
    #[must_use]
    pub fn with_profitable_days(mut self, days: u32) -> Self {
        self.profitable_days = days;
        self
    }

    #[must_use]
    pub fn config(&self) -> &NotchConfig {
        &self.config
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn current_limit(&self) -> Decimal {
        self.config
            .ladder
            .get(self.index)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    #[must_use]
    pub fn consecutive_profitable_days(&self) -> u32 {
        self.profitable_days
    }

    /// `win_rate` when the day closed enough trades for it to count.
    #[must_use]
    pub fn qualified_win_rate(&self, win_rate: Option<f64>, trades: u32) -> Option<f64> {
        win_rate.filter(|_| trades >= self.config.min_trades_for_win_rate)
    }

    /// Movement a day with `pnl` would cause from the current state.
    #[must_use]
    pub fn movement_for(&self, pnl: Decimal, win_rate: Option<f64>) -> NotchMovement {
        let limit = self.current_limit();
        if pnl.is_zero() || limit <= Decimal::ZERO {
            return NotchMovement {
                notches: 0,
                reason: NotchReason::Breakeven,
                absolute_trigger: false,
                win_rate_trigger: false,
            };
        }

        if pnl < Decimal::ZERO {
            self.loss_movement(-pnl, limit, win_rate)
        } else {
            self.profit_movement(pnl, limit)
        }
    }

    fn loss_movement(&self, loss: Decimal, limit: Decimal, win_rate: Option<f64>) -> NotchMovement {
        let c = &self.config;
        let severity = loss / limit * c.loss_sensitivity;

        let (mut notches, reason) = if severity >= c.catastrophic_loss {
            (3, NotchReason::CatastrophicLoss)
        } else if severity >= c.major_loss {
            (2, NotchReason::MajorLoss)
        } else if severity >= c.significant_loss {
            (1, NotchReason::SignificantLoss)
        } else if severity >= c.mild_loss {
            (1, NotchReason::MildLoss)
        } else {
            (0, NotchReason::ToleratedLoss)
        };

        let absolute_trigger = loss > c.absolute_loss_trigger;
        if absolute_trigger {
            notches += 1;
        }

        let win_rate_trigger = win_rate.is_some_and(|rate| rate < c.min_win_rate);
        if win_rate_trigger {
            notches += 1;
        }

        NotchMovement {
            notches,
            reason,
            absolute_trigger,
            win_rate_trigger,
        }
    }

    fn profit_movement(&self, profit: Decimal, limit: Decimal) -> NotchMovement {
        let c = &self.config;
        let gain = profit / limit;
        let streak = self.profitable_days + 1;

        let (notches, reason) = if gain >= c.major_profit {
            (-1, NotchReason::MajorProfit)
        } else if gain >= c.sustained_profit && streak >= c.required_profitable_days {
            (-1, NotchReason::SustainedProfit)
        } else if gain >= c.sustained_profit {
            (0, NotchReason::UnconfirmedProfit)
        } else {
            (0, NotchReason::MinorProfit)
        };

        NotchMovement {
            notches,
            reason,
            absolute_trigger: false,
            win_rate_trigger: false,
        }
    }

    /// Applies one finalized day's net P&L.
    pub fn apply_day(
        &mut self,
        day: TradingDay,
        pnl: Decimal,
        win_rate: Option<f64>,
    ) -> NotchTransition {
        let movement = self.movement_for(pnl, win_rate);
        let from_index = self.index;

        if pnl > Decimal::ZERO {
            self.profitable_days = if movement.notches < 0 {
                0
            } else {
                self.profitable_days + 1
            };
        } else if pnl < Decimal::ZERO {
            self.profitable_days = 0;
        }

        self.index = self.clamped(from_index, movement.notches);
        debug_assert!(self.index < self.config.ladder.len().max(1));

        let transition = NotchTransition {
            day,
            pnl,
            from_index,
            to_index: self.index,
            movement,
            limit_after: self.current_limit(),
        };

        if transition.from_index == transition.to_index {
            debug!(%day, pnl = %pnl, reason = %movement.reason, index = self.index, "Notch unchanged");
        } else {
            info!(
                %day,
                pnl = %pnl,
                reason = %movement.reason,
                from = from_index,
                to = self.index,
                limit = %transition.limit_after,
                "Notch moved"
            );
        }

        transition
    }

    fn clamped(&self, index: usize, notches: i32) -> usize {
        let last = self.config.ladder.len().saturating_sub(1) as i64;
        (index as i64 + i64::from(notches)).clamp(0, last.max(0)) as usize
    }
}
