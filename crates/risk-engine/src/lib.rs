//! Risk gating and integer position sizing for short-dated defined-risk
//! option structures.
//!
//! One [`RiskEngine`] per portfolio combines:
//! - a daily loss budget that shrinks after losing days
//! - a coarse capital ladder moved by each day's P&L
//! - a correlation-weighted exposure ceiling across open positions
//! - a per-trade cap on the share of remaining budget at risk
//! - an integer sizer with scale-to-fit and single-unit probe fallbacks
//!
//! All decisions are deterministic functions of engine state and the
//! proposal; rejections are values, never errors.

pub mod cap_validator;
pub mod correlation;
pub mod decision;
pub mod engine;
pub mod feed;
pub mod history;
pub mod ledger;
pub mod max_loss;
pub mod notch;
pub mod portfolio;
pub mod sizer;
pub mod status;

pub use cap_validator::{
    BudgetCapValidationRecord, CapReason, CapValidator, RiskFactorInputs, ValidationStatistics,
};
pub use correlation::{
    CorrelationBudget, CorrelationCache, ExposureCheck, ExposureItem, ExposureReport, SizeSearch,
    StaticCorrelations, SymbolPair,
};
pub use decision::{RejectionReason, TradeDecision, TradeProposal};
pub use engine::RiskEngine;
pub use feed::{fetch_correlations, CorrelationSnapshot, FetchFailure};
pub use history::{DrawdownSummary, HistoryEntry, HistoryLog};
pub use ledger::{DailyBudgetLedger, DailyLedgerEntry, DayEndStatus};
pub use max_loss::SpreadMaxLoss;
pub use notch::{NotchCapitalScale, NotchMovement, NotchReason, NotchTransition};
pub use portfolio::{Portfolio, Position, PositionId};
pub use sizer::{
    ContractCountCheck, PositionSizer, SizingBreakdown, SizingPath, SizingRejection, SizingRequest,
    SizingResult,
};
pub use status::{DayEndReport, RiskStatus};
