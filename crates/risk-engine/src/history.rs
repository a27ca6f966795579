//! Rolling day-by-day history, persisted as JSON.
//!
//! The log is the only state that survives a restart. Everything else
//! (loss streak, notch index, drawdown) is rebuilt from it.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use odte_risk_core::{RiskError, TradingDay};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: TradingDay,
    pub pnl: Decimal,
    pub notch_index_after: usize,
}

/// Drawdown measured on the cumulative P&L curve, starting from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawdownSummary {
    pub cumulative_pnl: Decimal,
    pub peak: Decimal,
    pub current_drawdown: Decimal,
    pub max_drawdown: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a log from arbitrary entries, sorted by date. A later entry
    /// for a date replaces an earlier one.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = HistoryEntry>) -> Self {
        let mut log = Self::new();
        for entry in entries {
            log.record(entry);
        }
        log
    }

    /// Inserts `entry` in date order, replacing any entry for the same date.
    pub fn record(&mut self, entry: HistoryEntry) {
        match self.entries.binary_search_by_key(&entry.date, |e| e.date) {
            Ok(pos) => self.entries[pos] = entry,
            Err(pos) => self.entries.insert(pos, entry),
        }
    }

    /// Drops entries older than `cutoff`.
    pub fn prune_before(&mut self, cutoff: TradingDay) {
        self.entries.retain(|e| e.date >= cutoff);
    }

    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[must_use]
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    #[must_use]
    pub fn get(&self, date: TradingDay) -> Option<&HistoryEntry> {
        self.entries
            .binary_search_by_key(&date, |e| e.date)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consecutive losing days at the end of the log. Flat days neither
    /// extend nor break the run.
    #[must_use]
    pub fn trailing_loss_streak(&self) -> u32 {
        let mut streak = 0;
        for entry in self.entries.iter().rev() {
            if entry.pnl > Decimal::ZERO {
                break;
            }
            if entry.pnl < Decimal::ZERO {
                streak += 1;
            }
        }
        streak
    }

    /// Profitable days since the last loss or notch move.
    #[must_use]
    pub fn trailing_profitable_days(&self) -> u32 {
        let mut count = 0;
        for (i, entry) in self.entries.iter().enumerate().rev() {
            if entry.pnl < Decimal::ZERO {
                break;
            }
            let moved = i > 0 && self.entries[i - 1].notch_index_after != entry.notch_index_after;
            if moved {
                break;
            }
            if entry.pnl > Decimal::ZERO {
                count += 1;
            }
        }
        count
    }

    /// Share of profitable days among the last `lookback` entries.
    #[must_use]
    pub fn recent_win_rate(&self, lookback: usize) -> Option<f64> {
        let start = self.entries.len().saturating_sub(lookback);
        let window = &self.entries[start..];
        if window.is_empty() {
            return None;
        }
        let wins = window.iter().filter(|e| e.pnl > Decimal::ZERO).count();
        #[allow(clippy::cast_precision_loss)]
        Some(wins as f64 / window.len() as f64)
    }

    #[must_use]
    pub fn drawdown(&self) -> DrawdownSummary {
        self.entries
            .iter()
            .fold(DrawdownSummary::default(), |mut acc, e| {
                acc.cumulative_pnl += e.pnl;
                acc.peak = acc.peak.max(acc.cumulative_pnl);
                acc.current_drawdown = acc.peak - acc.cumulative_pnl;
                acc.max_drawdown = acc.max_drawdown.max(acc.current_drawdown);
                acc
            })
    }

    /// Reads a log from disk. A missing file is an empty log.
    ///
    /// # Errors
    /// Returns [`RiskError::Io`] if the file cannot be read and
    /// [`RiskError::Format`] if it is not a valid history log.
    pub fn load(path: &Path) -> Result<Self, RiskError> {
        if !path.exists() {
            info!(path = %path.display(), "No history log found, cold start");
            return Ok(Self::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let entries: Vec<HistoryEntry> = serde_json::from_reader(reader)
            .map_err(|e| RiskError::Format(format!("{}: {e}", path.display())))?;
        let log = Self::from_entries(entries);

        info!(
            path = %path.display(),
            days = log.len(),
            last = ?log.last().map(|e| e.date),
            "Loaded history log"
        );
        Ok(log)
    }

    /// Writes the log as a JSON array, creating parent directories.
    ///
    /// # Errors
    /// Returns [`RiskError::Io`] on filesystem failure.
    pub fn save(&self, path: &Path) -> Result<(), RiskError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.entries)
            .map_err(|e| RiskError::Format(e.to_string()))?;

        debug!(path = %path.display(), days = self.len(), "Saved history log");
        Ok(())
    }
}
