//! Replay command.
//!
//! Feeds a `date,pnl` CSV through the engine's day-end logic and prints how
//! the loss streak, daily limit and notch evolve.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use odte_risk_core::{TradeOutcome, TradingDay};
use odte_risk_engine::RiskEngine;

use super::EngineArgs;

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// CSV file with `date,pnl` rows (date as YYYY-MM-DD)
    #[arg(short, long)]
    pub log: PathBuf,

    /// Resume from this history log instead of cold-starting
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Write the resulting history log here
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print steps as JSON instead of a table
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PnlRow {
    pub date: TradingDay,
    pub pnl: Decimal,
}

/// One replayed day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStep {
    pub date: TradingDay,
    pub pnl: Decimal,
    pub daily_limit: Decimal,
    pub loss_streak: u32,
    pub notch_from: usize,
    pub notch_to: usize,
    pub notch_limit: Decimal,
    pub reason: Option<String>,
}

pub fn read_pnl_log(path: &Path) -> Result<Vec<PnlRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open P&L log {}", path.display()))?;

    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<PnlRow>().enumerate() {
        let row = record.with_context(|| format!("Bad row {} in {}", line + 2, path.display()))?;
        rows.push(row);
    }
    rows.sort_by_key(|r| r.date);
    Ok(rows)
}

/// Applies each row as one day's net P&L and finalizes it.
pub fn replay(engine: &RiskEngine, rows: &[PnlRow]) -> Vec<ReplayStep> {
    rows.iter()
        .map(|row| {
            let before = engine.status(row.date);
            engine.record_outcome(&TradeOutcome {
                day: row.date,
                pnl: row.pnl,
            });
            let report = engine.finalize_day(row.date);
            let after = engine.status(row.date.succ_opt().unwrap_or(row.date));
            let transition = report.and_then(|r| r.transition);

            ReplayStep {
                date: row.date,
                pnl: row.pnl,
                daily_limit: before.daily_limit,
                loss_streak: after.loss_streak,
                notch_from: before.notch_index,
                notch_to: after.notch_index,
                notch_limit: after.notch_limit,
                reason: transition.map(|t| t.movement.reason.to_string()),
            }
        })
        .collect()
}

pub async fn run_replay(args: ReplayArgs) -> Result<()> {
    let rows = read_pnl_log(&args.log)?;
    let engine = args.engine.build_engine(args.history.as_deref())?;

    tracing::info!(days = rows.len(), log = %args.log.display(), "Replaying P&L log");
    let steps = replay(&engine, &rows);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
    } else {
        println!(
            "{:<12} {:>10} {:>10} {:>7} {:>7} {:>10}  reason",
            "date", "pnl", "limit", "streak", "notch", "notch $"
        );
        for step in &steps {
            println!(
                "{:<12} {:>10} {:>10} {:>7} {:>3}->{:<3} {:>10}  {}",
                step.date.to_string(),
                step.pnl.to_string(),
                step.daily_limit.to_string(),
                step.loss_streak,
                step.notch_from,
                step.notch_to,
                step.notch_limit.to_string(),
                step.reason.as_deref().unwrap_or("no_activity"),
            );
        }
        let last = steps.last().map(|s| s.date);
        if let Some(day) = last {
            println!();
            println!("{}", engine.status(day));
        }
    }

    if let Some(path) = &args.output {
        engine.history().save(path)?;
        tracing::info!(path = %path.display(), "History log written");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_and_sorts_rows() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date,pnl").unwrap();
        writeln!(file, "2024-03-05, -120.5").unwrap();
        writeln!(file, "2024-03-04,80").unwrap();

        let rows = read_pnl_log(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].pnl, dec!(80));
        assert_eq!(rows[1].pnl, dec!(-120.5));
    }

    #[test]
    fn bad_rows_are_reported() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date,pnl").unwrap();
        writeln!(file, "yesterday,12").unwrap();
        assert!(read_pnl_log(file.path()).is_err());
    }

    #[test]
    fn replay_tracks_streak_and_limits() {
        let engine = EngineArgs::default().build_engine(None).unwrap();
        let day = |d| chrono::NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        let rows = vec![
            PnlRow { date: day(4), pnl: dec!(-50) },
            PnlRow { date: day(5), pnl: dec!(-50) },
            PnlRow { date: day(6), pnl: dec!(0) },
            PnlRow { date: day(7), pnl: dec!(30) },
        ];

        let steps = replay(&engine, &rows);
        let limits: Vec<_> = steps.iter().map(|s| s.daily_limit).collect();
        let streaks: Vec<_> = steps.iter().map(|s| s.loss_streak).collect();

        assert_eq!(limits, vec![dec!(500), dec!(300), dec!(200), dec!(200)]);
        assert_eq!(streaks, vec![1, 2, 2, 0]);
        assert!(steps[2].reason.is_none());
        assert!(steps.iter().all(|s| s.notch_to < 6));
    }

    #[test]
    fn small_losing_row_keeps_the_notch() {
        let engine = EngineArgs::default().build_engine(None).unwrap();
        let day = chrono::NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        let steps = replay(&engine, &[PnlRow { date: day, pnl: dec!(-20) }]);
        assert_eq!(steps[0].notch_from, 2);
        assert_eq!(steps[0].notch_to, 2);
        assert_eq!(steps[0].reason.as_deref(), Some("tolerated_loss"));
        assert_eq!(steps[0].loss_streak, 1);
    }
}
