//! Status command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use odte_risk_engine::RiskStatus;

use super::{parse_day, EngineArgs};

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// History log to restore from (missing file means cold start)
    #[arg(long, default_value = "data/risk_history.json")]
    pub history: PathBuf,

    /// Trading day (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    pub day: Option<String>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl StatusArgs {
    /// Restores the engine from the history log and snapshots the requested day.
    pub fn snapshot(&self) -> Result<RiskStatus> {
        let day = parse_day(self.day.as_deref())?;
        let engine = self.engine.build_engine(Some(&self.history))?;
        Ok(engine.status(day))
    }
}

pub async fn run_status(args: StatusArgs) -> Result<()> {
    let status = args.snapshot()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{status}");
    }

    Ok(())
}
