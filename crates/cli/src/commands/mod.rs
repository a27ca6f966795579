//! CLI commands for the risk engine.

pub mod replay;
pub mod size;
pub mod status;

pub use replay::{run_replay, ReplayArgs};
pub use size::{run_size, SizeArgs};
pub use status::{run_status, StatusArgs};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Args;

use odte_risk_core::{ConfigLoader, EngineConfig, TradingDay};
use odte_risk_engine::{HistoryLog, RiskEngine, SpreadMaxLoss, StaticCorrelations};

/// Options shared by every command that builds an engine.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Engine config TOML (defaults to config/Risk.toml + env + config/Risk.json)
    #[arg(short, long, env = "ODTE_RISK_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON file of static betas and correlations
    #[arg(long)]
    pub correlations: Option<PathBuf>,
}

impl EngineArgs {
    pub fn load_config(&self) -> Result<EngineConfig> {
        match &self.config {
            Some(path) => ConfigLoader::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => ConfigLoader::load(),
        }
    }

    pub fn load_correlations(&self) -> Result<StaticCorrelations> {
        let Some(path) = &self.correlations else {
            return Ok(StaticCorrelations::new());
        };
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open correlations file {}", path.display()))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Invalid correlations file {}", path.display()))
    }

    /// Builds an engine, restored from `history` when given.
    pub fn build_engine(&self, history: Option<&Path>) -> Result<RiskEngine> {
        let config = self.load_config()?;
        let correlations = Arc::new(self.load_correlations()?);
        let log = match history {
            Some(path) => HistoryLog::load(path)?,
            None => HistoryLog::new(),
        };
        Ok(RiskEngine::restore(
            config,
            correlations,
            Arc::new(SpreadMaxLoss),
            log,
        )?)
    }
}

pub(crate) fn parse_day(value: Option<&str>) -> Result<TradingDay> {
    match value {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{s}'. Use YYYY-MM-DD")),
        None => Ok(Utc::now().date_naive()),
    }
}
