//! Size command: evaluates a single proposal and prints the full decision.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, ValueEnum};
use rust_decimal::Decimal;

use odte_risk_core::{MarketConditions, StrategySpecification, StructureType};
use odte_risk_engine::TradeProposal;

use super::{parse_day, EngineArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StructureArg {
    PutSpread,
    CallSpread,
    IronCondor,
    IronButterfly,
}

impl From<StructureArg> for StructureType {
    fn from(arg: StructureArg) -> Self {
        match arg {
            StructureArg::PutSpread => StructureType::PutCreditSpread,
            StructureArg::CallSpread => StructureType::CallCreditSpread,
            StructureArg::IronCondor => StructureType::IronCondor,
            StructureArg::IronButterfly => StructureType::IronButterfly,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SizeArgs {
    /// Underlying symbol
    #[arg(long, default_value = "SPX")]
    pub symbol: String,

    /// Structure type
    #[arg(long, value_enum, default_value = "iron-condor")]
    pub structure: StructureArg,

    /// Wing width in points
    #[arg(long)]
    pub width: Decimal,

    /// Net credit per share
    #[arg(long)]
    pub credit: Decimal,

    /// Contract multiplier
    #[arg(long, default_value = "100")]
    pub multiplier: Decimal,

    /// Upper bound on units
    #[arg(long)]
    pub units: Option<u32>,

    /// Beta to the benchmark (looked up when omitted)
    #[arg(long)]
    pub beta: Option<f64>,

    /// Market volatility level (e.g. VIX) for market-adjusted sizing
    #[arg(long)]
    pub volatility: Option<f64>,

    /// Trading day (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    pub day: Option<String>,

    /// Restore streak and notch from this history log
    #[arg(long)]
    pub history: Option<PathBuf>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl SizeArgs {
    pub fn proposal(&self) -> Result<TradeProposal> {
        if self.multiplier <= Decimal::ZERO {
            return Err(anyhow!("Multiplier must be positive, got {}", self.multiplier));
        }
        let spec = StrategySpecification {
            multiplier: self.multiplier,
            ..StrategySpecification::new(self.structure.into(), self.width, self.credit)
        };
        let mut proposal = TradeProposal::new(self.symbol.clone(), spec);
        proposal.beta = self.beta;
        proposal.requested_units = self.units;
        Ok(proposal)
    }

    pub fn market(&self) -> Option<MarketConditions> {
        self.volatility.map(|volatility| MarketConditions {
            volatility,
            ..MarketConditions::default()
        })
    }
}

pub async fn run_size(args: SizeArgs) -> Result<()> {
    let day = parse_day(args.day.as_deref())?;
    let proposal = args.proposal()?;
    let market = args.market();
    let engine = args.engine.build_engine(args.history.as_deref())?;

    let decision = engine.evaluate(day, &proposal, market.as_ref());

    tracing::info!(
        approved = decision.is_approved(),
        units = decision.units,
        reason = ?decision.rejection,
        "Proposal evaluated"
    );
    println!("{}", serde_json::to_string_pretty(&decision)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rust_decimal_macros::dec;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SizeArgs,
    }

    #[test]
    fn parses_proposal_from_flags() {
        let harness = Harness::parse_from([
            "size",
            "--symbol",
            "SPY",
            "--structure",
            "put-spread",
            "--width",
            "2",
            "--credit",
            "0.45",
            "--units",
            "3",
            "--volatility",
            "32.5",
        ]);

        let proposal = harness.args.proposal().unwrap();
        assert_eq!(proposal.symbol, "SPY");
        assert_eq!(proposal.spec.structure, StructureType::PutCreditSpread);
        assert_eq!(proposal.spec.net_credit, dec!(0.45));
        assert_eq!(proposal.spec.multiplier, dec!(100));
        assert_eq!(proposal.requested_units, Some(3));
        assert_eq!(harness.args.market().map(|m| m.volatility), Some(32.5));
    }

    #[test]
    fn evaluates_against_cold_start_engine() {
        let harness = Harness::parse_from(["size", "--width", "1", "--credit", "0.7", "--day", "2024-03-04"]);
        let engine = harness.args.engine.build_engine(None).unwrap();
        let day = parse_day(harness.args.day.as_deref()).unwrap();

        let decision = engine.evaluate(day, &harness.args.proposal().unwrap(), None);
        assert!(decision.is_approved());
        assert_eq!(decision.units, 5);
    }
}
