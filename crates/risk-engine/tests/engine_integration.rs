use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use odte_risk_core::{
    CorrelationFeed, EngineConfig, NotchConfig, RiskError, StrategySpecification, StructureType,
    TradeOutcome, TradingDay,
};
use odte_risk_engine::{
    HistoryEntry, HistoryLog, RejectionReason, RiskEngine, SizingPath, SpreadMaxLoss, StaticCorrelations,
    TradeProposal,
};

fn day(d: u32) -> TradingDay {
    NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
}

fn engine_with(config: EngineConfig, correlations: StaticCorrelations) -> RiskEngine {
    RiskEngine::new(config, Arc::new(correlations), Arc::new(SpreadMaxLoss)).unwrap()
}

fn default_engine() -> RiskEngine {
    engine_with(EngineConfig::default(), StaticCorrelations::new())
}

fn condor(width: Decimal, credit: Decimal) -> StrategySpecification {
    StrategySpecification::new(StructureType::IronCondor, width, credit)
}

fn loss(engine: &RiskEngine, d: u32, amount: Decimal) {
    engine.record_outcome(&TradeOutcome {
        day: day(d),
        pnl: -amount,
    });
}

#[test]
fn cold_start_uses_top_of_schedule_and_middle_notch() {
    let engine = default_engine();
    let status = engine.status(day(1));

    assert_eq!(status.daily_limit, dec!(500));
    assert_eq!(status.remaining_budget, dec!(500));
    assert_eq!(status.loss_streak, 0);
    assert_eq!(status.notch_index, 2);
    assert_eq!(status.notch_limit, dec!(500));
    assert_eq!(status.history_days, 0);
}

#[test]
fn remaining_budget_never_negative_and_notch_stays_in_bounds() {
    let engine = default_engine();
    let losses = [
        dec!(750),
        dec!(20),
        dec!(1000),
        dec!(0.01),
        dec!(400),
        dec!(5000),
        dec!(99),
        dec!(250),
    ];

    for (i, amount) in losses.iter().enumerate() {
        let d = i as u32 + 1;
        loss(&engine, d, *amount);
        loss(&engine, d, *amount);

        let status = engine.status(day(d));
        assert!(status.remaining_budget >= Decimal::ZERO);
        assert!(status.available_budget >= Decimal::ZERO);

        engine.finalize_day(day(d));
        let after = engine.status(day(d + 1));
        assert!(after.notch_index < after.notch_count);
    }

    let status = engine.status(day(20));
    assert_eq!(status.loss_streak, losses.len() as u32);
    assert_eq!(status.daily_limit, dec!(100));
    assert_eq!(status.notch_index, status.notch_count - 1);
}

#[test]
fn approved_risk_never_exceeds_daily_limit() {
    let engine = default_engine();
    loss(&engine, 1, dec!(60));

    let specs = [
        condor(dec!(1), dec!(0.7)),
        condor(dec!(2), dec!(0.6)),
        condor(dec!(5), dec!(1.5)),
        condor(dec!(1), dec!(0.2)),
        condor(dec!(3), dec!(1.8)),
    ];

    let mut approved = Decimal::ZERO;
    for round in 0..6 {
        for (i, spec) in specs.iter().enumerate() {
            let symbol = format!("SYM{round}{i}");
            let decision = engine.evaluate(day(1), &TradeProposal::new(symbol, spec.clone()), None);
            if decision.is_approved() {
                assert!(decision.max_loss <= decision.available_budget);
                approved += decision.max_loss;
            }
        }
    }

    let status = engine.status(day(1));
    assert!(approved > Decimal::ZERO);
    assert!(approved + dec!(60) <= status.daily_limit);
    assert_eq!(status.open_risk, approved);
}

#[test]
fn concurrent_evaluation_never_overcommits() {
    let engine = default_engine();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                (0..5)
                    .map(|i| {
                        let proposal =
                            TradeProposal::new(format!("T{t}-{i}"), condor(dec!(1), dec!(0.6)));
                        engine.evaluate(day(2), &proposal, None).max_loss
                    })
                    .sum::<Decimal>()
            })
        })
        .collect();

    let total: Decimal = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(total <= dec!(500));
    assert_eq!(engine.status(day(2)).open_risk, total);
}

#[test]
fn losing_streak_shrinks_limit_and_one_profit_resets_it() {
    let engine = default_engine();
    for (d, expected_next) in [(1, dec!(300)), (2, dec!(200)), (3, dec!(100)), (4, dec!(100))] {
        loss(&engine, d, dec!(50));
        engine.finalize_day(day(d));
        assert_eq!(engine.status(day(d + 1)).daily_limit, expected_next);
    }

    engine.record_outcome(&TradeOutcome {
        day: day(5),
        pnl: dec!(25),
    });
    engine.finalize_day(day(5));

    let status = engine.status(day(6));
    assert_eq!(status.loss_streak, 0);
    assert_eq!(status.daily_limit, dec!(500));
}

#[test]
fn three_heavy_losing_days_walk_the_ladder() {
    let config = EngineConfig {
        notch: NotchConfig {
            ladder: vec![dec!(1000), dec!(600), dec!(350), dec!(200), dec!(100)],
            start_index: Some(0),
            loss_sensitivity: dec!(0.5),
            absolute_loss_trigger: dec!(100000),
            ..NotchConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = engine_with(config, StaticCorrelations::new());

    for (d, amount) in [(1, dec!(350)), (2, dec!(210)), (3, dec!(122.5))] {
        loss(&engine, d, amount);
        engine.finalize_day(day(d));
    }

    let status = engine.status(day(4));
    assert_eq!(status.notch_index, 3);
    assert_eq!(status.notch_limit, dec!(200));
}

#[test]
fn small_profit_does_not_move_the_notch() {
    let engine = default_engine();
    engine.record_outcome(&TradeOutcome {
        day: day(1),
        pnl: dec!(25),
    });
    let report = engine.finalize_day(day(1)).unwrap();
    let transition = report.transition.unwrap();
    assert_eq!(transition.from_index, transition.to_index);
}

#[test]
fn restore_rebuilds_state_from_saved_history() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.json");

    let engine = default_engine();
    engine.record_outcome(&TradeOutcome {
        day: day(1),
        pnl: dec!(40),
    });
    engine.finalize_day(day(1));
    loss(&engine, 2, dec!(200));
    engine.finalize_day(day(2));
    loss(&engine, 3, dec!(30));
    engine.finalize_day(day(3));

    let before = engine.status(day(4));
    engine.history().save(&path).unwrap();

    let restored = RiskEngine::restore(
        EngineConfig::default(),
        Arc::new(StaticCorrelations::new()),
        Arc::new(SpreadMaxLoss),
        HistoryLog::load(&path).unwrap(),
    )
    .unwrap();
    let after = restored.status(day(4));

    assert_eq!(after.loss_streak, 2);
    assert_eq!(after.loss_streak, before.loss_streak);
    assert_eq!(after.daily_limit, before.daily_limit);
    assert_eq!(after.notch_index, before.notch_index);
    assert_eq!(after.cumulative_pnl, dec!(-190));
    assert_eq!(after.max_drawdown, dec!(230));
}

#[test]
fn correlated_position_is_rejected_at_the_ceiling() {
    let mut config = EngineConfig::default();
    config.correlation.ceiling = 0.25;
    let correlations = StaticCorrelations::new()
        .with_beta("SPX", 1.0)
        .with_correlation("SPX", "SPY", 0.95);
    let engine = engine_with(config, correlations);

    let first = engine.evaluate(day(1), &TradeProposal::new("SPX", condor(dec!(1), dec!(0.7))), None);
    assert!(first.is_approved());
    assert_eq!(first.units, 4);

    let second = engine.evaluate(day(1), &TradeProposal::new("SPY", condor(dec!(1), dec!(0.7))), None);
    assert_eq!(second.rejection, Some(RejectionReason::ExceedsCorrelationBudget));
    assert_eq!(second.correlation.map(|s| s.units), Some(0));
}

#[test]
fn probe_trade_only_on_a_flat_book() {
    let engine = default_engine();
    loss(&engine, 1, dec!(400));

    // 70 per unit against a 40 allowance; width 1 cannot narrow further.
    let proposal = TradeProposal::new("SPX", condor(dec!(1), dec!(0.3)));
    let probe = engine.evaluate(day(1), &proposal, None);
    assert!(probe.is_approved(), "{probe:?}");
    assert_eq!(probe.path, Some(SizingPath::Probe));
    assert_eq!(probe.units, 1);
    assert!(probe.cap.is_empty());

    let second = engine.evaluate(day(1), &proposal, None);
    assert_eq!(second.rejection, Some(RejectionReason::ZeroEligibleUnits));
}

#[test]
fn cheaper_structures_are_never_refused_when_costlier_pass() {
    let history = HistoryLog::from_entries((1..=3).map(|d| HistoryEntry {
        date: day(d),
        pnl: dec!(-150),
        notch_index_after: 2,
    }));

    let mut outcomes = Vec::new();
    for cents in (5..100).step_by(5) {
        let engine = RiskEngine::restore(
            EngineConfig::default(),
            Arc::new(StaticCorrelations::new()),
            Arc::new(SpreadMaxLoss),
            history.clone(),
        )
        .unwrap();
        assert_eq!(engine.status(day(4)).daily_limit, dec!(100));

        let credit = Decimal::new(100 - cents, 2);
        let proposal = TradeProposal::new("SPX", condor(dec!(1), credit));
        let decision = engine.evaluate(day(4), &proposal, None);
        assert_eq!(decision.per_unit_loss, Decimal::from(cents));
        outcomes.push((cents, decision.is_approved(), decision.units));
    }

    for pair in outcomes.windows(2) {
        let (cheap, costly) = (pair[0], pair[1]);
        assert!(cheap.1 || !costly.1, "{cheap:?} refused while {costly:?} passed");
        assert!(cheap.2 >= costly.2, "{cheap:?} sized below {costly:?}");
    }
    assert!(outcomes.iter().all(|o| o.1));
}

#[test]
fn open_position_carries_its_risk_into_the_next_day() {
    let engine = default_engine();
    let proposal = TradeProposal::new("SPX", condor(dec!(1), dec!(0.7)));
    let carried = engine.evaluate(day(1), &proposal, None);
    assert_eq!(carried.max_loss, dec!(150));
    engine.finalize_day(day(1));

    let status = engine.status(day(2));
    assert_eq!(status.remaining_budget, dec!(500));
    assert_eq!(status.available_budget, dec!(350));

    let mut approved = Decimal::ZERO;
    for i in 0..20 {
        let next = TradeProposal::new(format!("N{i}"), condor(dec!(1), dec!(0.7)));
        let decision = engine.evaluate(day(2), &next, None);
        if decision.is_approved() {
            approved += decision.max_loss;
        }
    }
    assert!(approved > Decimal::ZERO);
    assert!(approved + carried.max_loss <= dec!(500));

    engine
        .close_position(carried.position_id.unwrap(), day(2), -carried.max_loss)
        .unwrap();
    let status = engine.status(day(2));
    assert_eq!(status.remaining_budget, dec!(350));
    assert_eq!(status.open_risk, approved);
    assert_eq!(status.available_budget, dec!(350) - approved);
}

#[test]
fn cap_statistics_follow_evaluations() {
    let engine = default_engine();
    engine.evaluate(day(1), &TradeProposal::new("SPX", condor(dec!(1), dec!(0.7))), None);
    engine.evaluate(day(1), &TradeProposal::new("QQQ", condor(dec!(1), dec!(0.7))), None);

    let stats = engine.validation_statistics();
    assert_eq!(stats.total, engine.validation_records().len());
    assert!(stats.approved >= 1);
}

#[test]
fn closing_unknown_position_is_an_error() {
    let engine = default_engine();
    assert!(matches!(
        engine.close_position(42, day(1), dec!(10)),
        Err(RiskError::UnknownPosition(42))
    ));
}

struct HighBetaFeed;

#[async_trait]
impl CorrelationFeed for HighBetaFeed {
    async fn fetch_beta(&self, symbol: &str) -> Result<f64, RiskError> {
        match symbol {
            "TSLA" => Ok(2.0),
            _ => Err(RiskError::Feed(format!("no beta for {symbol}"))),
        }
    }

    async fn fetch_correlation(&self, _a: &str, _b: &str) -> Result<f64, RiskError> {
        Ok(0.5)
    }
}

#[tokio::test]
async fn refreshed_beta_feeds_exposure() {
    let engine = default_engine();
    let symbols = vec!["TSLA".to_string(), "XYZ".to_string()];

    let snapshot = engine.refresh_correlations(&HighBetaFeed, &symbols).await;
    assert_eq!(snapshot.betas.len(), 1);
    assert_eq!(snapshot.pairs.len(), 1);
    assert_eq!(snapshot.failures.len(), 1);

    let decision = engine.evaluate(day(1), &TradeProposal::new("TSLA", condor(dec!(1), dec!(0.7))), None);
    assert_eq!(decision.units, 5);

    let exposure = engine.status(day(1)).correlation_exposure;
    assert!((exposure - 0.6).abs() < 1e-9, "{exposure}");
}
