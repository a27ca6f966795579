//! Open positions owned by one portfolio.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use odte_risk_core::{StrategySpecification, TradingDay};

use crate::correlation::ExposureItem;

pub type PositionId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub spec: StrategySpecification,
    pub units: u32,
    pub per_unit_loss: Decimal,
    /// `units × per_unit_loss`, reserved against the ledger while open.
    pub max_loss: Decimal,
    pub beta: Option<f64>,
    pub opened_on: TradingDay,
    /// Day whose budget currently holds `max_loss`. Moves forward while the
    /// position stays open across day ends.
    pub reserved_on: TradingDay,
}

impl Position {
    #[must_use]
    pub fn exposure_item(&self) -> ExposureItem {
        ExposureItem {
            symbol: self.symbol.clone(),
            max_loss: self.max_loss,
            beta: self.beta,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    positions: BTreeMap<PositionId, Position>,
    next_id: PositionId,
}

impl Portfolio {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &mut self,
        symbol: &str,
        spec: StrategySpecification,
        units: u32,
        per_unit_loss: Decimal,
        beta: Option<f64>,
        opened_on: TradingDay,
    ) -> &Position {
        self.next_id += 1;
        let id = self.next_id;
        self.positions.entry(id).or_insert(Position {
            id,
            symbol: symbol.to_string(),
            spec,
            units,
            per_unit_loss,
            max_loss: per_unit_loss * Decimal::from(units),
            beta,
            opened_on,
            reserved_on: opened_on,
        })
    }

    /// Moves every reservation held on a day before `day` onto `day`.
    /// Returns the `(previous day, max loss)` of each moved position.
    pub fn roll_reservations(&mut self, day: TradingDay) -> Vec<(TradingDay, Decimal)> {
        self.positions
            .values_mut()
            .filter(|p| p.reserved_on < day)
            .map(|p| {
                let from = std::mem::replace(&mut p.reserved_on, day);
                (from, p.max_loss)
            })
            .collect()
    }

    pub fn close(&mut self, id: PositionId) -> Option<Position> {
        self.positions.remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Exposure inputs rebuilt from the current open set.
    #[must_use]
    pub fn exposure_items(&self) -> Vec<ExposureItem> {
        self.positions.values().map(Position::exposure_item).collect()
    }

    /// Sum of max loss across open positions.
    #[must_use]
    pub fn open_risk(&self) -> Decimal {
        self.positions.values().map(|p| p.max_loss).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use odte_risk_core::StructureType;
    use rust_decimal_macros::dec;

    fn day() -> TradingDay {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn condor() -> StrategySpecification {
        StrategySpecification::new(StructureType::IronCondor, dec!(2), dec!(0.6))
    }

    #[test]
    fn open_assigns_ids_and_max_loss() {
        let mut portfolio = Portfolio::new();
        let first = portfolio.open("SPX", condor(), 3, dec!(140), Some(1.0), day()).id;
        let second = portfolio.open("QQQ", condor(), 1, dec!(140), None, day()).id;

        assert_ne!(first, second);
        assert_eq!(portfolio.get(first).unwrap().max_loss, dec!(420));
        assert_eq!(portfolio.open_risk(), dec!(560));
        assert_eq!(portfolio.exposure_items().len(), 2);
    }

    #[test]
    fn close_removes_position() {
        let mut portfolio = Portfolio::new();
        let id = portfolio.open("SPX", condor(), 1, dec!(140), None, day()).id;

        let closed = portfolio.close(id).unwrap();
        assert_eq!(closed.symbol, "SPX");
        assert!(portfolio.is_empty());
        assert!(portfolio.close(id).is_none());
    }

    #[test]
    fn reservations_roll_forward_once() {
        let mut portfolio = Portfolio::new();
        let id = portfolio.open("SPX", condor(), 2, dec!(140), None, day()).id;
        let next = day() + chrono::Duration::days(1);

        assert!(portfolio.roll_reservations(day()).is_empty());
        assert_eq!(portfolio.roll_reservations(next), vec![(day(), dec!(280))]);
        assert!(portfolio.roll_reservations(next).is_empty());

        let position = portfolio.get(id).unwrap();
        assert_eq!(position.opened_on, day());
        assert_eq!(position.reserved_on, next);
    }
}
