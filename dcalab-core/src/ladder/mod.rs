//! DCA ladder: the precomputed sequence of safety-order levels for one deal.
//!
//! A `Ladder` is computed once from `Parameters` and the realized entry price
//! and never mutated afterwards. Consumption of levels during a deal is tracked
//! by a `LadderCursor`, so the full ladder and the unfilled remainder are both
//! available at any time.

pub mod calculator;
pub mod params;
pub mod table;

pub use calculator::compute;
pub use params::{LadderConfig, LadderShape, Parameters, SizingKind, SizingMode};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from ladder construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LadderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("numeric invalid state: {0}")]
    NumericInvalidState(String),
}

/// One safety-order level. Cumulative figures include the base order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Position in the originally computed ladder.
    pub index: usize,
    pub deviation_percent: f64,
    pub price: f64,
    pub quantity: f64,
    pub quantity_quote: f64,
    pub total_quantity: f64,
    pub total_quantity_quote: f64,
    pub weighted_average_price: f64,
    /// Take-profit price once this level has filled.
    pub required_price: f64,
    /// Rise from `price` to `required_price`, in percent.
    pub required_change_percent: f64,
    /// Profit if everything accumulated through this level exits at `required_price`.
    pub profit_quote: f64,
    /// `profit_quote` relative to the base-order-only profit, in percent.
    pub roi_percent: f64,
}

/// Immutable ladder plus the base-order figures it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ladder {
    pub entry_price: f64,
    pub target_profit_percent: f64,
    pub sizing_kind: SizingKind,
    pub safety_orders_active_max: u32,
    pub base_order_quantity: f64,
    pub base_order_quantity_quote: f64,
    pub base_order_required_price: f64,
    pub base_order_profit_quote: f64,
    levels: Vec<Level>,
}

impl Ladder {
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&Level> {
        self.levels.get(index)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Capital committed if every level fills (base order alone for an empty ladder).
    pub fn final_total_quantity_quote(&self) -> f64 {
        self.levels
            .last()
            .map(|l| l.total_quantity_quote)
            .unwrap_or(self.base_order_quantity_quote)
    }
}

/// Fill cursor over an immutable ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderCursor {
    ladder: Ladder,
    filled: usize,
}

impl LadderCursor {
    pub fn new(ladder: Ladder) -> Self {
        Self { ladder, filled: 0 }
    }

    /// The full, originally computed ladder.
    pub fn ladder(&self) -> &Ladder {
        &self.ladder
    }

    pub fn levels(&self) -> &[Level] {
        self.ladder.levels()
    }

    /// Levels not yet filled, in ladder order.
    pub fn remaining(&self) -> &[Level] {
        &self.ladder.levels[self.filled..]
    }

    pub fn filled_count(&self) -> usize {
        self.filled
    }

    /// The level the next safety order is placed at.
    pub fn next_pending(&self) -> Option<&Level> {
        self.ladder.levels.get(self.filled)
    }

    /// The deepest level filled so far.
    pub fn last_filled(&self) -> Option<&Level> {
        self.filled
            .checked_sub(1)
            .and_then(|i| self.ladder.levels.get(i))
    }

    /// Marks the next pending level as filled and returns it.
    /// Returns `None` (and does not move) once every level is filled.
    pub fn advance(&mut self) -> Option<&Level> {
        if self.filled >= self.ladder.levels.len() {
            return None;
        }
        self.filled += 1;
        self.ladder.levels.get(self.filled - 1)
    }

    pub fn is_exhausted(&self) -> bool {
        self.filled >= self.ladder.levels.len()
    }

    /// Quantity held and the take-profit price for it, given the fills so far.
    pub fn take_profit_target(&self) -> (f64, f64) {
        match self.last_filled() {
            Some(level) => (level.total_quantity, level.required_price),
            None => (
                self.ladder.base_order_quantity,
                self.ladder.base_order_required_price,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder_of(n: u32) -> Ladder {
        let params = Parameters::new(
            LadderShape {
                target_profit_percent: 1.0,
                safety_orders_max: n,
                safety_orders_active_max: n,
                safety_order_volume_scale: 1.0,
                safety_order_step_scale: 1.0,
                safety_order_price_deviation_percent: 1.0,
            },
            SizingMode::ByBaseAsset {
                base_order_size: 1.0,
                safety_order_size: 1.0,
            },
        )
        .unwrap();
        compute(&params, 100.0).unwrap()
    }

    #[test]
    fn cursor_starts_before_first_level() {
        let cursor = LadderCursor::new(ladder_of(3));
        assert_eq!(cursor.filled_count(), 0);
        assert!(cursor.last_filled().is_none());
        assert_eq!(cursor.next_pending().unwrap().index, 0);
        assert_eq!(cursor.remaining().len(), 3);
    }

    #[test]
    fn advance_reindexes_remaining_by_one() {
        let mut cursor = LadderCursor::new(ladder_of(3));
        let before: Vec<Level> = cursor.levels().to_vec();

        let filled = cursor.advance().cloned().unwrap();
        assert_eq!(filled, before[0]);

        let remaining = cursor.remaining();
        assert_eq!(remaining.len(), before.len() - 1);
        for (i, level) in remaining.iter().enumerate() {
            assert_eq!(level, &before[i + 1]);
        }
        // Full ladder still intact.
        assert_eq!(cursor.levels(), before.as_slice());
        assert_eq!(cursor.last_filled(), Some(&before[0]));
    }

    #[test]
    fn advance_past_end_is_none() {
        let mut cursor = LadderCursor::new(ladder_of(1));
        assert!(cursor.advance().is_some());
        assert!(cursor.is_exhausted());
        assert!(cursor.advance().is_none());
        assert_eq!(cursor.filled_count(), 1);
        assert!(cursor.next_pending().is_none());
    }

    #[test]
    fn take_profit_target_tracks_fills() {
        let mut cursor = LadderCursor::new(ladder_of(2));
        let (qty, price) = cursor.take_profit_target();
        assert_eq!(qty, 1.0);
        assert!((price - 101.0).abs() < 1e-9);

        cursor.advance();
        let (qty, price) = cursor.take_profit_target();
        assert!((qty - 2.0).abs() < 1e-12);
        assert!((price - 100.495).abs() < 1e-9);
    }

    #[test]
    fn empty_ladder_total_is_base_order() {
        let ladder = ladder_of(0);
        assert!(ladder.is_empty());
        assert_eq!(ladder.final_total_quantity_quote(), 100.0);
    }
}
