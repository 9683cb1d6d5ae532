//! Cost model: slippage and commission for simulated fills.
//!
//! Slippage is directional: buyers pay more, sellers receive less.
//! Commission is charged per side in basis points of notional.

use serde::{Deserialize, Serialize};

use crate::domain::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostModel {
    /// Slippage in basis points, applied against the trader.
    pub slippage_bps: f64,
    /// Commission in basis points per side.
    pub commission_bps: f64,
}

impl CostModel {
    pub fn new(slippage_bps: f64, commission_bps: f64) -> Self {
        Self {
            slippage_bps,
            commission_bps,
        }
    }

    pub fn frictionless() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Apply slippage to a raw fill price.
    /// Returns `(slipped_price, slippage_quote_amount)`.
    pub fn apply_slippage(&self, raw_price: f64, side: OrderSide, quantity: f64) -> (f64, f64) {
        if self.slippage_bps == 0.0 {
            return (raw_price, 0.0);
        }
        let fraction = self.slippage_bps / 10_000.0;
        let slipped = match side {
            OrderSide::Buy => raw_price * (1.0 + fraction),
            OrderSide::Sell => raw_price * (1.0 - fraction),
        };
        (slipped, (slipped - raw_price).abs() * quantity)
    }

    /// `commission = price * quantity * commission_bps / 10_000`
    pub fn commission(&self, price: f64, quantity: f64) -> f64 {
        price * quantity * (self.commission_bps / 10_000.0)
    }
}
