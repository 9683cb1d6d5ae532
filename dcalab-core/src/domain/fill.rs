use serde::{Deserialize, Serialize};

use super::{OrderId, OrderSide};

/// An execution recorded by the simulated broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub bar_index: usize,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub slippage: f64,
}

impl Fill {
    /// Quote value of the fill before commission.
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}
