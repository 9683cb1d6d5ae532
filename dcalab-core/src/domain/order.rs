//! Order requests, order state and OCO groups.

use super::ids::{OcoGroupId, OrderId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// What kind of order and its price parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Fill at the next bar's open.
    Market,
    /// Fill at limit price or better.
    Limit { limit_price: f64 },
    /// Sell-side trailing stop-limit. Dormant until price reaches
    /// `activation_price`; from then on the stop trails the highest high by
    /// `trail_percent` and, once hit, fills no worse than `limit_price`.
    TrailingStopLimit {
        activation_price: f64,
        trail_percent: f64,
        limit_price: f64,
    },
}

impl OrderType {
    /// Reference price for display and logging (`None` for market orders).
    pub fn reference_price(&self) -> Option<f64> {
        match self {
            OrderType::Market => None,
            OrderType::Limit { limit_price } => Some(*limit_price),
            OrderType::TrailingStopLimit { limit_price, .. } => Some(*limit_price),
        }
    }
}

/// Order lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Working, waiting for a trigger or fill.
    Pending,
    /// Trailing stop hit but limit not yet reached.
    Triggered,
    Filled,
    /// Cancelled with a reason (OCO partner filled, explicit cancel).
    Cancelled { reason: String },
    /// Refused by the broker at submission or at fill time.
    Rejected { reason: String },
    /// Buy fill would have exceeded available cash.
    Margin,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending | OrderStatus::Triggered)
    }
}

/// What a caller asks the broker to place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Existing order this one is OCO-linked with.
    pub oco_partner: Option<OrderId>,
}

impl OrderRequest {
    pub fn market_buy(quantity: f64) -> Self {
        Self {
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity,
            oco_partner: None,
        }
    }

    pub fn limit_buy(limit_price: f64, quantity: f64) -> Self {
        Self {
            side: OrderSide::Buy,
            order_type: OrderType::Limit { limit_price },
            quantity,
            oco_partner: None,
        }
    }

    pub fn limit_sell(limit_price: f64, quantity: f64) -> Self {
        Self {
            side: OrderSide::Sell,
            order_type: OrderType::Limit { limit_price },
            quantity,
            oco_partner: None,
        }
    }

    pub fn trailing_sell(
        activation_price: f64,
        trail_percent: f64,
        limit_price: f64,
        quantity: f64,
    ) -> Self {
        Self {
            side: OrderSide::Sell,
            order_type: OrderType::TrailingStopLimit {
                activation_price,
                trail_percent,
                limit_price,
            },
            quantity,
            oco_partner: None,
        }
    }

    pub fn with_oco(mut self, partner: OrderId) -> Self {
        self.oco_partner = Some(partner);
        self
    }
}

/// A single order held by the simulated broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub status: OrderStatus,
    /// OCO group this order belongs to.
    pub oco_group_id: Option<OcoGroupId>,
    /// First bar index on which the order may trigger. Orders placed while
    /// bar T is being processed are not eligible until bar T+1.
    pub eligible_bar: usize,
    /// Highest high seen since a trailing order armed. `None` while dormant.
    pub trail_peak: Option<f64>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// One-cancels-other group: when any member fills, the others are cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcoGroup {
    pub id: OcoGroupId,
    pub order_ids: Vec<OrderId>,
}

/// Audit trail entry for an order state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAuditEntry {
    pub order_id: OrderId,
    pub bar_index: usize,
    pub from_status: OrderStatus,
    pub to_status: OrderStatus,
    pub reason: String,
}
