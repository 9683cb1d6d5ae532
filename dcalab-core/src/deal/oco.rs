//! The deal's own view of its OCO pair: one take-profit and at most one
//! pending safety order.

use serde::{Deserialize, Serialize};

use crate::domain::OrderId;

/// What an order is to the deal that placed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderRole {
    BaseOrder,
    TakeProfit,
    SafetyOrder,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcoPair {
    take_profit: Option<OrderId>,
    safety_order: Option<OrderId>,
}

impl OcoPair {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_profit(&self) -> Option<OrderId> {
        self.take_profit
    }

    pub fn safety_order(&self) -> Option<OrderId> {
        self.safety_order
    }

    pub fn role_of(&self, id: OrderId) -> Option<OrderRole> {
        if self.take_profit == Some(id) {
            Some(OrderRole::TakeProfit)
        } else if self.safety_order == Some(id) {
            Some(OrderRole::SafetyOrder)
        } else {
            None
        }
    }

    pub fn set_take_profit(&mut self, id: OrderId) {
        self.take_profit = Some(id);
    }

    pub fn set_safety_order(&mut self, id: OrderId) {
        self.safety_order = Some(id);
    }

    /// Fan-out rule: a member filled, so it leaves the pair and its partner
    /// (if still held) must be cancelled. Returns that partner.
    pub fn on_filled(&mut self, id: OrderId) -> Option<OrderId> {
        match self.role_of(id)? {
            OrderRole::TakeProfit => {
                self.take_profit = None;
                self.safety_order
            }
            OrderRole::SafetyOrder => {
                self.safety_order = None;
                self.take_profit
            }
            OrderRole::BaseOrder => None,
        }
    }

    /// A member was cancelled; it leaves the pair. No fan-out.
    pub fn on_canceled(&mut self, id: OrderId) -> Option<OrderRole> {
        let role = self.role_of(id)?;
        match role {
            OrderRole::TakeProfit => self.take_profit = None,
            OrderRole::SafetyOrder => self.safety_order = None,
            OrderRole::BaseOrder => {}
        }
        Some(role)
    }

    pub fn clear(&mut self) {
        self.take_profit = None;
        self.safety_order = None;
    }
}
