//! Order book: order storage, lifecycle transitions and OCO enforcement for
//! the simulated broker.
//!
//! Orders move Pending → (Triggered) → Filled / Cancelled / Rejected / Margin.
//! A fill cancels every active sibling in the order's OCO group. Cancelling an
//! order that is already terminal is reported, not treated as an error, since
//! a cancel request racing a fill is routine.
//!
//! The book does not compute fill prices; see `trigger` and `cost_model`.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::domain::{OcoGroup, OcoGroupId, Order, OrderAuditEntry, OrderId, OrderStatus};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderBookError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} is not active (status: {1})")]
    OrderNotActive(OrderId, String),
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The order had already reached a terminal status; nothing changed.
    AlreadyTerminal,
}

#[derive(Debug, Default)]
pub struct OrderBook {
    /// Ordered by id so iteration follows submission order.
    orders: BTreeMap<OrderId, Order>,

    oco_groups: HashMap<OcoGroupId, OcoGroup>,

    audit_trail: Vec<OrderAuditEntry>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Public API ─────────────────────────────────────────────────────

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn get_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    /// Add an order. It must be Pending.
    pub fn submit(&mut self, order: Order) {
        debug_assert!(
            order.status == OrderStatus::Pending,
            "submitted order must be Pending"
        );
        self.orders.insert(order.id, order);
    }

    /// Link `order_id` with `partner_id`. The order joins the partner's OCO
    /// group, or a new group `new_group` is created for the two of them.
    /// Returns the group the order now belongs to.
    pub fn link_oco(
        &mut self,
        order_id: OrderId,
        partner_id: OrderId,
        new_group: OcoGroupId,
    ) -> Result<OcoGroupId, OrderBookError> {
        let partner = self
            .orders
            .get(&partner_id)
            .ok_or(OrderBookError::OrderNotFound(partner_id))?;
        let partner_group = partner.oco_group_id;
        if !self.orders.contains_key(&order_id) {
            return Err(OrderBookError::OrderNotFound(order_id));
        }

        let group_id = match partner_group {
            Some(existing) => {
                if let Some(group) = self.oco_groups.get_mut(&existing) {
                    group.order_ids.push(order_id);
                }
                existing
            }
            None => {
                self.oco_groups.insert(
                    new_group,
                    OcoGroup {
                        id: new_group,
                        order_ids: vec![partner_id, order_id],
                    },
                );
                if let Some(partner) = self.orders.get_mut(&partner_id) {
                    partner.oco_group_id = Some(new_group);
                }
                new_group
            }
        };

        if let Some(order) = self.orders.get_mut(&order_id) {
            order.oco_group_id = Some(group_id);
        }
        Ok(group_id)
    }

    /// Mark an order filled. Returns the OCO siblings cancelled as a result,
    /// in id order.
    pub fn record_fill(
        &mut self,
        order_id: OrderId,
        bar_index: usize,
    ) -> Result<Vec<OrderId>, OrderBookError> {
        self.transition(order_id, OrderStatus::Filled, bar_index, "filled")?;
        Ok(self.cancel_oco_siblings(order_id, bar_index))
    }

    /// Trailing stop hit, waiting for its limit.
    pub fn trigger(&mut self, order_id: OrderId, bar_index: usize) -> Result<(), OrderBookError> {
        self.transition(order_id, OrderStatus::Triggered, bar_index, "stop triggered")
    }

    pub fn cancel(
        &mut self,
        order_id: OrderId,
        bar_index: usize,
        reason: &str,
    ) -> Result<CancelOutcome, OrderBookError> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or(OrderBookError::OrderNotFound(order_id))?;
        if !order.is_active() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        self.transition(
            order_id,
            OrderStatus::Cancelled {
                reason: reason.to_string(),
            },
            bar_index,
            reason,
        )?;
        Ok(CancelOutcome::Cancelled)
    }

    pub fn reject(
        &mut self,
        order_id: OrderId,
        bar_index: usize,
        reason: &str,
    ) -> Result<(), OrderBookError> {
        self.transition(
            order_id,
            OrderStatus::Rejected {
                reason: reason.to_string(),
            },
            bar_index,
            reason,
        )
    }

    pub fn margin(&mut self, order_id: OrderId, bar_index: usize) -> Result<(), OrderBookError> {
        self.transition(order_id, OrderStatus::Margin, bar_index, "insufficient cash")
    }

    /// Ids of active orders in submission order.
    pub fn active_ids(&self) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.is_active())
            .map(|o| o.id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.orders.values().filter(|o| o.is_active()).count()
    }

    pub fn get_oco_group(&self, group_id: OcoGroupId) -> Option<&OcoGroup> {
        self.oco_groups.get(&group_id)
    }

    pub fn audit_trail(&self) -> &[OrderAuditEntry] {
        &self.audit_trail
    }

    // ── Internal helpers ───────────────────────────────────────────────

    fn transition(
        &mut self,
        order_id: OrderId,
        to: OrderStatus,
        bar_index: usize,
        reason: &str,
    ) -> Result<(), OrderBookError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(OrderBookError::OrderNotFound(order_id))?;
        if !order.is_active() {
            return Err(OrderBookError::OrderNotActive(
                order_id,
                format!("{:?}", order.status),
            ));
        }
        let from = std::mem::replace(&mut order.status, to.clone());
        self.audit_trail.push(OrderAuditEntry {
            order_id,
            bar_index,
            from_status: from,
            to_status: to,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn cancel_oco_siblings(&mut self, filled_id: OrderId, bar_index: usize) -> Vec<OrderId> {
        let Some(group_id) = self.orders.get(&filled_id).and_then(|o| o.oco_group_id) else {
            return Vec::new();
        };
        let mut siblings: Vec<OrderId> = match self.oco_groups.get(&group_id) {
            Some(group) => group
                .order_ids
                .iter()
                .copied()
                .filter(|&id| id != filled_id)
                .collect(),
            None => return Vec::new(),
        };
        siblings.sort();

        let mut cancelled = Vec::new();
        for sibling in siblings {
            let active = self.orders.get(&sibling).is_some_and(|o| o.is_active());
            if active
                && self
                    .transition(
                        sibling,
                        OrderStatus::Cancelled {
                            reason: "OCO partner filled".to_string(),
                        },
                        bar_index,
                        "OCO partner filled",
                    )
                    .is_ok()
            {
                cancelled.push(sibling);
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderSide, OrderType};

    // ── Test helpers ───────────────────────────────────────────────────

    fn make_order(id: u64, side: OrderSide, order_type: OrderType) -> Order {
        Order {
            id: OrderId(id),
            side,
            order_type,
            quantity: 1.0,
            status: OrderStatus::Pending,
            oco_group_id: None,
            eligible_bar: 0,
            trail_peak: None,
        }
    }

    fn limit_buy(id: u64, price: f64) -> Order {
        make_order(id, OrderSide::Buy, OrderType::Limit { limit_price: price })
    }

    fn limit_sell(id: u64, price: f64) -> Order {
        make_order(id, OrderSide::Sell, OrderType::Limit { limit_price: price })
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    #[test]
    fn submit_and_fill() {
        let mut book = OrderBook::new();
        book.submit(limit_buy(1, 99.0));
        assert_eq!(book.active_count(), 1);

        let cancelled = book.record_fill(OrderId(1), 0).unwrap();
        assert!(cancelled.is_empty());
        assert_eq!(book.get(OrderId(1)).unwrap().status, OrderStatus::Filled);
        assert_eq!(book.active_count(), 0);
    }

    #[test]
    fn double_fill_fails() {
        let mut book = OrderBook::new();
        book.submit(limit_buy(1, 99.0));
        book.record_fill(OrderId(1), 0).unwrap();
        assert!(matches!(
            book.record_fill(OrderId(1), 1),
            Err(OrderBookError::OrderNotActive(..))
        ));
    }

    #[test]
    fn cancel_active_order() {
        let mut book = OrderBook::new();
        book.submit(limit_sell(1, 101.0));
        assert_eq!(
            book.cancel(OrderId(1), 0, "user").unwrap(),
            CancelOutcome::Cancelled
        );
        assert!(matches!(
            book.get(OrderId(1)).unwrap().status,
            OrderStatus::Cancelled { .. }
        ));
    }

    #[test]
    fn cancel_filled_order_is_noop() {
        let mut book = OrderBook::new();
        book.submit(limit_sell(1, 101.0));
        book.record_fill(OrderId(1), 0).unwrap();
        assert_eq!(
            book.cancel(OrderId(1), 1, "late").unwrap(),
            CancelOutcome::AlreadyTerminal
        );
        assert_eq!(book.get(OrderId(1)).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn cancel_unknown_order_fails() {
        let mut book = OrderBook::new();
        assert_eq!(
            book.cancel(OrderId(9), 0, "x"),
            Err(OrderBookError::OrderNotFound(OrderId(9)))
        );
    }

    #[test]
    fn active_ids_follow_submission_order() {
        let mut book = OrderBook::new();
        book.submit(limit_buy(3, 97.0));
        book.submit(limit_buy(1, 99.0));
        book.submit(limit_buy(2, 98.0));
        assert_eq!(book.active_ids(), vec![OrderId(1), OrderId(2), OrderId(3)]);
    }

    // ── OCO ────────────────────────────────────────────────────────────

    #[test]
    fn oco_fill_cancels_partner() {
        let mut book = OrderBook::new();
        book.submit(limit_sell(1, 101.0));
        book.submit(limit_buy(2, 99.0));
        book.link_oco(OrderId(2), OrderId(1), OcoGroupId(1)).unwrap();

        let cancelled = book.record_fill(OrderId(2), 4).unwrap();
        assert_eq!(cancelled, vec![OrderId(1)]);
        assert!(matches!(
            book.get(OrderId(1)).unwrap().status,
            OrderStatus::Cancelled { ref reason } if reason == "OCO partner filled"
        ));
    }

    #[test]
    fn link_joins_existing_group() {
        let mut book = OrderBook::new();
        book.submit(limit_sell(1, 101.0));
        book.submit(limit_buy(2, 99.0));
        book.submit(limit_buy(3, 98.0));
        let g = book.link_oco(OrderId(2), OrderId(1), OcoGroupId(1)).unwrap();
        let g2 = book.link_oco(OrderId(3), OrderId(1), OcoGroupId(2)).unwrap();
        assert_eq!(g, g2);
        assert_eq!(book.get_oco_group(g).unwrap().order_ids.len(), 3);

        let cancelled = book.record_fill(OrderId(1), 0).unwrap();
        assert_eq!(cancelled, vec![OrderId(2), OrderId(3)]);
    }

    #[test]
    fn oco_partners_never_both_fill() {
        let mut book = OrderBook::new();
        book.submit(limit_sell(1, 101.0));
        book.submit(limit_buy(2, 99.0));
        book.link_oco(OrderId(2), OrderId(1), OcoGroupId(1)).unwrap();

        book.record_fill(OrderId(1), 0).unwrap();
        assert!(book.record_fill(OrderId(2), 0).is_err());
    }

    #[test]
    fn link_with_unknown_partner_fails() {
        let mut book = OrderBook::new();
        book.submit(limit_buy(2, 99.0));
        assert_eq!(
            book.link_oco(OrderId(2), OrderId(1), OcoGroupId(1)),
            Err(OrderBookError::OrderNotFound(OrderId(1)))
        );
    }

    // ── Audit ──────────────────────────────────────────────────────────

    #[test]
    fn audit_trail_records_oco_cancellations() {
        let mut book = OrderBook::new();
        book.submit(limit_sell(1, 101.0));
        book.submit(limit_buy(2, 99.0));
        book.link_oco(OrderId(2), OrderId(1), OcoGroupId(1)).unwrap();
        book.record_fill(OrderId(2), 7).unwrap();

        let trail = book.audit_trail();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].order_id, OrderId(2));
        assert_eq!(trail[0].to_status, OrderStatus::Filled);
        assert_eq!(trail[1].order_id, OrderId(1));
        assert_eq!(trail[1].reason, "OCO partner filled");
        assert!(trail.iter().all(|e| e.bar_index == 7));
    }

    #[test]
    fn margin_and_reject_are_terminal() {
        let mut book = OrderBook::new();
        book.submit(limit_buy(1, 99.0));
        book.submit(limit_buy(2, 98.0));
        book.margin(OrderId(1), 0).unwrap();
        book.reject(OrderId(2), 0, "bad quantity").unwrap();
        assert_eq!(book.active_count(), 0);
        assert_eq!(
            book.cancel(OrderId(1), 0, "x").unwrap(),
            CancelOutcome::AlreadyTerminal
        );
    }
}
