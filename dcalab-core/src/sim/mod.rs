//! Simulated broker: a deterministic, bar-driven execution venue.
//!
//! Per bar, active orders are evaluated in submission order. Orders placed
//! while bar T is being handled (including from event handlers) become
//! eligible on bar T+1. Every status change is queued as an `OrderEvent`;
//! callers drain the queue with [`SimBroker::poll_event`] after each bar and
//! after each batch of submissions. Cancels complete through a later
//! `Canceled` event, never inside `cancel`.
//!
//! OCO is enforced broker-side: a fill cancels the order's OCO siblings and
//! the `Canceled` events for them follow the `Filled` event.

pub mod cost_model;
pub mod order_book;
pub mod trigger;

pub use cost_model::CostModel;
pub use order_book::{CancelOutcome, OrderBook, OrderBookError};
pub use trigger::{check_trigger, next_trail_peak, TriggerResult};

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::broker::{Broker, BrokerError, OrderEvent, OrderEventKind, Portfolio};
use crate::domain::{
    Bar, Fill, OcoGroupId, Order, OrderId, OrderRequest, OrderSide, OrderStatus, OrderType,
};

/// Relative slack allowed when a sell slightly exceeds the position because
/// of accumulated floating-point error.
const QUANTITY_EPSILON: f64 = 1e-9;

#[derive(Debug)]
pub struct SimBroker {
    book: OrderBook,
    cost_model: CostModel,
    cash: f64,
    position: f64,
    next_order_id: u64,
    next_oco_id: u64,
    /// Index of the bar most recently processed.
    bar_index: Option<usize>,
    last_bar: Option<Bar>,
    events: VecDeque<OrderEvent>,
    fills: Vec<Fill>,
}

impl SimBroker {
    pub fn new(initial_cash: f64, cost_model: CostModel) -> Self {
        Self {
            book: OrderBook::new(),
            cost_model,
            cash: initial_cash,
            position: 0.0,
            next_order_id: 1,
            next_oco_id: 1,
            bar_index: None,
            last_bar: None,
            events: VecDeque::new(),
            fills: Vec::new(),
        }
    }

    /// Evaluate every eligible active order against `bar`, then mark the
    /// account to the bar's close.
    pub fn process_bar(&mut self, bar: &Bar) {
        let index = self.next_bar_index();
        self.bar_index = Some(index);

        if !bar.is_sane() {
            warn!(bar_index = index, timestamp = %bar.timestamp, "skipping malformed bar");
            return;
        }

        for id in self.book.active_ids() {
            let Some(order) = self.book.get(id) else {
                continue;
            };
            // Cancelled earlier on this bar by an OCO partner's fill.
            if !order.is_active() || order.eligible_bar > index {
                continue;
            }

            match check_trigger(order, bar) {
                TriggerResult::Fill {
                    fill_price,
                    gap_through,
                } => {
                    let slipped = matches!(
                        order.order_type,
                        OrderType::Market | OrderType::TrailingStopLimit { .. }
                    ) && order.status != OrderStatus::Triggered;
                    self.execute(id, fill_price, slipped, gap_through, index);
                }
                TriggerResult::StopTriggeredLimitPending => {
                    if self.book.trigger(id, index).is_ok() {
                        debug!(order = %id, bar_index = index, "trailing stop triggered, limit pending");
                    }
                }
                TriggerResult::NoTrigger => {
                    let peak = next_trail_peak(order, bar);
                    if let Some(order) = self.book.get_mut(id) {
                        if peak.is_some() {
                            order.trail_peak = peak;
                        }
                    }
                }
            }
        }

        self.last_bar = Some(bar.clone());
    }

    /// Next queued order event, oldest first.
    pub fn poll_event(&mut self) -> Option<OrderEvent> {
        self.events.pop_front()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.book.get(id)
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    fn next_bar_index(&self) -> usize {
        self.bar_index.map(|i| i + 1).unwrap_or(0)
    }

    /// Bar index used for audit entries of requests made between bars.
    fn audit_bar(&self) -> usize {
        self.bar_index.unwrap_or(0)
    }

    fn push(&mut self, order_id: OrderId, kind: OrderEventKind) {
        self.events.push_back(OrderEvent::new(order_id, kind));
    }

    fn execute(
        &mut self,
        id: OrderId,
        raw_price: f64,
        slipped: bool,
        gap_through: bool,
        bar_index: usize,
    ) {
        let Some(order) = self.book.get(id) else {
            return;
        };
        let side = order.side;
        let mut quantity = order.quantity;

        let (price, slippage) = if slipped {
            self.cost_model.apply_slippage(raw_price, side, quantity)
        } else {
            (raw_price, 0.0)
        };

        match side {
            OrderSide::Buy => {
                let commission = self.cost_model.commission(price, quantity);
                let cost = price * quantity + commission;
                if cost > self.cash {
                    warn!(order = %id, cost, cash = self.cash, "buy exceeds available cash");
                    if self.book.margin(id, bar_index).is_ok() {
                        self.push(id, OrderEventKind::MarginCall);
                    }
                    return;
                }
                self.cash -= cost;
                self.position += quantity;
            }
            OrderSide::Sell => {
                if quantity > self.position * (1.0 + QUANTITY_EPSILON) + f64::EPSILON {
                    let reason = format!(
                        "sell quantity {quantity} exceeds position {}",
                        self.position
                    );
                    warn!(order = %id, %reason, "rejecting sell");
                    if self.book.reject(id, bar_index, &reason).is_ok() {
                        self.push(id, OrderEventKind::Rejected { reason });
                    }
                    return;
                }
                quantity = quantity.min(self.position);
                let commission = self.cost_model.commission(price, quantity);
                self.cash += price * quantity - commission;
                self.position -= quantity;
                if self.position.abs() <= f64::EPSILON {
                    self.position = 0.0;
                }
            }
        }

        let commission = self.cost_model.commission(price, quantity);
        let cancelled = match self.book.record_fill(id, bar_index) {
            Ok(cancelled) => cancelled,
            Err(err) => {
                warn!(order = %id, error = %err, "fill on inactive order");
                return;
            }
        };

        debug!(
            order = %id,
            bar_index,
            ?side,
            price,
            quantity,
            commission,
            gap_through,
            "order filled"
        );
        self.fills.push(Fill {
            order_id: id,
            bar_index,
            side,
            price,
            quantity,
            commission,
            slippage,
        });
        self.push(
            id,
            OrderEventKind::Filled {
                price,
                quantity,
                commission,
            },
        );
        for sibling in cancelled {
            debug!(order = %sibling, filled = %id, "OCO partner cancelled");
            self.push(sibling, OrderEventKind::Canceled);
        }
    }

    fn validate(request: &OrderRequest) -> Result<(), String> {
        if !request.quantity.is_finite() || request.quantity <= 0.0 {
            return Err(format!("invalid quantity {}", request.quantity));
        }
        let prices_ok = match request.order_type {
            OrderType::Market => true,
            OrderType::Limit { limit_price } => limit_price.is_finite() && limit_price > 0.0,
            OrderType::TrailingStopLimit {
                activation_price,
                trail_percent,
                limit_price,
            } => {
                request.side == OrderSide::Sell
                    && activation_price.is_finite()
                    && activation_price > 0.0
                    && limit_price.is_finite()
                    && limit_price > 0.0
                    && trail_percent > 0.0
                    && trail_percent < 100.0
            }
        };
        if prices_ok {
            Ok(())
        } else {
            Err(format!("invalid prices in {:?}", request.order_type))
        }
    }
}

impl Broker for SimBroker {
    fn submit(&mut self, request: OrderRequest) -> Result<OrderId, BrokerError> {
        if let Some(partner) = request.oco_partner {
            if self.book.get(partner).is_none() {
                return Err(BrokerError::UnknownOrder(partner));
            }
        }

        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;

        self.book.submit(Order {
            id,
            side: request.side,
            order_type: request.order_type.clone(),
            quantity: request.quantity,
            status: OrderStatus::Pending,
            oco_group_id: None,
            eligible_bar: self.next_bar_index(),
            trail_peak: None,
        });
        self.push(id, OrderEventKind::Submitted);

        if let Err(reason) = Self::validate(&request) {
            let bar = self.audit_bar();
            if self.book.reject(id, bar, &reason).is_ok() {
                self.push(id, OrderEventKind::Rejected { reason });
            }
            return Ok(id);
        }

        if let Some(partner) = request.oco_partner {
            let group = OcoGroupId(self.next_oco_id);
            match self.book.link_oco(id, partner, group) {
                Ok(linked) if linked == group => self.next_oco_id += 1,
                Ok(_) => {}
                Err(err) => warn!(order = %id, error = %err, "OCO link failed"),
            }
        }

        debug!(
            order = %id,
            side = ?request.side,
            order_type = ?request.order_type,
            quantity = request.quantity,
            oco_partner = ?request.oco_partner,
            "order accepted"
        );
        self.push(id, OrderEventKind::Accepted);
        Ok(id)
    }

    fn cancel(&mut self, order_id: OrderId) -> Result<(), BrokerError> {
        let bar = self.audit_bar();
        match self.book.cancel(order_id, bar, "cancel requested") {
            Ok(CancelOutcome::Cancelled) => {
                self.push(order_id, OrderEventKind::Canceled);
                Ok(())
            }
            Ok(CancelOutcome::AlreadyTerminal) => {
                debug!(order = %order_id, "cancel on terminal order ignored");
                Ok(())
            }
            Err(_) => Err(BrokerError::UnknownOrder(order_id)),
        }
    }
}

impl Portfolio for SimBroker {
    fn cash(&self) -> f64 {
        self.cash
    }

    fn value(&self) -> f64 {
        let mark = self.last_bar.as_ref().map(|b| b.close).unwrap_or(0.0);
        self.cash + self.position * mark
    }

    fn last_bar(&self) -> Option<&Bar> {
        self.last_bar.as_ref()
    }
}
