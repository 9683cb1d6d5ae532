//! Deal state machine.
//!
//! ```text
//! Idle ──start_deal──▶ BaseOrderPending ──base filled──▶ DealOpen
//!                                                          │  ▲
//!                                safety filled / TP canceled│  │
//!                                                          ▼  │
//!                                                        DealOpen ──TP filled──▶ Idle
//! any ──rejected / margin call──▶ Failed ──reset──▶ Idle
//! ```
//!
//! At most one take-profit and one safety order are live. A safety fill
//! requests the take-profit's cancel; the replacement take-profit and the next
//! safety order are placed only when the `Canceled` event for it arrives. If
//! the old take-profit fills first, its fill is a partial exit and the
//! replacement covers what is still held.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::oco::OrderRole;
use super::state::{
    Deal, DealError, DealState, DealSummary, DealUpdate, Execution, FailureReason,
};
use crate::broker::{BrokerError, OrderEvent, OrderEventKind, Venue};
use crate::domain::{OrderId, OrderRequest};
use crate::ladder::{compute, LadderCursor, Parameters, SizingMode};
use crate::sizing::{search, SearchSettings, SizingRequest};

/// Relative slack when comparing a take-profit fill with the quantity held.
const QUANTITY_TOLERANCE: f64 = 1e-9;

/// How the take-profit order is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TakeProfitKind {
    /// Plain limit sell at the required price.
    Limit,
    /// Trailing stop-limit armed at the required price, trailing the high by
    /// `trail_percent`, never filling below the required price.
    TrailingStopLimit { trail_percent: f64 },
}

impl Default for TakeProfitKind {
    fn default() -> Self {
        TakeProfitKind::Limit
    }
}

impl TakeProfitKind {
    fn request(&self, required_price: f64, quantity: f64) -> OrderRequest {
        match *self {
            TakeProfitKind::Limit => OrderRequest::limit_sell(required_price, quantity),
            TakeProfitKind::TrailingStopLimit { trail_percent } => OrderRequest::trailing_sell(
                required_price,
                trail_percent,
                required_price,
                quantity,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealSettings {
    pub params: Parameters,
    #[serde(default)]
    pub take_profit: TakeProfitKind,
    /// When set, the safety order size is searched against portfolio value
    /// each time a deal opens.
    #[serde(default)]
    pub dynamic_sizing: Option<SearchSettings>,
    /// Round the base order down to whole units (unless that leaves zero).
    #[serde(default)]
    pub whole_units: bool,
}

impl DealSettings {
    pub fn new(params: Parameters) -> Self {
        Self {
            params,
            take_profit: TakeProfitKind::Limit,
            dynamic_sizing: None,
            whole_units: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DealMachine {
    settings: DealSettings,
    state: DealState,
}

impl DealMachine {
    pub fn new(settings: DealSettings) -> Self {
        Self {
            settings,
            state: DealState::Idle,
        }
    }

    pub fn settings(&self) -> &DealSettings {
        &self.settings
    }

    pub fn state(&self) -> &DealState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, DealState::Idle)
    }

    /// The open deal, if any.
    pub fn deal(&self) -> Option<&Deal> {
        match &self.state {
            DealState::DealOpen(deal) => Some(deal),
            _ => None,
        }
    }

    /// Submit a market buy for the base order. Only valid from `Idle`.
    pub fn start_deal<V: Venue + ?Sized>(&mut self, venue: &mut V) -> Result<OrderId, DealError> {
        if !self.is_idle() {
            return Err(DealError::DealInProgress(self.state.name()));
        }
        let close = venue
            .last_bar()
            .map(|bar| bar.close)
            .ok_or(DealError::NoMarketData)?;
        let quantity = self.base_order_quantity(close);
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(DealError::InvalidBaseOrder(quantity));
        }

        let base_order_id = venue.submit(OrderRequest::market_buy(quantity))?;
        info!(order = %base_order_id, quantity, reference_price = close, "deal started");
        self.state = DealState::BaseOrderPending { base_order_id };
        Ok(base_order_id)
    }

    /// Leave `Failed` for `Idle`, returning the failure. No-op in any other state.
    pub fn reset(&mut self) -> Option<FailureReason> {
        if let DealState::Failed { reason } = &self.state {
            let reason = reason.clone();
            info!(?reason, "deal machine reset");
            self.state = DealState::Idle;
            Some(reason)
        } else {
            None
        }
    }

    /// Handle one broker event.
    pub fn on_event<V: Venue + ?Sized>(&mut self, event: &OrderEvent, venue: &mut V) -> DealUpdate {
        let state = std::mem::replace(&mut self.state, DealState::Idle);
        let (next, update) = match state {
            DealState::BaseOrderPending { base_order_id } => {
                self.on_base_order_event(base_order_id, event, venue)
            }
            DealState::DealOpen(deal) => self.on_open_deal_event(deal, event, venue),
            idle_or_failed => {
                debug!(order = %event.order_id, status = event.kind.label(), state = idle_or_failed.name(), "event ignored");
                (idle_or_failed, DealUpdate::Ignored)
            }
        };
        self.state = next;
        update
    }

    fn base_order_quantity(&self, close: f64) -> f64 {
        let raw = match self.settings.params.sizing {
            SizingMode::ByBaseAsset {
                base_order_size, ..
            } => base_order_size,
            SizingMode::ByQuoteCurrency {
                base_order_size, ..
            } => base_order_size / close,
        };
        if self.settings.whole_units && raw.floor() >= 1.0 {
            raw.floor()
        } else {
            raw
        }
    }

    // ── BaseOrderPending ───────────────────────────────────────────────

    fn on_base_order_event<V: Venue + ?Sized>(
        &self,
        base_order_id: OrderId,
        event: &OrderEvent,
        venue: &mut V,
    ) -> (DealState, DealUpdate) {
        let pending = DealState::BaseOrderPending { base_order_id };
        if event.order_id != base_order_id {
            debug!(order = %event.order_id, "event for unknown order ignored");
            return (pending, DealUpdate::Ignored);
        }
        match &event.kind {
            OrderEventKind::Submitted | OrderEventKind::Accepted => {
                (pending, DealUpdate::Acknowledged)
            }
            OrderEventKind::Filled {
                price,
                quantity,
                commission,
            } => self.open_deal(
                Execution {
                    price: *price,
                    quantity: *quantity,
                    commission: *commission,
                },
                venue,
            ),
            OrderEventKind::Canceled => failed(FailureReason::BaseOrderCanceled {
                order_id: base_order_id,
            }),
            OrderEventKind::Rejected { reason } => failed(FailureReason::Rejected {
                order_id: base_order_id,
                role: OrderRole::BaseOrder,
                reason: reason.clone(),
            }),
            OrderEventKind::MarginCall => failed(FailureReason::MarginCall {
                order_id: base_order_id,
                role: OrderRole::BaseOrder,
            }),
        }
    }

    /// Build the ladder from the realized base fill and arm the first OCO pair.
    fn open_deal<V: Venue + ?Sized>(
        &self,
        base_fill: Execution,
        venue: &mut V,
    ) -> (DealState, DealUpdate) {
        let configured = self.settings.params.sizing;
        let realized_size = match configured {
            SizingMode::ByBaseAsset { .. } => base_fill.quantity,
            SizingMode::ByQuoteCurrency { .. } => base_fill.price * base_fill.quantity,
        };
        let mut sizing = configured.with_base_order_size(realized_size);

        if let Some(search_settings) = &self.settings.dynamic_sizing {
            let request = SizingRequest::new(
                self.settings.params.shape.clone(),
                sizing.kind(),
                realized_size,
                base_fill.price,
                venue.value(),
            )
            .with_settings(search_settings.clone());
            match search(&request) {
                Ok(outcome) => {
                    info!(
                        safety_order_size = outcome.safety_order_size,
                        tolerance_percent = outcome.tolerance_percent,
                        iterations = outcome.iterations,
                        "dynamic safety order size"
                    );
                    sizing = sizing.with_safety_order_size(outcome.safety_order_size);
                }
                Err(err) => return failed(err.into()),
            }
        }

        let params = self.settings.params.with_sizing(sizing);
        let ladder = match compute(&params, base_fill.price) {
            Ok(ladder) => ladder,
            Err(err) => return failed(err.into()),
        };
        let levels = ladder.len();
        let mut deal = Box::new(Deal::new(LadderCursor::new(ladder), base_fill));

        let (take_profit, _, _) = match place_take_profit(&mut deal, &self.settings.take_profit, venue)
        {
            Ok(placed) => placed,
            Err(err) => return failed(err.into()),
        };
        let safety_order = match place_next_safety_order(&mut deal, venue) {
            Ok(placed) => placed.map(|(id, _)| id),
            Err(err) => return failed(err.into()),
        };

        info!(
            entry_price = base_fill.price,
            quantity = base_fill.quantity,
            levels,
            take_profit = %take_profit,
            "deal open"
        );
        (
            DealState::DealOpen(deal),
            DealUpdate::Opened {
                entry_price: base_fill.price,
                quantity: base_fill.quantity,
                levels,
                take_profit,
                safety_order,
            },
        )
    }

    // ── DealOpen ───────────────────────────────────────────────────────

    fn on_open_deal_event<V: Venue + ?Sized>(
        &self,
        deal: Box<Deal>,
        event: &OrderEvent,
        venue: &mut V,
    ) -> (DealState, DealUpdate) {
        let order_id = event.order_id;
        let Some(role) = deal.oco.role_of(order_id) else {
            debug!(order = %order_id, status = event.kind.label(), "event for stale order ignored");
            return (DealState::DealOpen(deal), DealUpdate::Ignored);
        };

        match (&event.kind, role) {
            (OrderEventKind::Submitted | OrderEventKind::Accepted, _) => {
                (DealState::DealOpen(deal), DealUpdate::Acknowledged)
            }
            (OrderEventKind::Rejected { reason }, _) => failed(FailureReason::Rejected {
                order_id,
                role,
                reason: reason.clone(),
            }),
            (OrderEventKind::MarginCall, _) => {
                failed(FailureReason::MarginCall { order_id, role })
            }
            (
                OrderEventKind::Filled {
                    price,
                    quantity,
                    commission,
                },
                _,
            ) => {
                let fill = Execution {
                    price: *price,
                    quantity: *quantity,
                    commission: *commission,
                };
                if role == OrderRole::TakeProfit {
                    self.on_take_profit_filled(deal, order_id, fill, venue)
                } else {
                    self.on_safety_order_filled(deal, order_id, fill, venue)
                }
            }
            (OrderEventKind::Canceled, OrderRole::TakeProfit) => {
                self.on_take_profit_canceled(deal, order_id, venue)
            }
            (OrderEventKind::Canceled, _) => self.on_safety_order_canceled(deal, order_id, venue),
        }
    }

    fn on_safety_order_filled<V: Venue + ?Sized>(
        &self,
        mut deal: Box<Deal>,
        order_id: OrderId,
        fill: Execution,
        venue: &mut V,
    ) -> (DealState, DealUpdate) {
        let take_profit = deal.oco.on_filled(order_id);
        deal.safety_fills.push(fill);
        let advanced = deal.cursor.advance().map(|level| level.index);
        let level_index = match advanced {
            Some(index) => index,
            None => {
                warn!(order = %order_id, "safety fill with no pending ladder level");
                deal.cursor.filled_count().saturating_sub(1)
            }
        };
        info!(
            order = %order_id,
            level = level_index,
            price = fill.price,
            quantity = fill.quantity,
            "safety order filled"
        );

        match take_profit {
            Some(tp) => {
                if let Err(err) = venue.cancel(tp) {
                    return failed(err.into());
                }
                debug!(take_profit = %tp, "take-profit cancel requested");
                deal.awaiting_take_profit = true;
            }
            None => {
                // No take-profit held: arm the next pair right away.
                if let Err(err) = rearm(&mut deal, &self.settings, venue) {
                    return failed(err.into());
                }
            }
        }

        (
            DealState::DealOpen(deal),
            DealUpdate::SafetyOrderFilled {
                level_index,
                price: fill.price,
                quantity: fill.quantity,
            },
        )
    }

    fn on_take_profit_canceled<V: Venue + ?Sized>(
        &self,
        mut deal: Box<Deal>,
        order_id: OrderId,
        venue: &mut V,
    ) -> (DealState, DealUpdate) {
        deal.oco.on_canceled(order_id);
        if !deal.awaiting_take_profit {
            warn!(order = %order_id, "take-profit cancelled unexpectedly, re-arming");
        }
        deal.awaiting_take_profit = false;

        match rearm(&mut deal, &self.settings, venue) {
            Ok((take_profit, price, quantity, safety_order)) => {
                info!(
                    take_profit = %take_profit,
                    price,
                    quantity,
                    safety_order = ?safety_order,
                    "take-profit placed"
                );
                (
                    DealState::DealOpen(deal),
                    DealUpdate::TakeProfitPlaced {
                        take_profit,
                        price,
                        quantity,
                        safety_order,
                    },
                )
            }
            Err(err) => failed(err.into()),
        }
    }

    fn on_safety_order_canceled<V: Venue + ?Sized>(
        &self,
        mut deal: Box<Deal>,
        order_id: OrderId,
        venue: &mut V,
    ) -> (DealState, DealUpdate) {
        deal.oco.on_canceled(order_id);
        warn!(order = %order_id, "safety order cancelled unexpectedly, re-placing");
        match place_next_safety_order(&mut deal, venue) {
            Ok(Some((order_id, level_index))) => (
                DealState::DealOpen(deal),
                DealUpdate::SafetyOrderPlaced {
                    order_id,
                    level_index,
                },
            ),
            Ok(None) => (DealState::DealOpen(deal), DealUpdate::Acknowledged),
            Err(err) => failed(err.into()),
        }
    }

    fn on_take_profit_filled<V: Venue + ?Sized>(
        &self,
        mut deal: Box<Deal>,
        order_id: OrderId,
        fill: Execution,
        venue: &mut V,
    ) -> (DealState, DealUpdate) {
        if deal.awaiting_take_profit {
            let remaining = deal.quantity_held() - fill.quantity;
            if remaining > QUANTITY_TOLERANCE * deal.quantity_held().max(1.0) {
                return self.on_outdated_take_profit_filled(deal, order_id, fill, venue);
            }
        }
        if let Some(safety_order) = deal.oco.on_filled(order_id) {
            // The deal is over either way; a failed cancel only leaves a stray order.
            match venue.cancel(safety_order) {
                Ok(()) => debug!(order = %safety_order, "pending safety order cancel requested"),
                Err(err) => warn!(order = %safety_order, error = %err, "safety order cancel failed"),
            }
        }
        deal.oco.clear();

        let summary = DealSummary::from_close(&deal, fill);
        info!(
            exit_price = summary.exit_price,
            levels_filled = summary.levels_filled,
            net_profit = summary.net_profit,
            roi_percent = summary.roi_percent,
            "deal closed"
        );
        (DealState::Idle, DealUpdate::Closed(summary))
    }

    /// A take-profit whose cancel was requested after a safety fill executed
    /// anyway. It sold only the quantity held before that fill, so the deal
    /// stays open with a take-profit for what is left.
    fn on_outdated_take_profit_filled<V: Venue + ?Sized>(
        &self,
        mut deal: Box<Deal>,
        order_id: OrderId,
        fill: Execution,
        venue: &mut V,
    ) -> (DealState, DealUpdate) {
        deal.oco.on_filled(order_id);
        deal.partial_exits.push(fill);
        deal.awaiting_take_profit = false;
        warn!(
            order = %order_id,
            price = fill.price,
            quantity = fill.quantity,
            remaining = deal.quantity_held(),
            "take-profit filled before its cancel, re-arming for the remainder"
        );

        match rearm(&mut deal, &self.settings, venue) {
            Ok((take_profit, _, remaining_quantity, safety_order)) => (
                DealState::DealOpen(deal),
                DealUpdate::PartiallyExited {
                    price: fill.price,
                    quantity: fill.quantity,
                    take_profit,
                    remaining_quantity,
                    safety_order,
                },
            ),
            Err(err) => failed(err.into()),
        }
    }
}

fn failed(reason: FailureReason) -> (DealState, DealUpdate) {
    warn!(?reason, "deal failed");
    (
        DealState::Failed {
            reason: reason.clone(),
        },
        DealUpdate::Failed(reason),
    )
}

/// Place a take-profit for everything still held, at the required price of
/// the last filled level, OCO-linked to the live safety order if there is one.
fn place_take_profit<V: Venue + ?Sized>(
    deal: &mut Deal,
    kind: &TakeProfitKind,
    venue: &mut V,
) -> Result<(OrderId, f64, f64), BrokerError> {
    let (ladder_quantity, price) = deal.cursor.take_profit_target();
    let quantity = ladder_quantity - deal.quantity_exited();
    let mut request = kind.request(price, quantity);
    if let Some(safety_order) = deal.oco.safety_order() {
        request = request.with_oco(safety_order);
    }
    let id = venue.submit(request)?;
    deal.oco.set_take_profit(id);
    debug!(order = %id, price, quantity, "take-profit submitted");
    Ok((id, price, quantity))
}

/// Place the safety order for the next pending level, OCO-linked to the live
/// take-profit. Keeps an existing live safety order instead of adding one.
/// Returns the order and the ladder level it works.
fn place_next_safety_order<V: Venue + ?Sized>(
    deal: &mut Deal,
    venue: &mut V,
) -> Result<Option<(OrderId, usize)>, BrokerError> {
    let Some(level) = deal.cursor.next_pending() else {
        return Ok(None);
    };
    if let Some(live) = deal.oco.safety_order() {
        return Ok(Some((live, level.index)));
    }
    let mut request = OrderRequest::limit_buy(level.price, level.quantity);
    if let Some(take_profit) = deal.oco.take_profit() {
        request = request.with_oco(take_profit);
    }
    let (price, quantity, index) = (level.price, level.quantity, level.index);
    let id = venue.submit(request)?;
    deal.oco.set_safety_order(id);
    debug!(order = %id, level = index, price, quantity, "safety order submitted");
    Ok(Some((id, index)))
}

fn rearm<V: Venue + ?Sized>(
    deal: &mut Deal,
    settings: &DealSettings,
    venue: &mut V,
) -> Result<(OrderId, f64, f64, Option<OrderId>), BrokerError> {
    let (take_profit, price, quantity) = place_take_profit(deal, &settings.take_profit, venue)?;
    let safety_order = place_next_safety_order(deal, venue)?.map(|(id, _)| id);
    Ok((take_profit, price, quantity, safety_order))
}
