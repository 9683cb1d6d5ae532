//! Trigger checking: does a bar fill a given order, and at what raw price?
//!
//! Slippage and commission are applied afterwards by the cost model.
//! Eligibility (`Order::eligible_bar`) is the caller's concern.

use crate::domain::{Bar, Order, OrderSide, OrderStatus, OrderType};

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerResult {
    NoTrigger,
    /// Order fills at `fill_price`. `gap_through` marks fills at the open
    /// because the bar opened beyond the order's level.
    Fill { fill_price: f64, gap_through: bool },
    /// Trailing stop hit but its limit is not reachable on this bar. The order
    /// keeps working as a plain limit sell.
    StopTriggeredLimitPending,
}

/// Check whether `order` fills on `bar`.
///
/// Trailing stop-limit orders use the peak recorded *before* this bar; call
/// [`next_trail_peak`] after a `NoTrigger` to fold this bar's high in. An order
/// that arms on a bar therefore cannot stop out until the following bar.
pub fn check_trigger(order: &Order, bar: &Bar) -> TriggerResult {
    if bar.is_void() {
        return TriggerResult::NoTrigger;
    }

    match &order.order_type {
        OrderType::Market => TriggerResult::Fill {
            fill_price: bar.open,
            gap_through: false,
        },
        OrderType::Limit { limit_price } => check_limit(order.side, *limit_price, bar),
        OrderType::TrailingStopLimit {
            trail_percent,
            limit_price,
            ..
        } => {
            if order.status == OrderStatus::Triggered {
                return check_limit(OrderSide::Sell, *limit_price, bar);
            }
            match order.trail_peak {
                Some(peak) => check_trailing_stop(peak, *trail_percent, *limit_price, bar),
                None => TriggerResult::NoTrigger,
            }
        }
    }
}

/// Peak to carry into the next bar for a trailing order, or `None` while the
/// activation price has not been reached.
pub fn next_trail_peak(order: &Order, bar: &Bar) -> Option<f64> {
    let OrderType::TrailingStopLimit {
        activation_price, ..
    } = order.order_type
    else {
        return None;
    };
    match order.trail_peak {
        Some(peak) => Some(peak.max(bar.high)),
        None if bar.high >= activation_price => Some(bar.high),
        None => None,
    }
}

/// Buy limit: fills if low <= limit, at the open when it gapped below.
/// Sell limit: fills if high >= limit, at the open when it gapped above.
fn check_limit(side: OrderSide, limit: f64, bar: &Bar) -> TriggerResult {
    match side {
        OrderSide::Buy => {
            if bar.low <= limit {
                let gap_through = bar.open <= limit;
                TriggerResult::Fill {
                    fill_price: if gap_through { bar.open } else { limit },
                    gap_through,
                }
            } else {
                TriggerResult::NoTrigger
            }
        }
        OrderSide::Sell => {
            if bar.high >= limit {
                let gap_through = bar.open >= limit;
                TriggerResult::Fill {
                    fill_price: if gap_through { bar.open } else { limit },
                    gap_through,
                }
            } else {
                TriggerResult::NoTrigger
            }
        }
    }
}

/// Sell trailing stop: stop sits `trail_percent` below the peak. When the bar
/// trades through it the order fills at the stop (or the open on a gap), as
/// long as that is not below the limit.
fn check_trailing_stop(peak: f64, trail_percent: f64, limit: f64, bar: &Bar) -> TriggerResult {
    let stop = peak * (1.0 - trail_percent / 100.0);
    if bar.low > stop {
        return TriggerResult::NoTrigger;
    }
    let gap_through = bar.open <= stop;
    let raw = if gap_through { bar.open } else { stop };
    if raw >= limit {
        TriggerResult::Fill {
            fill_price: raw,
            gap_through,
        }
    } else {
        TriggerResult::StopTriggeredLimitPending
    }
}
