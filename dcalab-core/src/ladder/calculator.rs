//! Ladder calculator: pure function from parameters and entry price to levels.
//!
//! Deviation recurrence (compounding): `step = price_deviation`, `dev[0] = step`,
//! then for each further level `step *= step_scale; dev[i] = dev[i-1] + step`.
//!
//! All figures are kept at full `f64` precision; rounding is a display concern
//! (see [`Ladder::table`](super::Ladder::table)).

use super::params::{Parameters, SizingMode};
use super::{Ladder, LadderError, Level};

const MAX_PREALLOCATED_LEVELS: usize = 1024;

/// Compute the ladder for a deal entered at `entry_price`.
///
/// `safety_orders_max == 0` yields a valid ladder with no levels.
pub fn compute(params: &Parameters, entry_price: f64) -> Result<Ladder, LadderError> {
    if !entry_price.is_finite() || entry_price <= 0.0 {
        return Err(LadderError::InvalidInput(format!(
            "entry price must be a positive number, got {entry_price}"
        )));
    }
    params.validate()?;

    let shape = &params.shape;
    let target = shape.target_profit_percent / 100.0;

    let base_order_quantity = match params.sizing {
        SizingMode::ByBaseAsset {
            base_order_size, ..
        } => base_order_size,
        SizingMode::ByQuoteCurrency {
            base_order_size, ..
        } => base_order_size / entry_price,
    };
    let base_order_quantity_quote = entry_price * base_order_quantity;
    let base_order_profit_quote = target * base_order_quantity_quote;
    if base_order_profit_quote <= 0.0 || !base_order_profit_quote.is_finite() {
        return Err(LadderError::NumericInvalidState(format!(
            "base order profit is {base_order_profit_quote}"
        )));
    }

    // Only the deviation check below bounds the level count.
    let count = shape.safety_orders_max as usize;
    let mut levels: Vec<Level> = Vec::with_capacity(count.min(MAX_PREALLOCATED_LEVELS));

    let mut step = shape.safety_order_price_deviation_percent;
    let mut deviation_percent = 0.0;
    let mut order_size = params.sizing.safety_order_size();
    let mut total_quantity = base_order_quantity;
    let mut total_quantity_quote = base_order_quantity_quote;
    let mut total_cost = base_order_quantity_quote;

    for index in 0..count {
        if index == 0 {
            deviation_percent = step;
        } else {
            step *= shape.safety_order_step_scale;
            deviation_percent += step;
        }
        if deviation_percent >= 100.0 {
            return Err(LadderError::InvalidInput(format!(
                "level {index} deviates {deviation_percent}% below entry; \
                 deviations must stay under 100%"
            )));
        }

        let price = entry_price * (1.0 - deviation_percent / 100.0);
        let (quantity, quantity_quote) = match params.sizing {
            SizingMode::ByBaseAsset { .. } => (order_size, price * order_size),
            SizingMode::ByQuoteCurrency { .. } => (order_size / price, order_size),
        };

        let previous_total = total_quantity;
        total_quantity += quantity;
        total_quantity_quote += quantity_quote;
        total_cost += price * quantity;

        if total_quantity <= 0.0 {
            return Err(LadderError::NumericInvalidState(format!(
                "total quantity is {total_quantity} at level {index}"
            )));
        }
        let weighted_average_price = total_cost / total_quantity;
        let required_price = weighted_average_price * (1.0 + target);
        let required_change_percent = (required_price / price - 1.0) * 100.0;
        let profit_quote = target * price * (quantity + previous_total);
        let roi_percent = (profit_quote / base_order_profit_quote - 1.0) * 100.0;

        let level = Level {
            index,
            deviation_percent,
            price: finite(price, "price", index)?,
            quantity: finite(quantity, "quantity", index)?,
            quantity_quote: finite(quantity_quote, "quantity_quote", index)?,
            total_quantity: finite(total_quantity, "total_quantity", index)?,
            total_quantity_quote: finite(total_quantity_quote, "total_quantity_quote", index)?,
            weighted_average_price: finite(weighted_average_price, "weighted_average_price", index)?,
            required_price: finite(required_price, "required_price", index)?,
            required_change_percent: finite(required_change_percent, "required_change_percent", index)?,
            profit_quote: finite(profit_quote, "profit_quote", index)?,
            roi_percent: finite(roi_percent, "roi_percent", index)?,
        };

        if let Some(prev) = levels.last() {
            check_monotonic(prev, &level)?;
        }
        levels.push(level);

        order_size *= shape.safety_order_volume_scale;
    }

    Ok(Ladder {
        entry_price,
        target_profit_percent: shape.target_profit_percent,
        sizing_kind: params.sizing.kind(),
        safety_orders_active_max: shape.safety_orders_active_max,
        base_order_quantity,
        base_order_quantity_quote,
        base_order_required_price: entry_price * (1.0 + target),
        base_order_profit_quote,
        levels,
    })
}

fn finite(value: f64, field: &str, index: usize) -> Result<f64, LadderError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(LadderError::NumericInvalidState(format!(
            "{field} is {value} at level {index}"
        )))
    }
}

/// Scale factors so small that consecutive levels collapse in `f64` would
/// break the ladder's ordering guarantees.
fn check_monotonic(prev: &Level, next: &Level) -> Result<(), LadderError> {
    let ordered = next.deviation_percent > prev.deviation_percent
        && next.price < prev.price
        && next.total_quantity > prev.total_quantity
        && next.total_quantity_quote > prev.total_quantity_quote;
    if ordered {
        Ok(())
    } else {
        Err(LadderError::NumericInvalidState(format!(
            "levels {} and {} are not strictly ordered",
            prev.index, next.index
        )))
    }
}
