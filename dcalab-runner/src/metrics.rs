//! Run metrics: pure functions over the equity curve and closed deals.

use dcalab_core::domain::Bar;
use serde::{Deserialize, Serialize};

use crate::runner::{DealRecord, FailureRecord};

/// Aggregate results of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealMetrics {
    pub start_value: f64,
    pub final_value: f64,
    /// Final portfolio value minus starting cash (open positions marked to market).
    pub total_profit: f64,
    /// `(final_value / start_value - 1) * 100`.
    pub roi_percent: f64,
    /// Most negative peak-to-trough change of the equity curve, as a fraction.
    pub max_drawdown: f64,
    pub deals_closed: usize,
    pub deals_failed: usize,
    /// Sum of net profit over closed deals only.
    pub realized_profit: f64,
    pub total_commission: f64,
    pub avg_deal_roi_percent: f64,
    pub avg_levels_filled: f64,
    pub max_levels_filled: usize,
    pub avg_bars_held: f64,
    pub max_bars_held: usize,
    /// Starting cash bought in full at the first bar's open, marked at the
    /// last bar's close.
    #[serde(default)]
    pub benchmark_final_value: f64,
    #[serde(default)]
    pub benchmark_roi_percent: f64,
}

impl DealMetrics {
    pub fn compute(
        equity_curve: &[f64],
        deals: &[DealRecord],
        failures: &[FailureRecord],
        bars: &[Bar],
        initial_cash: f64,
    ) -> Self {
        let final_value = equity_curve.last().copied().unwrap_or(initial_cash);
        let benchmark_final_value = buy_and_hold_value(bars, initial_cash);
        Self {
            start_value: initial_cash,
            final_value,
            total_profit: final_value - initial_cash,
            roi_percent: roi_percent(initial_cash, final_value),
            max_drawdown: max_drawdown(equity_curve),
            deals_closed: deals.len(),
            deals_failed: failures.len(),
            realized_profit: deals.iter().map(|d| d.summary.net_profit).sum(),
            total_commission: deals.iter().map(|d| d.summary.commission).sum(),
            avg_deal_roi_percent: mean(deals.iter().map(|d| d.summary.roi_percent)),
            avg_levels_filled: mean(deals.iter().map(|d| d.summary.levels_filled as f64)),
            max_levels_filled: deals
                .iter()
                .map(|d| d.summary.levels_filled)
                .max()
                .unwrap_or(0),
            avg_bars_held: mean(deals.iter().map(|d| d.bars_held as f64)),
            max_bars_held: deals.iter().map(|d| d.bars_held).max().unwrap_or(0),
            benchmark_final_value,
            benchmark_roi_percent: roi_percent(initial_cash, benchmark_final_value),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

pub fn roi_percent(start_value: f64, final_value: f64) -> f64 {
    if start_value <= 0.0 {
        return 0.0;
    }
    (final_value / start_value - 1.0) * 100.0
}

/// Value of `initial_cash` invested at the first open and held to the last
/// close. No bars (or a non-positive open) leaves the cash untouched.
pub fn buy_and_hold_value(bars: &[Bar], initial_cash: f64) -> f64 {
    match (bars.first(), bars.last()) {
        (Some(first), Some(last)) if first.open > 0.0 => initial_cash / first.open * last.close,
        _ => initial_cash,
    }
}

/// Max drawdown as a negative fraction (0.0 when equity never falls).
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        peak = peak.max(eq);
        if peak > 0.0 {
            max_dd = max_dd.min((eq - peak) / peak);
        }
    }
    max_dd
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
