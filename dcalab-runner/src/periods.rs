//! Multi-period runs: the same strategy over several named date ranges.
//!
//! Each period gets its own broker and deal machine and runs on the rayon
//! pool. A period that fails (for example, no bars in range) is reported in
//! its own result and does not abort the others.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use chrono::NaiveDate;
use dcalab_core::domain::Bar;

use crate::config::{BacktestConfig, PeriodConfig};
use crate::data_loader::{dataset_hash, filter_range, load_bars, LoadOptions};
use crate::runner::{run_backtest_from_data, BacktestResult, RunError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodResult {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub result: Option<BacktestResult>,
    pub error: Option<String>,
}

impl PeriodResult {
    pub fn roi_percent(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.metrics.roi_percent)
    }

    /// Buy-and-hold ROI over the same bars.
    pub fn benchmark_roi_percent(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.metrics.benchmark_roi_percent)
    }
}

/// Run every period in `config.periods` over slices of `bars`.
///
/// Results come back in the order the periods are listed.
pub fn run_periods(config: &BacktestConfig, bars: &[Bar], synthetic: bool) -> Vec<PeriodResult> {
    info!(periods = config.periods.len(), "multi-period run started");
    config
        .periods
        .par_iter()
        .map(|period| run_period(config, period, bars, synthetic))
        .collect()
}

fn run_period(
    config: &BacktestConfig,
    period: &PeriodConfig,
    bars: &[Bar],
    synthetic: bool,
) -> PeriodResult {
    let period_config = config.for_period(period);
    let slice = filter_range(bars.to_vec(), Some(period.start), Some(period.end));
    let outcome = if slice.is_empty() {
        Err(format!(
            "no bars between {} and {}",
            period.start, period.end
        ))
    } else {
        run_backtest_from_data(&period_config, &slice, &dataset_hash(&slice), synthetic)
            .map_err(|e| e.to_string())
    };

    match outcome {
        Ok(result) => {
            info!(
                period = %period.name,
                roi_percent = result.metrics.roi_percent,
                benchmark_roi_percent = result.metrics.benchmark_roi_percent,
                deals = result.metrics.deals_closed,
                "period finished"
            );
            PeriodResult {
                name: period.name.clone(),
                start: period.start,
                end: period.end,
                result: Some(result),
                error: None,
            }
        }
        Err(error) => PeriodResult {
            name: period.name.clone(),
            start: period.start,
            end: period.end,
            result: None,
            error: Some(error),
        },
    }
}

/// Load the full data range once, then run every configured period.
///
/// With synthetic data the generated range spans the earliest period start
/// to the latest period end.
pub fn run_periods_from_config(config: &BacktestConfig) -> Result<Vec<PeriodResult>, RunError> {
    let start = config.periods.iter().map(|p| p.start).min();
    let end = config.periods.iter().map(|p| p.end).max();
    let opts = LoadOptions {
        start,
        end,
        synthetic: config.backtest.synthetic,
    };
    let loaded = load_bars(
        &config.backtest.symbol,
        config.backtest.data.as_deref(),
        &opts,
    )?;
    Ok(run_periods(config, &loaded.bars, loaded.synthetic))
}
