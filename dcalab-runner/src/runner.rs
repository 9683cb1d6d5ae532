//! Backtest runner: wires the simulated broker, the deal machine and metrics.
//!
//! Two entry points:
//! - `run_single_backtest()`: loads bars per the config, then runs. Used by the CLI.
//! - `run_backtest_from_data()`: takes pre-loaded bars. Used by multi-period runs.
//!
//! Per bar: the broker evaluates working orders, every queued event is handed
//! to the deal machine (which may submit or cancel more orders), and when the
//! machine is idle a new deal is started. Equity is marked at the close.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use dcalab_core::broker::{Broker, Portfolio};
use dcalab_core::deal::{
    DealError, DealMachine, DealSettings, DealSummary, DealUpdate, FailureReason, OrderRole,
};
use dcalab_core::domain::Bar;
use dcalab_core::sim::{CostModel, SimBroker};

use crate::config::{BacktestConfig, ConfigError, RunId};
use crate::data_loader::{load_bars, LoadError, LoadOptions};
use crate::metrics::DealMetrics;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("deal error: {0}")]
    Deal(#[from] DealError),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// One closed deal, located in the bar sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealRecord {
    /// 1-based, in closing order.
    pub deal_number: usize,
    pub opened_bar: usize,
    pub opened_at: NaiveDateTime,
    pub closed_bar: usize,
    pub closed_at: NaiveDateTime,
    pub bars_held: usize,
    pub summary: DealSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub bar_index: usize,
    pub timestamp: NaiveDateTime,
    pub reason: FailureReason,
}

/// A deal still open when the data ran out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenDeal {
    pub opened_bar: usize,
    pub opened_at: NaiveDateTime,
    pub levels_filled: usize,
    pub levels_total: usize,
    pub quantity_held: f64,
    pub invested_quote: f64,
}

/// Complete result of a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub symbol: String,
    pub start_date: String,
    pub end_date: String,
    pub bar_count: usize,
    pub initial_cash: f64,
    pub dataset_hash: String,
    pub synthetic: bool,
    pub config: BacktestConfig,
    pub metrics: DealMetrics,
    pub deals: Vec<DealRecord>,
    pub failures: Vec<FailureRecord>,
    pub open_deal: Option<OpenDeal>,
    pub equity_curve: Vec<f64>,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Load bars per `config` and run the backtest.
pub fn run_single_backtest(config: &BacktestConfig) -> Result<BacktestResult, RunError> {
    let opts = LoadOptions {
        start: config.backtest.start,
        end: config.backtest.end,
        synthetic: config.backtest.synthetic,
    };
    let loaded = load_bars(
        &config.backtest.symbol,
        config.backtest.data.as_deref(),
        &opts,
    )?;
    if loaded.skipped_rows > 0 {
        warn!(skipped = loaded.skipped_rows, "rows dropped while loading bars");
    }
    run_backtest_from_data(config, &loaded.bars, &loaded.dataset_hash, loaded.synthetic)
}

/// Run a backtest over pre-loaded bars. No I/O.
pub fn run_backtest_from_data(
    config: &BacktestConfig,
    bars: &[Bar],
    dataset_hash: &str,
    synthetic: bool,
) -> Result<BacktestResult, RunError> {
    let run_id = config.run_id();
    let symbol = config.backtest.symbol.clone();
    let initial_cash = config.backtest.initial_cash;
    info!(%run_id, %symbol, bars = bars.len(), "backtest started");

    let mut session = Session::new(
        config.deal_settings()?,
        initial_cash,
        config.cost_model(),
        config.deal.restart_after_failure,
    );
    for (index, bar) in bars.iter().enumerate() {
        session.step(index, bar)?;
    }

    let open_deal = session.open_deal();
    let metrics = DealMetrics::compute(
        &session.equity_curve,
        &session.deals,
        &session.failures,
        bars,
        initial_cash,
    );
    info!(
        %run_id,
        deals_closed = metrics.deals_closed,
        deals_failed = metrics.deals_failed,
        final_value = metrics.final_value,
        roi_percent = metrics.roi_percent,
        benchmark_roi_percent = metrics.benchmark_roi_percent,
        "backtest finished"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        symbol,
        start_date: bars
            .first()
            .map(|b| b.timestamp.to_string())
            .unwrap_or_default(),
        end_date: bars
            .last()
            .map(|b| b.timestamp.to_string())
            .unwrap_or_default(),
        bar_count: bars.len(),
        initial_cash,
        dataset_hash: dataset_hash.to_string(),
        synthetic,
        config: config.clone(),
        metrics,
        deals: session.deals,
        failures: session.failures,
        open_deal,
        equity_curve: session.equity_curve,
    })
}

/// Mutable state of one run.
struct Session {
    machine: DealMachine,
    broker: SimBroker,
    restart_after_failure: bool,
    /// No new deals once set.
    halted: bool,
    opened: Option<(usize, NaiveDateTime)>,
    deals: Vec<DealRecord>,
    failures: Vec<FailureRecord>,
    equity_curve: Vec<f64>,
}

impl Session {
    fn new(
        settings: DealSettings,
        initial_cash: f64,
        cost_model: CostModel,
        restart_after_failure: bool,
    ) -> Self {
        Self {
            machine: DealMachine::new(settings),
            broker: SimBroker::new(initial_cash, cost_model),
            restart_after_failure,
            halted: false,
            opened: None,
            deals: Vec::new(),
            failures: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    fn step(&mut self, index: usize, bar: &Bar) -> Result<(), RunError> {
        self.broker.process_bar(bar);
        self.pump(index, bar);

        if self.machine.is_idle() && !self.halted {
            match self.machine.start_deal(&mut self.broker) {
                Ok(_) => {}
                // Only before the first well-formed bar.
                Err(DealError::NoMarketData) => {}
                Err(err) => return Err(err.into()),
            }
            self.pump(index, bar);
        }

        self.equity_curve.push(self.broker.value());
        Ok(())
    }

    /// Deliver queued broker events until the queue is empty.
    fn pump(&mut self, index: usize, bar: &Bar) {
        while let Some(event) = self.broker.poll_event() {
            match self.machine.on_event(&event, &mut self.broker) {
                DealUpdate::Opened { .. } => self.opened = Some((index, bar.timestamp)),
                DealUpdate::Closed(summary) => {
                    let (opened_bar, opened_at) =
                        self.opened.take().unwrap_or((index, bar.timestamp));
                    self.deals.push(DealRecord {
                        deal_number: self.deals.len() + 1,
                        opened_bar,
                        opened_at,
                        closed_bar: index,
                        closed_at: bar.timestamp,
                        bars_held: index - opened_bar,
                        summary,
                    });
                }
                DealUpdate::Failed(reason) => self.recover(index, bar, reason),
                _ => {}
            }
        }
    }

    fn recover(&mut self, index: usize, bar: &Bar, reason: FailureReason) {
        self.opened = None;
        // A base order that cannot be placed will fail the same way every bar.
        let base_order_failed = matches!(
            reason,
            FailureReason::Rejected {
                role: OrderRole::BaseOrder,
                ..
            } | FailureReason::MarginCall {
                role: OrderRole::BaseOrder,
                ..
            }
        );
        self.failures.push(FailureRecord {
            bar_index: index,
            timestamp: bar.timestamp,
            reason,
        });

        if !self.restart_after_failure || base_order_failed {
            warn!(bar_index = index, "deal failed, no further deals will be opened");
            self.halted = true;
            return;
        }

        // Leftover orders belong to the failed deal; their events are ignored
        // once the machine is idle. Any position it built stays on the books.
        for id in self.broker.book().active_ids() {
            if let Err(err) = self.broker.cancel(id) {
                warn!(order = %id, error = %err, "cancel of leftover order failed");
            }
        }
        self.machine.reset();
        info!(bar_index = index, "deal machine reset after failure");
    }

    fn open_deal(&self) -> Option<OpenDeal> {
        let deal = self.machine.deal()?;
        let (opened_bar, opened_at) = self.opened?;
        Some(OpenDeal {
            opened_bar,
            opened_at,
            levels_filled: deal.cursor.filled_count(),
            levels_total: deal.cursor.levels().len(),
            quantity_held: deal.quantity_held(),
            invested_quote: deal.invested_quote(),
        })
    }
}
