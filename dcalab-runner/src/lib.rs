//! DCA Lab Runner: backtest orchestration on top of `dcalab-core`.
//!
//! - TOML configuration with run fingerprinting
//! - Bar loading from CSV with a synthetic fallback
//! - Single-backtest runner with deal records and metrics
//! - Multi-period runs in parallel
//! - JSON/CSV/Markdown export

pub mod config;
pub mod data_loader;
pub mod export;
pub mod metrics;
pub mod periods;
pub mod runner;

pub use config::{BacktestConfig, ConfigError, PeriodConfig, RunId};
pub use data_loader::{load_bars, LoadError, LoadOptions, LoadedData};
pub use metrics::DealMetrics;
pub use periods::{run_periods, run_periods_from_config, PeriodResult};
pub use runner::{
    run_backtest_from_data, run_single_backtest, BacktestResult, DealRecord, FailureRecord,
    OpenDeal, RunError, SCHEMA_VERSION,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn backtest_result_is_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<BacktestConfig>();
        assert_sync::<BacktestConfig>();
        assert_send::<LoadOptions>();
        assert_sync::<LoadOptions>();
    }

    #[test]
    fn period_result_is_send_sync() {
        assert_send::<PeriodResult>();
        assert_sync::<PeriodResult>();
    }
}
