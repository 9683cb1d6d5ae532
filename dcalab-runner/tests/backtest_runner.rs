//! Integration tests for the runner: config file + bar CSV on disk through
//! to deal records, period results and saved artifacts.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use dcalab_core::deal::FailureReason;
use dcalab_runner::config::BacktestConfig;
use dcalab_runner::export::{export_periods_csv, load_artifacts, save_artifacts};
use dcalab_runner::periods::run_periods_from_config;
use dcalab_runner::runner::run_single_backtest;

/// Exchange export layout: banner line, newest row first.
const BARS_CSV: &str = "\
https://www.CryptoDataDownload.com
unix,date,symbol,open,high,low,close,Volume BTC,Volume USD
1615161600,2021-03-08 00:00:00,BTC/USD,100.0,100.0,100.0,100.0,10,1000
1615075200,2021-03-07 00:00:00,BTC/USD,100.0,100.0,100.0,100.0,10,1000
1614988800,2021-03-06 00:00:00,BTC/USD,100.0,100.0,100.0,100.0,10,1000
1614902400,2021-03-05 00:00:00,BTC/USD,100.0,100.0,100.0,100.0,10,1000
1614816000,2021-03-04 00:00:00,BTC/USD,99.5,100.6,99.4,100.5,10,1000
1614729600,2021-03-03 00:00:00,BTC/USD,100.0,100.2,98.9,99.0,10,1000
1614643200,2021-03-02 00:00:00,BTC/USD,100.0,100.5,99.8,100.0,10,1000
1614556800,2021-03-01 00:00:00,BTC/USD,100.0,100.0,100.0,100.0,10,1000
";

fn write_fixture(dir: &Path, extra: &str) -> PathBuf {
    let data = dir.join("btcusd.csv");
    std::fs::write(&data, BARS_CSV).unwrap();
    let config = format!(
        r#"
[backtest]
symbol = "BTCUSD"
data = "{}"
initial_cash = 1000.0

[ladder]
target_profit_percent = 1.0
safety_orders_max = 3
safety_order_volume_scale = 1.0
safety_order_step_scale = 1.0
safety_order_price_deviation_percent = 1.0
base_order_size = 1.0
safety_order_size = 1.0
{extra}
"#,
        data.display()
    );
    let path = dir.join("backtest.toml");
    std::fs::write(&path, config).unwrap();
    path
}

#[test]
fn csv_backtest_records_the_deal() {
    let dir = tempfile::tempdir().unwrap();
    let config = BacktestConfig::from_file(&write_fixture(dir.path(), "")).unwrap();
    let result = run_single_backtest(&config).unwrap();

    assert!(!result.synthetic);
    assert_eq!(result.bar_count, 8);
    assert_eq!(result.start_date, "2021-03-01 00:00:00");

    assert_eq!(result.deals.len(), 1);
    let deal = &result.deals[0];
    assert_eq!(deal.deal_number, 1);
    assert_eq!(
        deal.opened_at.date(),
        NaiveDate::from_ymd_opt(2021, 3, 2).unwrap()
    );
    assert_eq!(
        deal.closed_at.date(),
        NaiveDate::from_ymd_opt(2021, 3, 4).unwrap()
    );
    assert_eq!(deal.summary.levels_filled, 1);
    assert_eq!(deal.summary.quantity, 2.0);
    assert!((deal.summary.exit_price - 100.495).abs() < 1e-9);
    assert!((deal.summary.net_profit - 1.99).abs() < 1e-9);

    // The second deal bought at 100 on 03-05 and is still open.
    let open = result.open_deal.as_ref().unwrap();
    assert_eq!(open.levels_filled, 0);
    assert_eq!(open.quantity_held, 1.0);
    assert!((result.metrics.final_value - 1_001.99).abs() < 1e-9);
    assert!((result.metrics.roi_percent - 0.199).abs() < 1e-9);
    // Bought at the 100.0 open, marked at the 100.0 close.
    assert!(result.metrics.benchmark_roi_percent.abs() < 1e-9);
}

#[test]
fn date_range_limits_bars() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BacktestConfig::from_file(&write_fixture(dir.path(), "")).unwrap();
    config.backtest.start = NaiveDate::from_ymd_opt(2021, 3, 5);
    let result = run_single_backtest(&config).unwrap();
    assert_eq!(result.bar_count, 4);
    assert!(result.deals.is_empty());
}

#[test]
fn missing_data_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BacktestConfig::from_file(&write_fixture(dir.path(), "")).unwrap();
    config.backtest.data = Some(dir.path().join("absent.csv"));
    let err = run_single_backtest(&config).unwrap_err();
    assert!(err.to_string().contains("absent.csv"));
}

#[test]
fn no_restart_stops_after_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path(), "\n[deal]\nrestart_after_failure = false\n");
    let mut config = BacktestConfig::from_file(&path).unwrap();
    // Base order affordable, first safety order not.
    config.backtest.initial_cash = 150.0;
    let result = run_single_backtest(&config).unwrap();
    assert_eq!(result.failures.len(), 1);
    assert!(matches!(
        result.failures[0].reason,
        FailureReason::MarginCall { .. }
    ));
    assert!(result.deals.is_empty());
    assert!(result.open_deal.is_none());
}

#[test]
fn periods_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let periods = r#"
[[periods]]
name = "dip"
start = "2021-03-01"
end = "2021-03-04"

[[periods]]
name = "flat"
start = "2021-03-05"
end = "2021-03-08"
"#;
    let config = BacktestConfig::from_file(&write_fixture(dir.path(), periods)).unwrap();
    let results = run_periods_from_config(&config).unwrap();

    assert_eq!(results.len(), 2);
    let dip = results[0].result.as_ref().unwrap();
    let flat = results[1].result.as_ref().unwrap();
    assert_eq!(dip.metrics.deals_closed, 1);
    assert_eq!(flat.metrics.deals_closed, 0);
    assert_eq!(flat.metrics.total_profit, 0.0);
    // 100.0 open on 03-01, 100.5 close on 03-04.
    assert!((results[0].benchmark_roi_percent().unwrap() - 0.5).abs() < 1e-9);

    let csv = export_periods_csv(&results).unwrap();
    assert!(csv.lines().next().unwrap().ends_with("deals_failed,benchmark_roi_percent,error"));
    assert!(csv
        .lines()
        .nth(1)
        .unwrap()
        .starts_with("dip,2021-03-01,2021-03-04,0.1990,1.99,1,0,0.5000"));
}

#[test]
fn artifacts_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = BacktestConfig::from_file(&write_fixture(dir.path(), "")).unwrap();
    let result = run_single_backtest(&config).unwrap();

    let out = dir.path().join("out");
    let run_dir = save_artifacts(&result, &out).unwrap();
    for file in ["manifest.json", "deals.csv", "equity.csv", "report.md"] {
        assert!(run_dir.join(file).exists(), "{file} missing");
    }

    let loaded = load_artifacts(&run_dir).unwrap();
    assert_eq!(loaded.run_id, result.run_id);
    assert_eq!(loaded.deals, result.deals);
    assert_eq!(loaded.equity_curve, result.equity_curve);
}
