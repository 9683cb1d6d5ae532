//! Reporting and export: JSON, CSV and Markdown artifacts.
//!
//! - **JSON**: full round-trip serialization with schema versioning
//! - **CSV**: deal tape, equity curve and per-period summary
//! - **Markdown**: human-readable single-run report
//!
//! Persisted results carry a `schema_version`; newer versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::periods::PeriodResult;
use crate::runner::{BacktestResult, DealRecord, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export closed deals as CSV.
///
/// Columns: deal, opened_bar, opened_at, closed_bar, closed_at, bars_held,
/// entry_price, exit_price, quantity, levels_filled, levels_total,
/// invested_quote, proceeds_quote, gross_profit, commission, net_profit,
/// roi_percent
pub fn export_deals_csv(deals: &[DealRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "deal",
        "opened_bar",
        "opened_at",
        "closed_bar",
        "closed_at",
        "bars_held",
        "entry_price",
        "exit_price",
        "quantity",
        "levels_filled",
        "levels_total",
        "invested_quote",
        "proceeds_quote",
        "gross_profit",
        "commission",
        "net_profit",
        "roi_percent",
    ])?;

    for d in deals {
        let s = &d.summary;
        wtr.write_record([
            &d.deal_number.to_string(),
            &d.opened_bar.to_string(),
            &d.opened_at.to_string(),
            &d.closed_bar.to_string(),
            &d.closed_at.to_string(),
            &d.bars_held.to_string(),
            &format!("{:.8}", s.entry_price),
            &format!("{:.8}", s.exit_price),
            &format!("{:.8}", s.quantity),
            &s.levels_filled.to_string(),
            &s.levels_total.to_string(),
            &format!("{:.2}", s.invested_quote),
            &format!("{:.2}", s.proceeds_quote),
            &format!("{:.2}", s.gross_profit),
            &format!("{:.2}", s.commission),
            &format!("{:.2}", s.net_profit),
            &format!("{:.4}", s.roi_percent),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export an equity curve as CSV with bar_index and equity columns.
pub fn export_equity_csv(equity_curve: &[f64]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["bar_index", "equity"])?;
    for (i, eq) in equity_curve.iter().enumerate() {
        wtr.write_record([&i.to_string(), &format!("{:.2}", eq)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// One row per period: name, dates, ROI, profit, deal counts and buy-and-hold
/// ROI, or the error.
pub fn export_periods_csv(periods: &[PeriodResult]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "period",
        "start",
        "end",
        "roi_percent",
        "total_profit",
        "deals_closed",
        "deals_failed",
        "benchmark_roi_percent",
        "error",
    ])?;
    for p in periods {
        let (roi, profit, closed, failed, benchmark) = match &p.result {
            Some(r) => (
                format!("{:.4}", r.metrics.roi_percent),
                format!("{:.2}", r.metrics.total_profit),
                r.metrics.deals_closed.to_string(),
                r.metrics.deals_failed.to_string(),
                format!("{:.4}", r.metrics.benchmark_roi_percent),
            ),
            None => Default::default(),
        };
        wtr.write_record([
            p.name.as_str(),
            &p.start.to_string(),
            &p.end.to_string(),
            &roi,
            &profit,
            &closed,
            &failed,
            &benchmark,
            p.error.as_deref().unwrap_or(""),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for a single backtest run.
///
/// Creates `{symbol}_{run_id prefix}/` under `output_dir` containing:
/// - `manifest.json`: the full `BacktestResult`
/// - `deals.csv`: the deal tape
/// - `equity.csv`: bar-by-bar portfolio value
/// - `report.md`: the Markdown summary
///
/// Returns the path to the created directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let short_id = result.run_id.get(..12).unwrap_or(&result.run_id);
    let run_dir = output_dir.join(format!("{}_{}", result.symbol, short_id));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("manifest.json"), export_json(result)?)?;
    std::fs::write(run_dir.join("deals.csv"), export_deals_csv(&result.deals)?)?;
    std::fs::write(
        run_dir.join("equity.csv"),
        export_equity_csv(&result.equity_curve)?,
    )?;
    std::fs::write(run_dir.join("report.md"), generate_report(result))?;

    Ok(run_dir)
}

/// Load a `BacktestResult` from an artifact directory's manifest.json.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

/// Generate a Markdown report for a single backtest run.
pub fn generate_report(result: &BacktestResult) -> String {
    let mut md = String::with_capacity(2048);

    md.push_str("# DCA Backtest Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Symbol | {} |\n", result.symbol));
    md.push_str(&format!(
        "| Period | {} to {} |\n",
        result.start_date, result.end_date
    ));
    md.push_str(&format!("| Bars | {} |\n", result.bar_count));
    md.push_str(&format!("| Initial Cash | {:.2} |\n", result.initial_cash));
    md.push_str(&format!("| Run Id | {} |\n", result.run_id));
    md.push_str(&format!("| Dataset Hash | {} |\n", result.dataset_hash));
    if result.synthetic {
        md.push_str("| Data | **SYNTHETIC** |\n");
    }
    md.push('\n');

    let l = &result.config.ladder;
    md.push_str("## Ladder\n\n");
    md.push_str("| Parameter | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Target Profit | {}% |\n", l.target_profit_percent));
    md.push_str(&format!("| Safety Orders | {} |\n", l.safety_orders_max));
    md.push_str(&format!(
        "| Price Deviation | {}% |\n",
        l.safety_order_price_deviation_percent
    ));
    md.push_str(&format!("| Step Scale | {} |\n", l.safety_order_step_scale));
    md.push_str(&format!(
        "| Volume Scale | {} |\n",
        l.safety_order_volume_scale
    ));
    md.push_str(&format!(
        "| Dynamic Sizing | {} |\n",
        result.config.deal.dynamic_sizing
    ));
    md.push('\n');

    let m = &result.metrics;
    md.push_str("## Performance Summary\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Final Value | {:.2} |\n", m.final_value));
    md.push_str(&format!("| Profit | {:.2} |\n", m.total_profit));
    md.push_str(&format!("| ROI | {:.2}% |\n", m.roi_percent));
    md.push_str(&format!(
        "| Buy & Hold ROI | {:.2}% |\n",
        m.benchmark_roi_percent
    ));
    md.push_str(&format!(
        "| Max Drawdown | {:.2}% |\n",
        m.max_drawdown * 100.0
    ));
    md.push_str(&format!("| Deals Closed | {} |\n", m.deals_closed));
    md.push_str(&format!("| Deals Failed | {} |\n", m.deals_failed));
    md.push_str(&format!("| Realized Profit | {:.2} |\n", m.realized_profit));
    md.push_str(&format!("| Commission | {:.2} |\n", m.total_commission));
    md.push_str(&format!(
        "| Avg Levels Filled | {:.2} (max {}) |\n",
        m.avg_levels_filled, m.max_levels_filled
    ));
    md.push_str(&format!(
        "| Avg Bars Held | {:.1} (max {}) |\n",
        m.avg_bars_held, m.max_bars_held
    ));
    md.push('\n');

    if let Some(open) = &result.open_deal {
        md.push_str("## Open Deal\n\n");
        md.push_str(&format!(
            "Opened at {} (bar {}), {}/{} safety orders filled, {:.8} held for {:.2} invested.\n\n",
            open.opened_at,
            open.opened_bar,
            open.levels_filled,
            open.levels_total,
            open.quantity_held,
            open.invested_quote
        ));
    }

    if !result.failures.is_empty() {
        md.push_str("## Failures\n\n");
        for f in &result.failures {
            md.push_str(&format!("- bar {} ({}): {:?}\n", f.bar_index, f.timestamp, f.reason));
        }
        md.push('\n');
    }

    md
}
