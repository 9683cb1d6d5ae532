//! DCA Lab CLI: ladder tables, sizing searches and backtests.
//!
//! Commands:
//! - `ladder`: print the safety-order ladder for an entry price
//! - `size`: search the safety-order size that fits a cash budget
//! - `run`: execute a backtest from a TOML config file
//! - `periods`: run the config's `[[periods]]` in parallel and compare ROI
//!
//! Logs go to stderr; set `RUST_LOG` to override the default `dcalab=info`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dcalab_core::ladder::{compute, LadderShape, Parameters, SizingKind, SizingMode};
use dcalab_core::sizing::{search, SearchSettings, SizingRequest};
use dcalab_runner::export::{export_json, export_periods_csv, save_artifacts};
use dcalab_runner::{run_periods_from_config, run_single_backtest, BacktestConfig, BacktestResult};

#[derive(Parser)]
#[command(name = "dcalab", version, about = "DCA Lab CLI: safety-order ladders and deal backtests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the safety-order ladder for an entry price.
    Ladder {
        /// Read ladder parameters from the `[ladder]` section of a TOML config.
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        shape: ShapeArgs,

        /// Base order size.
        #[arg(long)]
        base_order_size: Option<f64>,

        /// First safety order size.
        #[arg(long)]
        safety_order_size: Option<f64>,

        /// Sizes are in quote currency instead of base asset.
        #[arg(long, default_value_t = false)]
        quote: bool,

        /// Entry (base order fill) price.
        #[arg(long)]
        entry_price: f64,

        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Find the largest safety-order size whose filled ladder fits a budget.
    Size {
        /// Read ladder shape, base order size and search settings from a TOML config.
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        shape: ShapeArgs,

        /// Base order size.
        #[arg(long)]
        base_order_size: Option<f64>,

        /// Sizes are in quote currency instead of base asset.
        #[arg(long, default_value_t = false)]
        quote: bool,

        /// Entry (base order fill) price.
        #[arg(long)]
        entry_price: f64,

        /// Cash budget. Defaults to `backtest.initial_cash` with --config.
        #[arg(long)]
        budget: Option<f64>,

        /// Starting size for the search.
        #[arg(long)]
        seed: Option<f64>,

        /// Iteration cap.
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Execute a backtest from a TOML config file.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Save manifest.json, deals.csv, equity.csv and report.md here.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Print the full result as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Run every `[[periods]]` entry of a config and compare results.
    Periods {
        /// Path to a TOML config file with at least one `[[periods]]` table.
        #[arg(long)]
        config: PathBuf,

        /// Write the per-period summary as CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

/// Ladder geometry given on the command line.
#[derive(Args)]
struct ShapeArgs {
    /// Take-profit target, in percent.
    #[arg(long = "tp")]
    target_profit_percent: Option<f64>,

    /// Number of safety orders.
    #[arg(long = "safety-orders")]
    safety_orders_max: Option<u32>,

    /// Safety orders allowed to work at once (reported only).
    #[arg(long = "active-safety-orders")]
    safety_orders_active_max: Option<u32>,

    /// Size multiplier between consecutive safety orders.
    #[arg(long = "volume-scale", default_value_t = 1.0)]
    safety_order_volume_scale: f64,

    /// Step multiplier between consecutive deviations.
    #[arg(long = "step-scale", default_value_t = 1.0)]
    safety_order_step_scale: f64,

    /// Deviation of the first safety order below entry, in percent.
    #[arg(long = "deviation")]
    safety_order_price_deviation_percent: Option<f64>,
}

impl ShapeArgs {
    fn to_shape(&self) -> Result<LadderShape> {
        let (Some(tp), Some(max), Some(deviation)) = (
            self.target_profit_percent,
            self.safety_orders_max,
            self.safety_order_price_deviation_percent,
        ) else {
            bail!("--tp, --safety-orders and --deviation are required without --config");
        };
        let shape = LadderShape {
            target_profit_percent: tp,
            safety_orders_max: max,
            safety_orders_active_max: self.safety_orders_active_max.unwrap_or(max),
            safety_order_volume_scale: self.safety_order_volume_scale,
            safety_order_step_scale: self.safety_order_step_scale,
            safety_order_price_deviation_percent: deviation,
        };
        shape.validate()?;
        Ok(shape)
    }
}

fn sizing_kind(quote: bool) -> SizingKind {
    if quote {
        SizingKind::QuoteCurrency
    } else {
        SizingKind::BaseAsset
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("dcalab=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ladder {
            config,
            shape,
            base_order_size,
            safety_order_size,
            quote,
            entry_price,
            json,
        } => {
            let params = match config {
                Some(path) => BacktestConfig::from_file(&path)?.parameters()?,
                None => {
                    let (Some(base), Some(safety)) = (base_order_size, safety_order_size) else {
                        bail!("--base-order-size and --safety-order-size are required without --config");
                    };
                    Parameters::new(
                        shape.to_shape()?,
                        SizingMode::new(sizing_kind(quote), base, safety),
                    )?
                }
            };
            run_ladder(&params, entry_price, json)
        }
        Commands::Size {
            config,
            shape,
            base_order_size,
            quote,
            entry_price,
            budget,
            seed,
            max_iterations,
        } => {
            let (shape, kind, base, default_budget, mut settings) = match config {
                Some(path) => {
                    let config = BacktestConfig::from_file(&path)?;
                    let params = config.parameters()?;
                    (
                        params.shape,
                        params.sizing.kind(),
                        params.sizing.base_order_size(),
                        Some(config.backtest.initial_cash),
                        config.deal.search,
                    )
                }
                None => (
                    shape.to_shape()?,
                    sizing_kind(quote),
                    base_order_size.context("--base-order-size is required without --config")?,
                    None,
                    SearchSettings::default(),
                ),
            };
            let budget = budget
                .or(default_budget)
                .context("--budget is required without --config")?;
            if seed.is_some() {
                settings.seed = seed;
            }
            if let Some(cap) = max_iterations {
                settings.max_iterations = cap;
            }
            let request =
                SizingRequest::new(shape, kind, base, entry_price, budget).with_settings(settings);
            run_size(&request)
        }
        Commands::Run {
            config,
            output_dir,
            json,
        } => run_backtest_cmd(&config, output_dir.as_deref(), json),
        Commands::Periods { config, csv } => run_periods_cmd(&config, csv.as_deref()),
    }
}

fn run_ladder(params: &Parameters, entry_price: f64, json: bool) -> Result<()> {
    let ladder = compute(params, entry_price)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ladder)?);
    } else {
        print!("{}", ladder.table());
    }
    Ok(())
}

fn run_size(request: &SizingRequest) -> Result<()> {
    let outcome = search(request)?;
    println!("Safety order size: {}", outcome.safety_order_size);
    println!(
        "Filled ladder total: {:.8} of budget {:.8}",
        outcome.final_total_quote, request.budget
    );
    println!(
        "Tolerance: {}%  Iterations: {}",
        outcome.tolerance_percent, outcome.iterations
    );
    println!();
    print!("{}", outcome.ladder.table());
    Ok(())
}

fn run_backtest_cmd(config_path: &Path, output_dir: Option<&Path>, json: bool) -> Result<()> {
    let config = BacktestConfig::from_file(config_path)?;
    let result = run_single_backtest(&config)
        .with_context(|| format!("backtest for {} failed", config.backtest.symbol))?;

    if json {
        println!("{}", export_json(&result)?);
    } else {
        print_summary(&result);
    }

    if let Some(dir) = output_dir {
        let run_dir = save_artifacts(&result, dir)?;
        info!(path = %run_dir.display(), "artifacts saved");
    }
    Ok(())
}

fn run_periods_cmd(config_path: &Path, csv: Option<&Path>) -> Result<()> {
    let config = BacktestConfig::from_file(config_path)?;
    if config.periods.is_empty() {
        bail!("no [[periods]] tables in {}", config_path.display());
    }
    let results = run_periods_from_config(&config)?;

    println!(
        "{:<20} {:>10} {:>10} {:>10} {:>14} {:>6} {:>10}",
        "period", "start", "end", "roi %", "profit", "deals", "b&h %"
    );
    for p in &results {
        match &p.result {
            Some(r) => println!(
                "{:<20} {:>10} {:>10} {:>10.4} {:>14.2} {:>6} {:>10.4}",
                p.name,
                p.start,
                p.end,
                r.metrics.roi_percent,
                r.metrics.total_profit,
                r.metrics.deals_closed,
                r.metrics.benchmark_roi_percent
            ),
            None => println!(
                "{:<20} {:>10} {:>10} error: {}",
                p.name,
                p.start,
                p.end,
                p.error.as_deref().unwrap_or("unknown")
            ),
        }
    }

    if let Some(path) = csv {
        std::fs::write(path, export_periods_csv(&results)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!("=== Backtest: {} ===", result.symbol);
    println!(
        "Period:          {} to {} ({} bars)",
        result.start_date, result.end_date, result.bar_count
    );
    if result.synthetic {
        println!("Data:            SYNTHETIC");
    }
    println!("Start value:     {:.2}", m.start_value);
    println!("Final value:     {:.2}", m.final_value);
    println!("Profit:          {:.2}", m.total_profit);
    println!("ROI:             {:.4}%", m.roi_percent);
    println!("Buy & hold ROI:  {:.4}%", m.benchmark_roi_percent);
    println!("Max drawdown:    {:.2}%", m.max_drawdown * 100.0);
    println!(
        "Deals:           {} closed, {} failed",
        m.deals_closed, m.deals_failed
    );
    println!(
        "Levels filled:   {:.2} avg, {} max",
        m.avg_levels_filled, m.max_levels_filled
    );
    if let Some(open) = &result.open_deal {
        println!(
            "Open deal:       {}/{} levels, {:.8} held",
            open.levels_filled, open.levels_total, open.quantity_held
        );
    }
    println!("Run id:          {}", result.run_id);
}
