//! Bar loading for the runner.
//!
//! Two sources:
//! 1. A CSV file with a `date`/`timestamp` column and `open`, `high`, `low`,
//!    `close` (plus an optional volume column). Header matching is
//!    case-insensitive; extra columns are ignored. Rows may come newest-first
//!    and are sorted ascending. A banner line before the header is skipped.
//! 2. Synthetic bars (`synthetic = true`): a seeded random walk for
//!    development. Results on synthetic data are tagged as such.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, warn};

use dcalab_core::domain::Bar;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("no header row with an 'open' column found")]
    NoHeader,

    #[error("missing column '{0}' (need date or timestamp, open, high, low, close)")]
    MissingColumn(&'static str),

    #[error("line {line}: cannot parse date '{value}'")]
    BadDate { line: u64, value: String },

    #[error("line {line}: cannot parse {column} value '{value}'")]
    BadNumber {
        line: u64,
        column: &'static str,
        value: String,
    },

    #[error("no bars for '{symbol}' in the requested range")]
    Empty { symbol: String },

    #[error("no data file for '{symbol}' (set backtest.data or synthetic = true)")]
    NoDataSource { symbol: String },
}

/// Options controlling how bars are loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    /// First date kept (inclusive).
    pub start: Option<NaiveDate>,
    /// Last date kept (inclusive).
    pub end: Option<NaiveDate>,
    /// Generate synthetic bars when no file is given.
    pub synthetic: bool,
}

/// Loaded bars with provenance.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub bars: Vec<Bar>,
    /// BLAKE3 over every bar, for fingerprinting.
    pub dataset_hash: String,
    pub synthetic: bool,
    /// Rows dropped for empty price fields or duplicate timestamps.
    pub skipped_rows: usize,
}

/// Load bars for `symbol` from `path`, or synthesize them if allowed.
pub fn load_bars(
    symbol: &str,
    path: Option<&Path>,
    opts: &LoadOptions,
) -> Result<LoadedData, LoadError> {
    let (bars, skipped_rows, synthetic) = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let (bars, skipped) = parse_csv(&text)?;
            (bars, skipped, false)
        }
        None if opts.synthetic => {
            warn!(symbol, "generating synthetic bars, results will be tagged as synthetic");
            let start = opts
                .start
                .or_else(|| NaiveDate::from_ymd_opt(2021, 1, 1))
                .ok_or_else(|| LoadError::Empty {
                    symbol: symbol.to_string(),
                })?;
            let end = opts
                .end
                .unwrap_or_else(|| start + chrono::Duration::days(365));
            (generate_synthetic_bars(symbol, start, end), 0, true)
        }
        None => {
            return Err(LoadError::NoDataSource {
                symbol: symbol.to_string(),
            })
        }
    };

    let bars = filter_range(bars, opts.start, opts.end);
    if bars.is_empty() {
        return Err(LoadError::Empty {
            symbol: symbol.to_string(),
        });
    }
    debug!(symbol, bars = bars.len(), skipped_rows, synthetic, "bars loaded");

    Ok(LoadedData {
        dataset_hash: dataset_hash(&bars),
        bars,
        synthetic,
        skipped_rows,
    })
}

/// Keep bars whose date lies in `[start, end]`.
pub fn filter_range(bars: Vec<Bar>, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<Bar> {
    bars.into_iter()
        .filter(|b| {
            let date = b.timestamp.date();
            start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
        })
        .collect()
}

struct Columns {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, LoadError> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
        let find = |name: &'static str| {
            names
                .iter()
                .position(|h| h == name)
                .ok_or(LoadError::MissingColumn(name))
        };
        let timestamp = names
            .iter()
            .position(|h| h == "date" || h == "timestamp" || h == "datetime")
            .ok_or(LoadError::MissingColumn("date"))?;
        Ok(Self {
            timestamp,
            open: find("open")?,
            high: find("high")?,
            low: find("low")?,
            close: find("close")?,
            // "volume", or exchange-style "Volume USDT".
            volume: names.iter().position(|h| h.starts_with("volume")),
        })
    }
}

/// Parse bar CSV text. Returns the bars (ascending, unique timestamps) and the
/// number of rows dropped.
pub fn parse_csv(text: &str) -> Result<(Vec<Bar>, usize), LoadError> {
    let body = skip_banner(text).ok_or(LoadError::NoHeader)?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let columns = Columns::resolve(reader.headers()?)?;

    let mut bars = Vec::new();
    let mut skipped = 0;
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let field = |i: usize| record.get(i).unwrap_or("");

        let prices = [
            field(columns.open),
            field(columns.high),
            field(columns.low),
            field(columns.close),
        ];
        // Null rows in exchange exports.
        if prices.iter().any(|p| p.is_empty() || p.eq_ignore_ascii_case("null")) {
            skipped += 1;
            continue;
        }

        let raw_ts = field(columns.timestamp);
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| LoadError::BadDate {
            line,
            value: raw_ts.to_string(),
        })?;
        let number = |column: &'static str, value: &str| {
            value.parse::<f64>().map_err(|_| LoadError::BadNumber {
                line,
                column,
                value: value.to_string(),
            })
        };
        let volume = match columns.volume.map(field) {
            Some(v) if !v.is_empty() => number("volume", v)?,
            _ => 0.0,
        };

        bars.push(Bar {
            timestamp,
            open: number("open", prices[0])?,
            high: number("high", prices[1])?,
            low: number("low", prices[2])?,
            close: number("close", prices[3])?,
            volume,
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    let before = bars.len();
    bars.dedup_by_key(|b| b.timestamp);
    skipped += before - bars.len();

    Ok((bars, skipped))
}

/// Drop any lines before the first one that names an `open` column.
fn skip_banner(text: &str) -> Option<&str> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let is_header = line
            .split(',')
            .any(|cell| cell.trim().eq_ignore_ascii_case("open"));
        if is_header {
            return Some(&text[offset..]);
        }
        offset += line.len();
    }
    None
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Deterministic BLAKE3 hash over timestamps and OHLCV values.
pub fn dataset_hash(bars: &[Bar]) -> String {
    let mut hasher = blake3::Hasher::new();
    for bar in bars {
        hasher.update(bar.timestamp.to_string().as_bytes());
        hasher.update(&bar.open.to_le_bytes());
        hasher.update(&bar.high.to_le_bytes());
        hasher.update(&bar.low.to_le_bytes());
        hasher.update(&bar.close.to_le_bytes());
        hasher.update(&bar.volume.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Daily random-walk bars from 100.0, seeded by the symbol name so the same
/// symbol always yields the same series. Crypto trades every day, so no
/// calendar gaps.
pub fn generate_synthetic_bars(symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let mut bars = Vec::new();
    let mut price = 100.0_f64;
    let mut current = start;

    while current <= end {
        let daily_return: f64 = rng.gen_range(-0.03..0.03);
        let open = price;
        let close = price * (1.0 + daily_return);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        let volume = rng.gen_range(500_000.0..5_000_000.0);

        if let Some(timestamp) = current.and_hms_opt(0, 0, 0) {
            bars.push(Bar {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            });
        }

        price = close;
        current += chrono::Duration::days(1);
    }

    bars
}
