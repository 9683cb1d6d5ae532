//! Serializable backtest configuration, loaded from TOML.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dcalab_core::deal::{DealSettings, TakeProfitKind};
use dcalab_core::ladder::{LadderConfig, LadderError, Parameters};
use dcalab_core::sim::CostModel;
use dcalab_core::sizing::SearchSettings;

/// Unique identifier for a backtest run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid ladder configuration: {0}")]
    Ladder(#[from] LadderError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full configuration for one backtest, plus optional named periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub backtest: BacktestSection,
    pub ladder: LadderConfig,
    #[serde(default)]
    pub deal: DealSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub periods: Vec<PeriodConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    pub symbol: String,
    /// Bar CSV. Optional when `synthetic` is set.
    #[serde(default)]
    pub data: Option<PathBuf>,
    #[serde(default)]
    pub synthetic: bool,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default = "default_initial_cash")]
    pub initial_cash: f64,
}

fn default_initial_cash() -> f64 {
    1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealSection {
    #[serde(default)]
    pub take_profit: TakeProfitKind,
    /// Re-size safety orders against portfolio value at every deal open.
    #[serde(default)]
    pub dynamic_sizing: bool,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub whole_units: bool,
    /// After a failed deal, cancel its leftover orders and keep trading.
    /// When false the run stops opening deals at the first failure.
    #[serde(default = "default_true")]
    pub restart_after_failure: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DealSection {
    fn default() -> Self {
        Self {
            take_profit: TakeProfitKind::Limit,
            dynamic_sizing: false,
            search: SearchSettings::default(),
            whole_units: false,
            restart_after_failure: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default)]
    pub commission_bps: f64,
    #[serde(default)]
    pub slippage_bps: f64,
}

/// A named date range for multi-period runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodConfig {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BacktestConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bt = &self.backtest;
        if bt.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("backtest.symbol is empty".into()));
        }
        if bt.data.is_none() && !bt.synthetic {
            return Err(ConfigError::Invalid(
                "set backtest.data or backtest.synthetic = true".into(),
            ));
        }
        if !bt.initial_cash.is_finite() || bt.initial_cash <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "backtest.initial_cash must be positive, got {}",
                bt.initial_cash
            )));
        }
        if let (Some(start), Some(end)) = (bt.start, bt.end) {
            if start > end {
                return Err(ConfigError::Invalid(format!(
                    "backtest.start {start} is after backtest.end {end}"
                )));
            }
        }
        for period in &self.periods {
            if period.start > period.end {
                return Err(ConfigError::Invalid(format!(
                    "period '{}' starts after it ends",
                    period.name
                )));
            }
        }
        if let TakeProfitKind::TrailingStopLimit { trail_percent } = self.deal.take_profit {
            if !(trail_percent > 0.0 && trail_percent < 100.0) {
                return Err(ConfigError::Invalid(format!(
                    "deal.take_profit.trail_percent must be in (0, 100), got {trail_percent}"
                )));
            }
        }
        let ex = &self.execution;
        if ex.commission_bps < 0.0 || ex.slippage_bps < 0.0 {
            return Err(ConfigError::Invalid(
                "execution costs must be non-negative".into(),
            ));
        }
        self.parameters()?;
        Ok(())
    }

    pub fn parameters(&self) -> Result<Parameters, ConfigError> {
        Ok(Parameters::try_from(&self.ladder)?)
    }

    pub fn deal_settings(&self) -> Result<DealSettings, ConfigError> {
        Ok(DealSettings {
            params: self.parameters()?,
            take_profit: self.deal.take_profit.clone(),
            dynamic_sizing: self
                .deal
                .dynamic_sizing
                .then(|| self.deal.search.clone()),
            whole_units: self.deal.whole_units,
        })
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel::new(self.execution.slippage_bps, self.execution.commission_bps)
    }

    /// Copy of this config restricted to one period.
    pub fn for_period(&self, period: &PeriodConfig) -> Self {
        let mut config = self.clone();
        config.backtest.start = Some(period.start);
        config.backtest.end = Some(period.end);
        config.periods.clear();
        config
    }

    /// Deterministic hash of the whole configuration.
    ///
    /// Two runs with identical configs get the same id.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
