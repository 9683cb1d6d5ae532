//! Dynamic sizing search: find a safety-order size whose fully filled ladder
//! commits as much of a cash budget as possible without exceeding it.
//!
//! Unit-step hill climbing: below the band the size grows by one step, above
//! the budget it shrinks by one step. Once the search has both over- and
//! undershot since the last widening, the tolerance band widens by one
//! percentage point. The iteration cap turns non-convergence into an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ladder::{compute, Ladder, LadderError, LadderShape, Parameters, SizingKind, SizingMode};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("budget must be a positive number, got {0}")]
    InvalidBudget(f64),

    #[error("invalid search settings: {0}")]
    InvalidSettings(String),

    #[error(
        "sizing search did not converge after {iterations} iterations \
         (last size {last_size}, tolerance {tolerance_percent}%)"
    )]
    DidNotConverge {
        iterations: usize,
        last_size: f64,
        tolerance_percent: f64,
    },

    #[error(transparent)]
    Ladder(#[from] LadderError),
}

/// Knobs of the search loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Starting size. Defaults to half the base order size, floored to whole units.
    pub seed: Option<f64>,
    pub step: f64,
    pub initial_tolerance_percent: f64,
    pub max_iterations: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            seed: None,
            step: 1.0,
            initial_tolerance_percent: 1.0,
            max_iterations: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingRequest {
    pub shape: LadderShape,
    pub kind: SizingKind,
    pub base_order_size: f64,
    pub entry_price: f64,
    pub budget: f64,
    pub settings: SearchSettings,
}

impl SizingRequest {
    pub fn new(
        shape: LadderShape,
        kind: SizingKind,
        base_order_size: f64,
        entry_price: f64,
        budget: f64,
    ) -> Self {
        Self {
            shape,
            kind,
            base_order_size,
            entry_price,
            budget,
            settings: SearchSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SearchSettings) -> Self {
        self.settings = settings;
        self
    }

    fn seed(&self) -> f64 {
        self.settings
            .seed
            .unwrap_or_else(|| (self.base_order_size / 2.0).floor().max(self.settings.step))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingOutcome {
    pub safety_order_size: f64,
    /// Tolerance band width at termination, in percent.
    pub tolerance_percent: f64,
    pub iterations: usize,
    /// Last level's cumulative quote amount.
    pub final_total_quote: f64,
    pub ladder: Ladder,
}

impl SizingOutcome {
    pub fn sizing_mode(&self, kind: SizingKind, base_order_size: f64) -> SizingMode {
        SizingMode::new(kind, base_order_size, self.safety_order_size)
    }
}

pub fn search(request: &SizingRequest) -> Result<SizingOutcome, SizingError> {
    if !request.budget.is_finite() || request.budget <= 0.0 {
        return Err(SizingError::InvalidBudget(request.budget));
    }
    let settings = &request.settings;
    if !settings.step.is_finite() || settings.step <= 0.0 {
        return Err(SizingError::InvalidSettings(format!(
            "step must be positive, got {}",
            settings.step
        )));
    }
    if !settings.initial_tolerance_percent.is_finite() || settings.initial_tolerance_percent < 0.0
    {
        return Err(SizingError::InvalidSettings(format!(
            "tolerance must be non-negative, got {}",
            settings.initial_tolerance_percent
        )));
    }

    let mut size = request.seed();
    let mut tolerance_percent = settings.initial_tolerance_percent;
    let mut overshot = false;
    let mut undershot = false;
    let mut iterations = 0;

    loop {
        if iterations >= settings.max_iterations || size <= 0.0 {
            return Err(SizingError::DidNotConverge {
                iterations,
                last_size: size,
                tolerance_percent,
            });
        }
        iterations += 1;

        let params = Parameters::new(
            request.shape.clone(),
            SizingMode::new(request.kind, request.base_order_size, size),
        )?;
        let ladder = compute(&params, request.entry_price)?;
        let total = ladder.final_total_quantity_quote();

        if overshot && undershot {
            tolerance_percent += 1.0;
            overshot = false;
            undershot = false;
            debug!(tolerance_percent, size, "sizing search widened tolerance");
            continue;
        }

        let floor = request.budget * (1.0 - tolerance_percent / 100.0);
        if total < floor {
            size += settings.step;
            undershot = true;
        } else if total > request.budget {
            size -= settings.step;
            overshot = true;
        } else {
            debug!(size, tolerance_percent, iterations, total, "sizing search converged");
            return Ok(SizingOutcome {
                safety_order_size: size,
                tolerance_percent,
                iterations,
                final_total_quote: total,
                ladder,
            });
        }
    }
}
