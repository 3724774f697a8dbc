//! Black-box model contracts and their reference implementations.
//!
//! The ensemble runner only talks to the two traits defined here:
//!
//! - `FirstStagePredictor` turns a (possibly truncated) series into a
//!   predicted death-rate column for one ratio model (CFR or HFR)
//! - `SeriesSynthesizer` turns the combined observed + predicted series into
//!   noisy and smoothed draws for one holdout depth
//!
//! `RatioRegression` and `SplineSmoother` are simple defaults so the binary
//! runs end to end; production deployments plug their own models in.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::domain::{DrawTable, FirstStageSettings, LocationSeries, SmootherSettings};
use crate::error::PipelineError;

pub mod first_stage;
pub mod smoother;

pub use first_stage::RatioRegression;
pub use smoother::SplineSmoother;

/// Predicted death rate keyed by date.
pub type Prediction = BTreeMap<NaiveDate, f64>;

pub trait FirstStagePredictor: Send + Sync {
    fn predict(&self, series: &LocationSeries, settings: &FirstStageSettings) -> Result<Prediction, PipelineError>;
}

/// Inputs for one synthesis call.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub series: &'a LocationSeries,
    pub holdout_depth: usize,
    pub draw_count: usize,
    /// Explicit seed; implementations must not read ambient random state.
    pub seed: u64,
    pub settings: &'a SmootherSettings,
}

/// Rate draws for one iteration, columns `draw_0..draw_{n-1}`, with population.
#[derive(Debug, Clone)]
pub struct SynthesizedDraws {
    pub noisy: DrawTable,
    pub smooth: DrawTable,
}

pub trait SeriesSynthesizer: Send + Sync {
    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<SynthesizedDraws, PipelineError>;
}
