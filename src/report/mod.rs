//! Reporting: run metadata, draw summaries and the terminal run summary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::LocationId;

pub mod format;
pub mod summary;

pub use format::*;
pub use summary::*;

/// Run settings and every location list the pipeline flags along the way.
///
/// Written to the working directory after preparation and completed (then
/// published) by the compile stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub input: PathBuf,
    pub hierarchy: PathBuf,
    pub infections: Option<PathBuf>,
    pub holdouts: usize,
    pub n_draws: usize,
    pub seed: u64,
    pub holdout_days: usize,
    pub death_threshold: f64,
    pub epi_threshold: f64,
    pub reporting_lag_days: i64,

    /// Locations handed to the per-location workers.
    pub model_locations: Vec<LocationId>,
    /// Pre-model aggregates added to the inputs.
    pub input_aggregates: Vec<LocationId>,
    pub dropped_locations: Vec<LocationId>,
    pub no_cases_locs: Vec<LocationId>,
    pub no_hosp_locs: Vec<LocationId>,
    pub failed_model_locations: Vec<LocationId>,
    pub nan_locations: Vec<LocationId>,
    pub aggregate_missing_constituents: BTreeMap<LocationId, Vec<LocationId>>,

    pub modeled_locations: usize,
    pub aggregate_locations: usize,
    pub infection_files: usize,
}
