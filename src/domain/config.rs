//! Run configuration assembled from the CLI.

use std::path::PathBuf;

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Model-input CSV.
    pub input: PathBuf,
    /// Location hierarchy CSV.
    pub hierarchy: PathBuf,
    /// Optional infections draw table joined into the per-draw files.
    pub infections: Option<PathBuf>,
    pub output_root: PathBuf,

    pub holdouts: usize,
    pub n_draws: usize,
    /// Dates dropped from the end of every series before anything else.
    pub holdout_days: usize,
    pub seed: u64,
    /// Location worker pool size; 0 lets rayon decide.
    pub threads: usize,
    pub infection_threads: usize,

    /// Minimum cumulative deaths for a location to be modeled.
    pub death_threshold: f64,
    /// Minimum cumulative cases (hospitalizations) to run the CFR (HFR) model.
    pub epi_threshold: f64,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.n_draws == 0 {
            return Err(PipelineError::Config("--draws must be > 0".to_string()));
        }
        for (name, v) in [("--death-threshold", self.death_threshold), ("--epi-threshold", self.epi_threshold)] {
            if !v.is_finite() || v < 0.0 {
                return Err(PipelineError::Config(format!("{name} must be a finite value >= 0 (got {v})")));
            }
        }
        if self.infection_threads == 0 {
            return Err(PipelineError::Config("--infection-threads must be > 0".to_string()));
        }
        Ok(())
    }
}
