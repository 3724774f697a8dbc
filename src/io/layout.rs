//! File layout under `--output-root`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root and working directories.
    pub fn create_dirs(&self) -> Result<(), PipelineError> {
        for dir in [self.root.clone(), self.working_dir(), self.results_dir()] {
            fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn working_dir(&self) -> PathBuf {
        self.root.join("model_working_dir")
    }

    pub fn settings(&self) -> PathBuf {
        self.working_dir().join("settings.json")
    }

    /// Metadata written after preparation, completed by `compile`.
    pub fn prepared_metadata(&self) -> PathBuf {
        self.working_dir().join("metadata.json")
    }

    /// Prepared model inputs (after truncation, aggregation and thresholds).
    pub fn model_inputs(&self) -> PathBuf {
        self.working_dir().join("model_inputs.csv")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.working_dir().join("results")
    }

    pub fn model_data(&self) -> PathBuf {
        self.root.join("model_data.csv")
    }

    pub fn model_results(&self) -> PathBuf {
        self.root.join("model_results.csv")
    }

    pub fn model_results_refit(&self) -> PathBuf {
        self.root.join("model_results_refit.csv")
    }

    pub fn model_results_refit_nans(&self) -> PathBuf {
        self.root.join("model_results_refit_nans.csv")
    }

    pub fn problem_location_report(&self) -> PathBuf {
        self.root.join("problem_location_report.csv")
    }

    pub fn model_data_aggregates(&self) -> PathBuf {
        self.root.join("model_data_aggregates.csv")
    }

    pub fn model_results_refit_aggregates(&self) -> PathBuf {
        self.root.join("model_results_refit_aggregates.csv")
    }

    pub fn model_summary(&self) -> PathBuf {
        self.root.join("model_summary.csv")
    }

    pub fn infections_dir(&self) -> PathBuf {
        self.root.join("infections")
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join("metadata.json")
    }
}
