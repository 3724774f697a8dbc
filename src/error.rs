use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{Indicator, LocationId};

/// Process-boundary error: a message plus the exit code `deaths` returns.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Errors raised inside the modeling and compile phases.
///
/// `InputMissing` and `SynthesisFailure` are scoped to one location: the
/// dispatcher records the location as failed and keeps going. Every other
/// kind aborts the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("location {location_id}: `{indicator}` has no observations and the location is not flagged to skip it")]
    InputMissing {
        location_id: LocationId,
        indicator: Indicator,
    },

    #[error("location {location_id}: synthesis failed at holdout depth {depth}: {message}")]
    SynthesisFailure {
        location_id: LocationId,
        depth: usize,
        message: String,
    },

    #[error("draw budget mismatch: allocated {allocated} draws, requested {requested}")]
    DrawBudgetMismatch { allocated: usize, requested: usize },

    #[error("draw id {draw_id} appears in more than one table being merged")]
    DrawIdCollision { draw_id: usize },

    #[error("interior gaps in {} location(s); see {}", .locations.len(), .report.display())]
    InteriorGap {
        locations: Vec<LocationId>,
        report: PathBuf,
    },

    #[error("aggregate {aggregate_id}: {message}")]
    AggregationShape {
        aggregate_id: LocationId,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in '{}': {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error in '{}': {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    pub fn synthesis(location_id: LocationId, depth: usize, message: impl Into<String>) -> Self {
        Self::SynthesisFailure {
            location_id,
            depth,
            message: message.into(),
        }
    }

    /// True when the failure only affects the location that raised it.
    pub fn is_location_scoped(&self) -> bool {
        matches!(self, Self::InputMissing { .. } | Self::SynthesisFailure { .. })
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Io { .. } | Self::Csv { .. } | Self::Json { .. } => 2,
            Self::InputMissing { .. } | Self::SynthesisFailure { .. } => 3,
            Self::DrawBudgetMismatch { .. } | Self::DrawIdCollision { .. } | Self::AggregationShape { .. } => 4,
            Self::InteriorGap { .. } => 5,
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_scoped_kinds() {
        let missing = PipelineError::InputMissing {
            location_id: LocationId(7),
            indicator: Indicator::ConfirmedCaseRate,
        };
        assert!(missing.is_location_scoped());
        assert!(PipelineError::synthesis(LocationId(7), 2, "bad shape").is_location_scoped());

        let budget = PipelineError::DrawBudgetMismatch {
            allocated: 9,
            requested: 10,
        };
        assert!(!budget.is_location_scoped());
        assert_eq!(budget.exit_code(), 4);
    }

    #[test]
    fn interior_gap_maps_to_abort_exit_code() {
        let err = PipelineError::InteriorGap {
            locations: vec![LocationId(1), LocationId(2)],
            report: PathBuf::from("out/problem_location_report.csv"),
        };
        let app: AppError = err.into();
        assert_eq!(app.exit_code(), 5);
        assert!(app.to_string().contains("2 location(s)"));
    }
}
