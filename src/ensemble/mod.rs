//! Holdout ensemble for one location.
//!
//! Responsibilities:
//!
//! - plan holdout depths and per-iteration draw quotas (`holdout`)
//! - run each iteration: truncate, first stage, merge, synthesize (`iteration`)
//! - stitch the iterations into one draw set and rescale to counts (`assemble`)

use tracing::info;

use crate::domain::{FirstStageKind, Indicator, LocationId, LocationSeries, ModelDataBundle, ModelSettings};
use crate::error::PipelineError;
use crate::models::{FirstStagePredictor, SeriesSynthesizer};

pub mod assemble;
pub mod holdout;
pub mod iteration;

pub use assemble::*;
pub use holdout::*;
pub use iteration::*;

/// Shared, read-only collaborators for a location run.
#[derive(Clone, Copy)]
pub struct EnsembleContext<'a> {
    pub settings: &'a ModelSettings,
    pub predictor: &'a dyn FirstStagePredictor,
    pub synthesizer: &'a dyn SeriesSynthesizer,
}

/// SplitMix64 finalizer. Fixed arithmetic, so seeds do not depend on the
/// toolchain or platform.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Deterministic seed for a location, independent of run order.
pub fn location_seed(base_seed: u64, location_id: LocationId) -> u64 {
    mix(mix(base_seed) ^ location_id.0 as u64)
}

/// Seed handed to the synthesizer for one holdout depth.
pub fn iteration_seed(location_seed: u64, depth: usize) -> u64 {
    mix(location_seed ^ mix(depth as u64))
}

/// Fail early when a required channel has no observations at all.
pub fn require_inputs(series: &LocationSeries, settings: &ModelSettings) -> Result<(), PipelineError> {
    let mut required = vec![settings.smoother.obs_var];
    for kind in FirstStageKind::ALL {
        if !settings.skips(series.location_id, kind) {
            required.push(settings.first_stage(kind).spline_var);
        }
    }
    for indicator in required {
        if series.observed_count(indicator) == 0 {
            return Err(PipelineError::InputMissing {
                location_id: series.location_id,
                indicator,
            });
        }
    }
    Ok(())
}

/// Fit every holdout iteration for `series` (depth ascending) and assemble.
pub fn run_location(ctx: &EnsembleContext<'_>, series: &LocationSeries) -> Result<ModelDataBundle, PipelineError> {
    let settings = ctx.settings;
    require_inputs(series, settings)?;

    let plan = plan_holdouts(settings.holdouts, settings.n_draws)?;
    let seed = location_seed(settings.seed, series.location_id);
    info!(
        location_id = %series.location_id,
        location = %series.location_name,
        iterations = plan.len(),
        deaths_observed = series.observed_count(Indicator::DeathRate),
        "Modeling location."
    );

    let results = plan
        .iter()
        .map(|&iteration| run_iteration(ctx, series, iteration, seed))
        .collect::<Result<Vec<_>, _>>()?;

    assemble(&plan, results, settings.n_draws)
}
