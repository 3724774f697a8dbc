//! Stitch per-iteration draws into one ensemble per location.

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::{DrawTable, LocationId, ModelDataBundle};
use crate::ensemble::holdout::{HoldoutIteration, check_budget};
use crate::ensemble::iteration::IterationResult;
use crate::error::PipelineError;

/// Merge iteration results (in plan order) into one bundle.
///
/// - iteration `i`'s local `draw_0..draw_{d_i-1}` become global ids starting
///   at the plan's offset, so the ensemble covers `0..n_draws` exactly once
/// - noisy and smooth tables are outer-merged on `(location, date)`
/// - the depth-0 model data is kept as the reported record
/// - rate draws are multiplied by population and the population dropped
pub fn assemble(
    plan: &[HoldoutIteration],
    results: Vec<IterationResult>,
    n_draws: usize,
) -> Result<ModelDataBundle, PipelineError> {
    check_budget(plan, n_draws)?;
    if results.len() != plan.len() {
        return Err(PipelineError::Config(format!(
            "expected {} iteration results, got {}",
            plan.len(),
            results.len()
        )));
    }

    let mut model_data = None;
    let mut noisy = Vec::with_capacity(results.len());
    let mut smooth = Vec::with_capacity(results.len());
    for (iteration, result) in plan.iter().zip(results) {
        if result.depth != iteration.depth {
            return Err(PipelineError::Config(format!(
                "iteration results out of order: got depth {} where depth {} was planned",
                result.depth, iteration.depth
            )));
        }
        for table in [&result.draws.noisy, &result.draws.smooth] {
            if !table.has_contiguous_ids(iteration.draws) {
                return Err(PipelineError::DrawBudgetMismatch {
                    allocated: table.n_draws(),
                    requested: iteration.draws,
                });
            }
        }
        debug!(
            depth = iteration.depth,
            first = iteration.draw_offset,
            count = iteration.draws,
            "Relabelling iteration draws."
        );
        noisy.push(result.draws.noisy.relabel(iteration.draw_offset));
        smooth.push(result.draws.smooth.relabel(iteration.draw_offset));
        if model_data.is_none() {
            model_data = Some(result.model_data);
        }
    }

    let Some(model_data) = model_data else {
        return Err(PipelineError::Config("no holdout iterations to assemble".to_string()));
    };
    let location_id = model_data.location_id;

    let noisy = DrawTable::outer_merge(noisy)?;
    let smooth = DrawTable::outer_merge(smooth)?;
    for table in [&noisy, &smooth] {
        if !table.has_contiguous_ids(n_draws) {
            return Err(PipelineError::DrawBudgetMismatch {
                allocated: table.n_draws(),
                requested: n_draws,
            });
        }
    }

    let missing_population = |(loc, date): (LocationId, NaiveDate)| {
        PipelineError::synthesis(loc, 0, format!("draw row for {date} has no population"))
    };
    let noisy_draws = noisy.rescale_by_population().map_err(missing_population)?;
    let smooth_draws = smooth.rescale_by_population().map_err(missing_population)?;

    Ok(ModelDataBundle {
        location_id,
        model_data,
        noisy_draws,
        smooth_draws,
    })
}
