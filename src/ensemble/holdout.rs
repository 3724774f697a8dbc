//! Holdout planning and tail blanking.
//!
//! A run with `H` requested holdouts fits `H + 1` iterations: depth 0 (all
//! data) followed by depths `1..=H`. Depth `h` treats the last `h` observed
//! values of every tracked indicator as missing.

use serde::{Deserialize, Serialize};

use crate::domain::{Indicator, LocationSeries};
use crate::error::PipelineError;

/// One planned iteration: its depth and the slice of global draw ids it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldoutIteration {
    pub depth: usize,
    pub draws: usize,
    /// First global draw id assigned to this iteration.
    pub draw_offset: usize,
}

impl HoldoutIteration {
    pub fn draw_range(&self) -> std::ops::Range<usize> {
        self.draw_offset..self.draw_offset + self.draws
    }
}

/// Split `n_draws` across `holdouts + 1` iterations, depth ascending.
///
/// Every iteration gets `floor(n_draws / (holdouts + 1))` draws and the last
/// one also absorbs the remainder.
pub fn plan_holdouts(holdouts: usize, n_draws: usize) -> Result<Vec<HoldoutIteration>, PipelineError> {
    if n_draws == 0 {
        return Err(PipelineError::Config("draw count must be > 0".to_string()));
    }
    let iterations = holdouts + 1;
    let base = n_draws / iterations;

    let mut plan = Vec::with_capacity(iterations);
    let mut offset = 0;
    for depth in 0..iterations {
        let mut draws = base;
        if depth == iterations - 1 {
            draws += n_draws - base * iterations;
        }
        plan.push(HoldoutIteration {
            depth,
            draws,
            draw_offset: offset,
        });
        offset += draws;
    }

    check_budget(&plan, n_draws)?;
    Ok(plan)
}

/// Verify the planned quotas sum to the requested total.
pub fn check_budget(plan: &[HoldoutIteration], n_draws: usize) -> Result<(), PipelineError> {
    let allocated: usize = plan.iter().map(|it| it.draws).sum();
    if allocated != n_draws {
        return Err(PipelineError::DrawBudgetMismatch {
            allocated,
            requested: n_draws,
        });
    }
    Ok(())
}

/// Blank the last `depth` present values of a column, leaving earlier ones.
pub fn blank_tail(values: &mut [Option<f64>], depth: usize) {
    if depth == 0 {
        return;
    }
    let mut remaining = depth;
    for v in values.iter_mut().rev() {
        if remaining == 0 {
            break;
        }
        if v.is_some() {
            *v = None;
            remaining -= 1;
        }
    }
}

/// Copy of `series` with each indicator's last `depth` observations blanked
/// independently, and rows with no remaining indicator dropped.
pub fn apply_holdout(series: &LocationSeries, depth: usize) -> LocationSeries {
    let mut out = series.clone();
    for indicator in Indicator::ALL {
        let mut column: Vec<Option<f64>> = out.rows.iter().map(|r| r.indicator(indicator)).collect();
        blank_tail(&mut column, depth);
        for (row, value) in out.rows.iter_mut().zip(column) {
            *row.indicator_mut(indicator) = value;
        }
    }
    out.rows.retain(|r| r.has_any_indicator());
    out.doy_holdout = Some(depth);
    out
}
