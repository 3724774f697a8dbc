//! Reference first-stage model: log-log ratio regression.
//!
//! `ln(death rate) = β0 + β1 ln(spline var) + Σ βj ln(indep var j)`
//!
//! fitted by OLS over dates where every term is positive, then evaluated on
//! every date where the regressors are positive.

use tracing::debug;

use crate::domain::{FirstStageSettings, Indicator, LocationSeries, ModelRow};
use crate::error::PipelineError;
use crate::math::solve_weighted_least_squares;
use crate::models::{FirstStagePredictor, Prediction};

#[derive(Debug, Clone)]
pub struct RatioRegression {
    /// Minimum usable dates before a fit is attempted.
    pub min_points: usize,
}

impl Default for RatioRegression {
    fn default() -> Self {
        Self { min_points: 3 }
    }
}

fn log_regressors(row: &ModelRow, regressors: &[Indicator]) -> Option<Vec<f64>> {
    let mut x = Vec::with_capacity(regressors.len() + 1);
    x.push(1.0);
    for &ind in regressors {
        let v = row.indicator(ind).filter(|v| *v > 0.0)?;
        x.push(v.ln());
    }
    Some(x)
}

impl FirstStagePredictor for RatioRegression {
    fn predict(&self, series: &LocationSeries, settings: &FirstStageSettings) -> Result<Prediction, PipelineError> {
        let mut regressors = vec![settings.spline_var];
        regressors.extend(settings.indep_vars.iter().copied());

        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for row in &series.rows {
            let Some(dep) = row.indicator(settings.dep_var).filter(|v| *v > 0.0) else {
                continue;
            };
            if let Some(x) = log_regressors(row, &regressors) {
                xs.push(x);
                ys.push(dep.ln());
            }
        }

        let needed = self.min_points.max(regressors.len() + 2);
        if xs.len() < needed {
            debug!(
                location_id = %series.location_id,
                model = settings.model_type.label(),
                usable = xs.len(),
                "Too few usable dates for first-stage fit; no predictions."
            );
            return Ok(Prediction::new());
        }

        let weights = vec![1.0; xs.len()];
        let Some(beta) = solve_weighted_least_squares(&xs, &ys, &weights) else {
            debug!(
                location_id = %series.location_id,
                model = settings.model_type.label(),
                "First-stage design is ill-conditioned; no predictions."
            );
            return Ok(Prediction::new());
        };

        let mut out = Prediction::new();
        for row in &series.rows {
            if let Some(x) = log_regressors(row, &regressors) {
                let eta: f64 = x.iter().zip(beta.iter()).map(|(a, b)| a * b).sum();
                let rate = eta.exp();
                if rate.is_finite() {
                    out.insert(row.date, rate);
                }
            }
        }
        Ok(out)
    }
}
