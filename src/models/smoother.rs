//! Reference series synthesizer: log-space hinge spline plus seeded draws.
//!
//! 1. Build training points from the observed variable, falling back to the
//!    mean of the available first-stage predictions (down-weighted).
//! 2. Fit `ln(rate)` on a hinge basis over day index (weighted OLS).
//! 3. Draw `draw_count` replicates. Smooth draws perturb the curve level and
//!    slope (the slope term counts double past the last training point) and
//!    are forced non-decreasing; noisy draws add per-date log-normal noise on
//!    top of the smooth draw.
//!
//! The output grid is every input date where the observed or a spline variable
//! is present, extended `holdout_depth` days past the last input date.

use chrono::{Duration, NaiveDate};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{DrawRow, DrawTable, LocationSeries, ModelRow, SmootherSettings};
use crate::error::PipelineError;
use crate::math::{eval_hinge, hinge_row, quantile_knots};
use crate::models::{SeriesSynthesizer, SynthesisRequest, SynthesizedDraws};

/// Floor on the residual scale so draws never collapse onto one curve.
const MIN_SIGMA: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct SplineSmoother {
    pub max_knots: usize,
    /// Minimum distance between knots, in days.
    pub min_knot_spacing: f64,
    pub min_points: usize,
    /// Weight of a prediction-only training point relative to an observation.
    pub predicted_weight: f64,
}

impl Default for SplineSmoother {
    fn default() -> Self {
        Self {
            max_knots: 6,
            min_knot_spacing: 7.0,
            min_points: 3,
            predicted_weight: 0.5,
        }
    }
}

struct TrainingPoint {
    t: f64,
    log_y: f64,
    weight: f64,
}

impl SplineSmoother {
    fn training_value(&self, row: &ModelRow, settings: &SmootherSettings) -> Option<(f64, f64)> {
        if let Some(obs) = row.indicator(settings.obs_var).filter(|v| *v > 0.0) {
            return Some((obs, 1.0));
        }
        let preds: Vec<f64> = settings
            .pred_vars
            .iter()
            .filter_map(|&k| row.prediction(k))
            .filter(|v| *v > 0.0)
            .collect();
        if preds.is_empty() {
            return None;
        }
        Some((preds.iter().sum::<f64>() / preds.len() as f64, self.predicted_weight))
    }

    fn output_grid(series: &LocationSeries, settings: &SmootherSettings, holdout_depth: usize) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = series
            .rows
            .iter()
            .filter(|r| {
                r.indicator(settings.obs_var).is_some()
                    || settings.spline_vars.iter().any(|&v| r.indicator(v).is_some())
                    || settings.pred_vars.iter().any(|&k| r.prediction(k).is_some())
            })
            .map(|r| r.date)
            .collect();
        if let Some(last) = series.last_date() {
            for d in 1..=holdout_depth {
                dates.push(last + Duration::days(d as i64));
            }
        }
        dates
    }
}

impl SeriesSynthesizer for SplineSmoother {
    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<SynthesizedDraws, PipelineError> {
        let series = request.series;
        let location_id = series.location_id;
        let depth = request.holdout_depth;
        let fail = |msg: &str| PipelineError::synthesis(location_id, depth, msg);

        if request.draw_count == 0 {
            return Err(fail("draw count must be > 0"));
        }
        let Some(start) = series.first_date() else {
            return Err(fail("series has no rows"));
        };
        let day_index = |d: NaiveDate| (d - start).num_days() as f64;

        let points: Vec<TrainingPoint> = series
            .rows
            .iter()
            .filter_map(|r| {
                self.training_value(r, request.settings).map(|(y, weight)| TrainingPoint {
                    t: day_index(r.date),
                    log_y: y.ln(),
                    weight,
                })
            })
            .collect();
        if points.len() < self.min_points {
            return Err(fail(&format!(
                "only {} usable points (need {})",
                points.len(),
                self.min_points
            )));
        }

        let ts: Vec<f64> = points.iter().map(|p| p.t).collect();
        let knots = quantile_knots(&ts, self.max_knots.min(points.len() / 4), self.min_knot_spacing);
        let design: Vec<Vec<f64>> = ts.iter().map(|&t| hinge_row(t, &knots)).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.log_y).collect();
        let ws: Vec<f64> = points.iter().map(|p| p.weight).collect();
        let beta = crate::math::solve_weighted_least_squares(&design, &ys, &ws)
            .ok_or_else(|| fail("spline fit is ill-conditioned"))?;
        let beta: Vec<f64> = beta.iter().copied().collect();

        let (sse, wsum) = points.iter().fold((0.0, 0.0), |(sse, wsum), p| {
            let r = p.log_y - eval_hinge(p.t, &knots, &beta);
            (sse + p.weight * r * r, wsum + p.weight)
        });
        let sigma = (sse / wsum).sqrt().max(MIN_SIGMA);
        let n_eff = (points.len() as f64).sqrt();
        let t_last_point = ts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = t_last_point.max(1.0);

        let mut rng = StdRng::seed_from_u64(request.seed);
        let normal = Normal::new(0.0, 1.0).map_err(|e| fail(&format!("noise distribution error: {e}")))?;

        let n = request.draw_count;
        let level: Vec<f64> = (0..n).map(|_| normal.sample(&mut rng) * sigma / n_eff).collect();
        let slope: Vec<f64> = (0..n).map(|_| normal.sample(&mut rng) * sigma / (span * n_eff)).collect();

        let mut noisy = DrawTable::with_draws(n);
        let mut smooth = DrawTable::with_draws(n);
        let mut running = vec![0.0_f64; n];

        for date in Self::output_grid(series, request.settings, depth) {
            let t = day_index(date);
            let fit = eval_hinge(t, &knots, &beta);
            let beyond = (t - t_last_point).max(0.0);

            let mut smooth_values = Vec::with_capacity(n);
            let mut noisy_values = Vec::with_capacity(n);
            for d in 0..n {
                let v = (fit + level[d] + slope[d] * (t + beyond)).exp();
                running[d] = running[d].max(v);
                smooth_values.push(Some(running[d]));
                let z: f64 = normal.sample(&mut rng);
                noisy_values.push(Some(running[d] * (sigma * z).exp()));
            }

            smooth
                .push(DrawRow {
                    location_id,
                    date,
                    population: Some(series.population),
                    values: smooth_values,
                })
                .map_err(|e| fail(&e))?;
            noisy
                .push(DrawRow {
                    location_id,
                    date,
                    population: Some(series.population),
                    values: noisy_values,
                })
                .map_err(|e| fail(&e))?;
        }

        Ok(SynthesizedDraws { noisy, smooth })
    }
}
