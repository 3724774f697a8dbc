//! Linear hinge-spline basis over a day index.
//!
//! A row for day `t` with knots `k_1 < ... < k_m` is:
//!
//! `[1, t, (t - k_1)_+, ..., (t - k_m)_+]`
//!
//! so the fitted curve is continuous and piecewise linear with a slope change
//! at each knot. Past the last knot the curve continues on its final slope,
//! which is what the smoother relies on when it extends a holdout fit.

/// Place up to `max_knots` interior knots at evenly spaced quantiles of `t`.
///
/// Knots closer together than `min_spacing` are merged.
pub fn quantile_knots(t: &[f64], max_knots: usize, min_spacing: f64) -> Vec<f64> {
    if t.len() < 2 || max_knots == 0 {
        return Vec::new();
    }
    let mut sorted = t.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let lo = sorted[0];
    let hi = sorted[sorted.len() - 1];

    let mut knots: Vec<f64> = Vec::with_capacity(max_knots);
    for i in 1..=max_knots {
        let q = i as f64 / (max_knots as f64 + 1.0);
        let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
        let k = sorted[idx];
        if k <= lo || k >= hi {
            continue;
        }
        if knots.last().is_none_or(|&prev| k - prev >= min_spacing) {
            knots.push(k);
        }
    }
    knots
}

/// Fill a design row for day `t`.
///
/// # Panics
/// Panics if `out.len() != knots.len() + 2`.
pub fn fill_hinge_row(t: f64, knots: &[f64], out: &mut [f64]) {
    out[0] = 1.0;
    out[1] = t;
    for (j, &k) in knots.iter().enumerate() {
        out[j + 2] = (t - k).max(0.0);
    }
}

pub fn hinge_row(t: f64, knots: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; knots.len() + 2];
    fill_hinge_row(t, knots, &mut out);
    out
}

/// Evaluate the spline with coefficients `beta` at day `t`.
pub fn eval_hinge(t: f64, knots: &[f64], beta: &[f64]) -> f64 {
    let mut y = beta[0] + beta[1] * t;
    for (j, &k) in knots.iter().enumerate() {
        y += beta[j + 2] * (t - k).max(0.0);
    }
    y
}
