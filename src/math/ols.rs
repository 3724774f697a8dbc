//! Weighted least squares solver.
//!
//! Both reference models solve small regression problems of the form:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! Rows are scaled by `sqrt(w_i)` and the resulting ordinary least squares
//! problem is solved with SVD, which copes with tall design matrices and with
//! nearly collinear hinge columns when knots sit close together.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Weighted fit: scales each design row and target by `sqrt(w_i)`.
pub fn solve_weighted_least_squares(rows: &[Vec<f64>], y: &[f64], w: &[f64]) -> Option<DVector<f64>> {
    let n = rows.len();
    if n == 0 || y.len() != n || w.len() != n {
        return None;
    }
    let p = rows[0].len();
    let mut x = DMatrix::<f64>::zeros(n, p);
    let mut yv = DVector::<f64>::zeros(n);
    for i in 0..n {
        let sw = w[i].max(0.0).sqrt();
        for j in 0..p {
            x[(i, j)] = rows[i][j] * sw;
        }
        yv[i] = y[i] * sw;
    }
    solve_least_squares(&x, &yv)
}
