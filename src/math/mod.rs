//! Mathematical utilities: spline basis functions and weighted least squares.

pub mod basis;
pub mod ols;

pub use basis::*;
pub use ols::*;
