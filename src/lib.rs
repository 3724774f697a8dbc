//! `deaths-spline` library crate.
//!
//! The binary (`deaths`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the per-location worker and the compile stage can be driven separately
//!   (e.g. by an external scheduler)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod compile;
pub mod dispatch;
pub mod domain;
pub mod ensemble;
pub mod error;
pub mod io;
pub mod math;
pub mod models;
pub mod prep;
pub mod report;
