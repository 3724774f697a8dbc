//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - location ids, tracked indicators and first-stage model kinds (`types`)
//! - the fixed per-date model-data schema (`ModelRow`, `LocationSeries`)
//! - wide draw tables keyed by `(location, date)` (`draws`)
//! - the per-location result bundle (`bundle`)
//! - the location tree and aggregate declarations (`hierarchy`)
//! - run configuration (`config`)

pub mod bundle;
pub mod config;
pub mod draws;
pub mod hierarchy;
pub mod types;

pub use bundle::*;
pub use config::*;
pub use draws::*;
pub use hierarchy::*;
pub use types::*;
