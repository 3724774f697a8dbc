//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - CSV/JSON exports (`export`)
//! - output directory layout (`layout`)
//! - per-location result bundles (`store`)

pub mod export;
pub mod ingest;
pub mod layout;
pub mod store;

pub use export::*;
pub use ingest::*;
pub use layout::*;
pub use store::*;
