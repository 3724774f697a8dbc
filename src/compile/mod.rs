//! Cross-location reduction over every per-location result.
//!
//! Runs once all location workers have finished:
//!
//! - stack bundles and find failed locations (`collect`)
//! - reject interior gaps, drop trailing incomplete rows (`continuity`)
//! - sum rates and draws up the hierarchy (`aggregate`)
//! - per-draw daily deaths on infection dates (`infections`)

pub mod aggregate;
pub mod collect;
pub mod continuity;
pub mod infections;

pub use aggregate::*;
pub use collect::*;
pub use continuity::*;
pub use infections::*;
