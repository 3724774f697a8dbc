//! Per-location result bundle exchanged between workers and the compile phase.

use serde::{Deserialize, Serialize};

use crate::domain::{DrawTable, LocationId, LocationSeries};

/// `(model_data, noisy_draws, smooth_draws)` for one location.
///
/// Draw tables hold absolute counts (already rescaled by population) with
/// exactly `n_draws` columns. Written once by the owning worker, read once by
/// the compile phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDataBundle {
    pub location_id: LocationId,
    pub model_data: LocationSeries,
    pub noisy_draws: DrawTable,
    pub smooth_draws: DrawTable,
}
