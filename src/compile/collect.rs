//! Gather per-location bundles into cross-location tables.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::domain::{DrawTable, Indicator, LocationId, LocationSeries, ModelDataBundle};
use crate::error::PipelineError;

/// `(location, date)` pairs with an observed death rate.
pub type ObservedKeys = BTreeSet<(LocationId, NaiveDate)>;

/// Every successfully modeled location, stacked.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub model_data: Vec<LocationSeries>,
    pub noisy_draws: DrawTable,
    pub smooth_draws: DrawTable,
}

impl Collected {
    pub fn location_ids(&self) -> BTreeSet<LocationId> {
        self.model_data.iter().map(|s| s.location_id).collect()
    }
}

/// Stack bundles (ordered by location) after checking each carries the full
/// `draw_0..draw_{n_draws-1}` layout.
pub fn collect_bundles(mut bundles: Vec<ModelDataBundle>, n_draws: usize) -> Result<Collected, PipelineError> {
    bundles.sort_by_key(|b| b.location_id);

    let mut model_data = Vec::with_capacity(bundles.len());
    let mut noisy = Vec::with_capacity(bundles.len());
    let mut smooth = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        for table in [&bundle.noisy_draws, &bundle.smooth_draws] {
            if !table.has_contiguous_ids(n_draws) {
                return Err(PipelineError::DrawBudgetMismatch {
                    allocated: table.n_draws(),
                    requested: n_draws,
                });
            }
        }
        model_data.push(bundle.model_data);
        noisy.push(bundle.noisy_draws);
        smooth.push(bundle.smooth_draws);
    }
    debug!(locations = model_data.len(), "Collected result bundles.");

    Ok(Collected {
        model_data,
        noisy_draws: stack(noisy, n_draws)?,
        smooth_draws: stack(smooth, n_draws)?,
    })
}

fn stack(tables: Vec<DrawTable>, n_draws: usize) -> Result<DrawTable, PipelineError> {
    if tables.is_empty() {
        return Ok(DrawTable::with_draws(n_draws));
    }
    DrawTable::concat(tables)
}

/// Locations that were submitted but produced no bundle.
pub fn failed_locations(expected: &[LocationId], collected: &Collected) -> Vec<LocationId> {
    let present = collected.location_ids();
    let failed: Vec<LocationId> = expected.iter().copied().filter(|id| !present.contains(id)).collect();
    if !failed.is_empty() {
        warn!(count = failed.len(), "Some locations have no model results.");
    }
    failed
}

/// Dates on which each location's death rate was observed.
pub fn observed_deaths(model_data: &[LocationSeries]) -> ObservedKeys {
    model_data
        .iter()
        .flat_map(|s| {
            s.rows
                .iter()
                .filter(|r| r.indicator(Indicator::DeathRate).is_some())
                .map(move |r| (s.location_id, r.date))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DrawRow, ModelRow};

    fn bundle(id: i64, n_draws: usize) -> ModelDataBundle {
        let date = NaiveDate::from_ymd_opt(2020, 7, 1).unwrap();
        let mut draws = DrawTable::with_draws(n_draws);
        draws
            .push(DrawRow {
                location_id: LocationId(id),
                date,
                population: None,
                values: vec![Some(1.0); n_draws],
            })
            .unwrap();
        let mut row = ModelRow::empty(date);
        row.death_rate = Some(0.1);
        ModelDataBundle {
            location_id: LocationId(id),
            model_data: LocationSeries {
                location_id: LocationId(id),
                location_name: format!("L{id}"),
                population: 1.0,
                doy_holdout: Some(0),
                rows: vec![row],
            },
            noisy_draws: draws.clone(),
            smooth_draws: draws,
        }
    }

    #[test]
    fn collects_and_reports_failures() {
        let collected = collect_bundles(vec![bundle(9, 3), bundle(2, 3)], 3).unwrap();
        assert_eq!(collected.model_data[0].location_id, LocationId(2));
        assert_eq!(collected.smooth_draws.len(), 2);
        assert_eq!(
            failed_locations(&[LocationId(2), LocationId(5), LocationId(9)], &collected),
            vec![LocationId(5)]
        );
        assert_eq!(observed_deaths(&collected.model_data).len(), 2);
    }

    #[test]
    fn wrong_width_bundle_is_rejected() {
        let err = collect_bundles(vec![bundle(1, 3), bundle(2, 4)], 3).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DrawBudgetMismatch {
                allocated: 4,
                requested: 3
            }
        ));
    }
}
