//! Input preparation before the per-location workers run.
//!
//! 1. Drop the last `holdout_days` dates of every series.
//! 2. Add pre-model aggregates for internal hierarchy nodes.
//! 3. Classify locations against the epidemic thresholds: too few deaths
//!    drops the location, too few cases (hospitalizations) skips the CFR
//!    (HFR) first stage.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::compile::{MissingConstituents, aggregate_inputs};
use crate::domain::{Hierarchy, Indicator, LocationId, LocationSeries};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub deaths: f64,
    pub epi: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PreparedInputs {
    /// Locations to model, ordered by id.
    pub series: Vec<LocationSeries>,
    pub input_aggregates: Vec<LocationId>,
    pub dropped_locations: Vec<LocationId>,
    pub no_cases_locs: BTreeSet<LocationId>,
    pub no_hosp_locs: BTreeSet<LocationId>,
    pub aggregate_missing_constituents: MissingConstituents,
}

/// Drop the last `days` dates of a series.
pub fn truncate_tail(series: &mut LocationSeries, days: usize) {
    let keep = series.rows.len().saturating_sub(days);
    series.rows.truncate(keep);
}

/// Peak of a cumulative rate channel, in counts.
pub fn cumulative_count(series: &LocationSeries, indicator: Indicator) -> Option<f64> {
    series.max_observed(indicator).map(|rate| rate * series.population)
}

fn below(series: &LocationSeries, indicator: Indicator, threshold: f64) -> bool {
    cumulative_count(series, indicator).is_none_or(|count| count < threshold)
}

pub fn prepare_inputs(
    mut series: Vec<LocationSeries>,
    hierarchy: &Hierarchy,
    holdout_days: usize,
    thresholds: Thresholds,
) -> Result<PreparedInputs, PipelineError> {
    if holdout_days > 0 {
        for s in &mut series {
            s.sort_rows();
            truncate_tail(s, holdout_days);
        }
        debug!(holdout_days, "Truncated input tails.");
    }

    let (aggregates, aggregate_missing_constituents) = aggregate_inputs(&series, hierarchy)?;
    let input_aggregates: Vec<LocationId> = aggregates.iter().map(|s| s.location_id).collect();
    series.extend(aggregates);
    series.sort_by_key(|s| s.location_id);

    let mut prepared = PreparedInputs {
        input_aggregates,
        aggregate_missing_constituents,
        ..PreparedInputs::default()
    };
    for s in series {
        if s.rows.is_empty() || below(&s, Indicator::DeathRate, thresholds.deaths) {
            prepared.dropped_locations.push(s.location_id);
            continue;
        }
        if below(&s, Indicator::ConfirmedCaseRate, thresholds.epi) {
            prepared.no_cases_locs.insert(s.location_id);
        }
        if below(&s, Indicator::HospitalizationRate, thresholds.epi) {
            prepared.no_hosp_locs.insert(s.location_id);
        }
        prepared.series.push(s);
    }

    info!(
        locations = prepared.series.len(),
        aggregates = prepared.input_aggregates.len(),
        dropped = prepared.dropped_locations.len(),
        no_cases = prepared.no_cases_locs.len(),
        no_hosp = prepared.no_hosp_locs.len(),
        "Prepared model inputs."
    );
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, ModelRow};
    use chrono::{Duration, NaiveDate};

    fn series(id: i64, population: f64, deaths: f64, cases: Option<f64>, hosp: Option<f64>) -> LocationSeries {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let rows = (0..10)
            .map(|i| {
                let scale = (i + 1) as f64 / 10.0;
                let mut r = ModelRow::empty(start + Duration::days(i));
                r.death_rate = Some(deaths * scale);
                r.confirmed_case_rate = cases.map(|c| c * scale);
                r.hospitalization_rate = hosp.map(|h| h * scale);
                r
            })
            .collect();
        LocationSeries {
            location_id: LocationId(id),
            location_name: format!("L{id}"),
            population,
            doy_holdout: None,
            rows,
        }
    }

    fn hierarchy() -> Hierarchy {
        let loc = |id: i64, parent: i64| Location {
            id: LocationId(id),
            parent_id: LocationId(parent),
            name: format!("N{id}"),
            population: None,
        };
        Hierarchy::from_locations(vec![loc(1, 1), loc(20, 1), loc(21, 20), loc(22, 20)]).unwrap()
    }

    #[test]
    fn thresholds_drop_and_flag() {
        let inputs = vec![
            // 0.001 * 1000 = 1 death: dropped.
            series(21, 1000.0, 0.001, Some(0.5), Some(0.1)),
            // 10 deaths, 5 hospitalizations: no HFR.
            series(22, 1000.0, 0.01, Some(0.5), Some(0.005)),
        ];
        let th = Thresholds { deaths: 5.0, epi: 10.0 };
        let prepared = prepare_inputs(inputs, &hierarchy(), 0, th).unwrap();

        assert_eq!(prepared.input_aggregates, vec![LocationId(20)]);
        assert_eq!(prepared.dropped_locations, vec![LocationId(21)]);
        let ids: Vec<LocationId> = prepared.series.iter().map(|s| s.location_id).collect();
        assert_eq!(ids, vec![LocationId(20), LocationId(22)]);
        assert!(prepared.no_hosp_locs.contains(&LocationId(22)));
        assert!(!prepared.no_cases_locs.contains(&LocationId(22)));
    }

    #[test]
    fn missing_channel_is_below_threshold() {
        let s = series(21, 1000.0, 0.1, None, Some(1.0));
        assert!(below(&s, Indicator::ConfirmedCaseRate, 10.0));
        assert!(!below(&s, Indicator::HospitalizationRate, 10.0));
    }

    #[test]
    fn holdout_days_drop_last_dates() {
        let prepared = prepare_inputs(
            vec![series(21, 1000.0, 0.1, Some(1.0), Some(1.0))],
            &hierarchy(),
            3,
            Thresholds { deaths: 0.0, epi: 0.0 },
        )
        .unwrap();
        let s = prepared.series.iter().find(|s| s.location_id == LocationId(21)).unwrap();
        assert_eq!(s.rows.len(), 7);
        // The aggregate is built from the truncated series.
        let agg = prepared.series.iter().find(|s| s.location_id == LocationId(20)).unwrap();
        assert_eq!(agg.rows.len(), 7);
    }
}
