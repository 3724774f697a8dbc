//! Hierarchical aggregation of rates and draws.
//!
//! Both invocations share one contract: rates are combined as
//! `sum(rate * population) / sum(population)` and count draws are summed
//! pointwise per draw id. A date produces an aggregate value only when every
//! constituent with data has a value on that date. An aggregate none of
//! whose constituents have data is skipped and reported as missing them all.
//!
//! - pre-model: raw indicators, aggregate keeps its source id
//! - post-model: model data and smooth count draws, aggregate id is negated
//!   and the name gets `AGGREGATE_NAME_SUFFIX`

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::domain::{
    AGGREGATE_NAME_SUFFIX, AggregateSpec, DrawRow, DrawTable, FirstStageKind, GLOBAL_LOCATION_ID, Hierarchy,
    Indicator, LocationId, LocationSeries, ModelRow,
};
use crate::error::PipelineError;

/// How aggregate locations are identified in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateIds {
    Source,
    Negated,
}

impl AggregateIds {
    fn id_for(self, spec: &AggregateSpec) -> LocationId {
        match self {
            AggregateIds::Source => spec.id,
            AggregateIds::Negated => spec.id.aggregate(),
        }
    }

    fn name_for(self, spec: &AggregateSpec) -> String {
        match self {
            AggregateIds::Source => spec.name.clone(),
            AggregateIds::Negated => format!("{}{AGGREGATE_NAME_SUFFIX}", spec.name),
        }
    }
}

/// Constituents (by aggregate id) that had no data and were left out.
pub type MissingConstituents = BTreeMap<LocationId, Vec<LocationId>>;

/// Aggregate locations produced from the modeled locations.
#[derive(Debug, Clone, Default)]
pub struct AggregateBundle {
    pub model_data: Vec<LocationSeries>,
    /// Summed count draws, keyed by aggregate id.
    pub draws: DrawTable,
    pub missing_constituents: MissingConstituents,
}

struct Resolved {
    present: Vec<LocationId>,
    missing: Vec<LocationId>,
}

fn resolve(
    spec: &AggregateSpec,
    hierarchy: &Hierarchy,
    has_data: impl Fn(LocationId) -> bool,
) -> Result<Resolved, PipelineError> {
    let shape = |message: String| PipelineError::AggregationShape {
        aggregate_id: spec.id,
        message,
    };
    if spec.id != GLOBAL_LOCATION_ID && !hierarchy.contains(spec.id) {
        return Err(shape("aggregate is not in the hierarchy".to_string()));
    }
    if spec.constituents.is_empty() {
        return Err(shape("aggregate has no constituent locations".to_string()));
    }
    if let Some(unknown) = spec.constituents.iter().find(|id| !hierarchy.contains(**id)) {
        return Err(shape(format!("constituent {unknown} is not in the hierarchy")));
    }

    let (present, missing): (Vec<LocationId>, Vec<LocationId>) =
        spec.constituents.iter().copied().partition(|id| has_data(*id));
    if present.is_empty() {
        warn!(aggregate_id = %spec.id, "No constituent has data; skipping aggregate.");
    } else if !missing.is_empty() {
        warn!(
            aggregate_id = %spec.id,
            missing = missing.len(),
            present = present.len(),
            "Aggregating without some constituents."
        );
    }
    Ok(Resolved { present, missing })
}

/// Population-weighted mean of one column across constituent rows, or `None`
/// when any constituent lacks a value.
fn weighted_rate(rows: &[(&ModelRow, f64)], total_population: f64, get: impl Fn(&ModelRow) -> Option<f64>) -> Option<f64> {
    let mut sum = 0.0;
    for (row, population) in rows {
        sum += get(row)? * population;
    }
    Some(sum / total_population)
}

fn aggregate_one_series(
    id: LocationId,
    name: String,
    constituents: &[&LocationSeries],
) -> LocationSeries {
    let total_population: f64 = constituents.iter().map(|s| s.population).sum();

    let mut by_date: BTreeMap<NaiveDate, Vec<(&ModelRow, f64)>> = BTreeMap::new();
    for s in constituents {
        for row in &s.rows {
            by_date.entry(row.date).or_default().push((row, s.population));
        }
    }

    let rows = by_date
        .into_iter()
        .filter(|(_, rows)| rows.len() == constituents.len())
        .filter_map(|(date, rows)| {
            let mut out = ModelRow::empty(date);
            for indicator in Indicator::ALL {
                *out.indicator_mut(indicator) = weighted_rate(&rows, total_population, |r| r.indicator(indicator));
            }
            for kind in FirstStageKind::ALL {
                *out.prediction_mut(kind) = weighted_rate(&rows, total_population, |r| r.prediction(kind));
            }
            let any = out.has_any_indicator() || FirstStageKind::ALL.iter().any(|&k| out.prediction(k).is_some());
            any.then_some(out)
        })
        .collect();

    LocationSeries {
        location_id: id,
        location_name: name,
        population: total_population,
        doy_holdout: None,
        rows,
    }
}

/// Aggregate rate series for each spec.
pub fn aggregate_series(
    series: &[LocationSeries],
    hierarchy: &Hierarchy,
    specs: &[AggregateSpec],
    ids: AggregateIds,
) -> Result<(Vec<LocationSeries>, MissingConstituents), PipelineError> {
    let by_id: BTreeMap<LocationId, &LocationSeries> = series.iter().map(|s| (s.location_id, s)).collect();
    let mut out = Vec::with_capacity(specs.len());
    let mut missing = MissingConstituents::new();

    for spec in specs {
        let resolved = resolve(spec, hierarchy, |id| by_id.contains_key(&id))?;
        if !resolved.missing.is_empty() {
            missing.insert(ids.id_for(spec), resolved.missing);
        }
        if resolved.present.is_empty() {
            continue;
        }
        let constituents: Vec<&LocationSeries> = resolved.present.iter().filter_map(|id| by_id.get(id).copied()).collect();
        let aggregate = aggregate_one_series(ids.id_for(spec), ids.name_for(spec), &constituents);
        debug!(
            aggregate_id = %aggregate.location_id,
            constituents = constituents.len(),
            rows = aggregate.rows.len(),
            "Aggregated series."
        );
        out.push(aggregate);
    }
    Ok((out, missing))
}

/// Sum count draws for each spec. Only complete constituent rows count, and
/// only dates on which every constituent with draws has a complete row.
pub fn aggregate_draws(
    draws: &DrawTable,
    hierarchy: &Hierarchy,
    specs: &[AggregateSpec],
    ids: AggregateIds,
) -> Result<(DrawTable, MissingConstituents), PipelineError> {
    let mut by_location: BTreeMap<LocationId, BTreeMap<NaiveDate, &DrawRow>> = BTreeMap::new();
    for row in draws.rows().iter().filter(|r| !r.has_missing()) {
        by_location.entry(row.location_id).or_default().insert(row.date, row);
    }

    let width = draws.n_draws();
    let mut out = DrawTable::new(draws.draw_ids().to_vec());
    let mut missing = MissingConstituents::new();

    for spec in specs {
        let resolved = resolve(spec, hierarchy, |id| by_location.contains_key(&id))?;
        let id = ids.id_for(spec);
        if !resolved.missing.is_empty() {
            missing.insert(id, resolved.missing);
        }
        let series: Vec<&BTreeMap<NaiveDate, &DrawRow>> =
            resolved.present.iter().filter_map(|c| by_location.get(c)).collect();

        let dates: BTreeSet<NaiveDate> = series.iter().flat_map(|s| s.keys().copied()).collect();
        for date in dates {
            let Some(rows) = series.iter().map(|s| s.get(&date)).collect::<Option<Vec<_>>>() else {
                continue;
            };
            let mut values = vec![0.0; width];
            for row in rows {
                for (acc, v) in values.iter_mut().zip(&row.values) {
                    *acc += v.unwrap_or_default();
                }
            }
            out.push(DrawRow {
                location_id: id,
                date,
                population: None,
                values: values.into_iter().map(Some).collect(),
            })
            .map_err(|message| PipelineError::AggregationShape { aggregate_id: spec.id, message })?;
        }
    }

    out.sort_rows();
    Ok((out, missing))
}

/// Pre-model aggregates for internal nodes not already in the input.
pub fn aggregate_inputs(
    series: &[LocationSeries],
    hierarchy: &Hierarchy,
) -> Result<(Vec<LocationSeries>, MissingConstituents), PipelineError> {
    let present: BTreeSet<LocationId> = series.iter().map(|s| s.location_id).collect();
    let specs: Vec<AggregateSpec> = hierarchy
        .aggregate_specs(false)
        .into_iter()
        .filter(|spec| !present.contains(&spec.id))
        .collect();
    aggregate_series(series, hierarchy, &specs, AggregateIds::Source)
}

/// Post-model aggregates (negated ids) over model data and smooth count draws.
///
/// Only locations with complete draws count as constituents, so an aggregate's
/// population matches the draws summed into it.
pub fn aggregate_results(
    model_data: &[LocationSeries],
    smooth_counts: &DrawTable,
    hierarchy: &Hierarchy,
) -> Result<AggregateBundle, PipelineError> {
    // One constituent set for rates, populations and draws: locations with
    // model data and at least one complete draw row.
    let with_draws: BTreeSet<LocationId> = smooth_counts
        .rows()
        .iter()
        .filter(|r| !r.has_missing())
        .map(|r| r.location_id)
        .collect();
    let drawn: Vec<LocationSeries> = model_data
        .iter()
        .filter(|s| with_draws.contains(&s.location_id))
        .cloned()
        .collect();
    let drawn_ids: BTreeSet<LocationId> = drawn.iter().map(|s| s.location_id).collect();
    let mut counts = smooth_counts.clone();
    counts.retain(|r| drawn_ids.contains(&r.location_id));

    let specs = hierarchy.aggregate_specs(true);
    let (series, mut missing) = aggregate_series(&drawn, hierarchy, &specs, AggregateIds::Negated)?;
    let (draws, draw_missing) = aggregate_draws(&counts, hierarchy, &specs, AggregateIds::Negated)?;
    for (id, ids) in draw_missing {
        let entry = missing.entry(id).or_default();
        entry.extend(ids);
        entry.sort();
        entry.dedup();
    }
    Ok(AggregateBundle {
        model_data: series,
        draws,
        missing_constituents: missing,
    })
}

/// Divide count draws by each location's population.
pub fn counts_to_rates(counts: &DrawTable, populations: &BTreeMap<LocationId, f64>) -> Result<DrawTable, PipelineError> {
    let mut rates = counts.clone();
    for row in rates.rows_mut() {
        let population = populations
            .get(&row.location_id)
            .copied()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| PipelineError::AggregationShape {
                aggregate_id: row.location_id,
                message: "no population to convert counts to rates".to_string(),
            })?;
        for v in row.values.iter_mut().flatten() {
            *v /= population;
        }
    }
    Ok(rates)
}

pub fn populations(series: &[LocationSeries]) -> BTreeMap<LocationId, f64> {
    series.iter().map(|s| (s.location_id, s.population)).collect()
}
