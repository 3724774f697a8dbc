//! One holdout iteration: truncate, predict, combine, synthesize.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::domain::{DrawTable, FirstStageKind, LocationSeries, ModelRow};
use crate::ensemble::holdout::{HoldoutIteration, apply_holdout};
use crate::ensemble::{EnsembleContext, iteration_seed};
use crate::error::PipelineError;
use crate::models::{Prediction, SynthesisRequest, SynthesizedDraws};

/// Output of a single iteration. Draw ids are still local (`0..draws`).
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub depth: usize,
    pub model_data: LocationSeries,
    pub draws: SynthesizedDraws,
}

/// Outer-merge first-stage predictions into the fixed model-data schema.
///
/// Prediction dates missing from `series` get a row of their own with every
/// other column empty.
pub fn merge_predictions(series: &LocationSeries, predictions: &[(FirstStageKind, Prediction)]) -> LocationSeries {
    let mut rows: BTreeMap<NaiveDate, ModelRow> = series.rows.iter().map(|r| (r.date, r.clone())).collect();
    for (kind, prediction) in predictions {
        for (&date, &value) in prediction {
            let row = rows.entry(date).or_insert_with(|| ModelRow::empty(date));
            *row.prediction_mut(*kind) = Some(value);
        }
    }
    LocationSeries {
        rows: rows.into_values().collect(),
        ..series.clone()
    }
}

fn check_draw_shape(
    series: &LocationSeries,
    depth: usize,
    expected: usize,
    label: &str,
    table: &DrawTable,
) -> Result<(), PipelineError> {
    let location_id = series.location_id;
    if !table.has_contiguous_ids(expected) {
        return Err(PipelineError::synthesis(
            location_id,
            depth,
            format!("{label} draws have {} columns, expected draw_0..draw_{}", table.n_draws(), expected.saturating_sub(1)),
        ));
    }
    if let Some(row) = table.rows().iter().find(|r| r.location_id != location_id) {
        return Err(PipelineError::synthesis(
            location_id,
            depth,
            format!("{label} draws contain a row for location {}", row.location_id),
        ));
    }
    if let Some(row) = table.rows().iter().find(|r| r.population.is_none()) {
        return Err(PipelineError::synthesis(
            location_id,
            depth,
            format!("{label} draws have no population on {}", row.date),
        ));
    }
    Ok(())
}

/// Run one iteration end to end for a single location.
pub fn run_iteration(
    ctx: &EnsembleContext<'_>,
    series: &LocationSeries,
    iteration: HoldoutIteration,
    location_seed: u64,
) -> Result<IterationResult, PipelineError> {
    let location_id = series.location_id;
    let depth = iteration.depth;
    debug!(%location_id, depth, draws = iteration.draws, "Running holdout iteration.");

    let truncated = apply_holdout(series, depth);

    let mut predictions = Vec::new();
    for kind in FirstStageKind::ALL {
        if ctx.settings.skips(location_id, kind) {
            continue;
        }
        let stage = ctx.settings.first_stage(kind);
        if truncated.observed_count(stage.spline_var) == 0 {
            warn!(
                %location_id,
                depth,
                model = kind.label(),
                "Holdout blanked every `{}` observation; {} predictions will be empty.",
                stage.spline_var,
                kind.label()
            );
        }
        let prediction = ctx.predictor.predict(&truncated, stage).map_err(|e| {
            if e.is_location_scoped() {
                e
            } else {
                PipelineError::synthesis(location_id, depth, format!("{} first stage: {e}", kind.label()))
            }
        })?;
        predictions.push((kind, prediction));
    }

    let mut model_data = merge_predictions(&truncated, &predictions);
    model_data.doy_holdout = Some(depth);

    let draws = if iteration.draws == 0 {
        SynthesizedDraws {
            noisy: DrawTable::with_draws(0),
            smooth: DrawTable::with_draws(0),
        }
    } else {
        let draws = ctx
            .synthesizer
            .synthesize(&SynthesisRequest {
                series: &model_data,
                holdout_depth: depth,
                draw_count: iteration.draws,
                seed: iteration_seed(location_seed, depth),
                settings: &ctx.settings.smoother,
            })
            .map_err(|e| {
                if e.is_location_scoped() {
                    e
                } else {
                    PipelineError::synthesis(location_id, depth, e.to_string())
                }
            })?;
        check_draw_shape(&model_data, depth, iteration.draws, "noisy", &draws.noisy)?;
        check_draw_shape(&model_data, depth, iteration.draws, "smooth", &draws.smooth)?;
        draws
    };

    Ok(IterationResult {
        depth,
        model_data,
        draws,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DrawRow, LocationId, ModelSettings};
    use crate::models::{FirstStagePredictor, SeriesSynthesizer};
    use chrono::Duration;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Predicts half the spline indicator and records how often it was called.
    struct HalfPredictor {
        calls: Mutex<Vec<FirstStageKind>>,
    }

    impl FirstStagePredictor for HalfPredictor {
        fn predict(
            &self,
            series: &LocationSeries,
            settings: &crate::domain::FirstStageSettings,
        ) -> Result<Prediction, PipelineError> {
            self.calls.lock().unwrap().push(settings.model_type);
            Ok(series
                .rows
                .iter()
                .filter_map(|r| r.indicator(settings.spline_var).map(|v| (r.date, v / 2.0)))
                .collect())
        }
    }

    /// Echoes the series dates with a constant value and a wrong column count
    /// when asked for a sentinel draw count.
    struct EchoSynthesizer;

    impl SeriesSynthesizer for EchoSynthesizer {
        fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<SynthesizedDraws, PipelineError> {
            let width = if request.draw_count == 13 { 12 } else { request.draw_count };
            let mut table = DrawTable::with_draws(width);
            for r in &request.series.rows {
                table
                    .push(DrawRow {
                        location_id: request.series.location_id,
                        date: r.date,
                        population: Some(request.series.population),
                        values: vec![Some(1.0); width],
                    })
                    .unwrap();
            }
            Ok(SynthesizedDraws {
                noisy: table.clone(),
                smooth: table,
            })
        }
    }

    fn series() -> LocationSeries {
        let start = NaiveDate::from_ymd_opt(2020, 4, 1).unwrap();
        let rows = (0..10)
            .map(|i| {
                let mut r = ModelRow::empty(start + Duration::days(i));
                r.death_rate = Some(0.1);
                r.confirmed_case_rate = Some(1.0);
                if i < 5 {
                    r.hospitalization_rate = Some(0.4);
                }
                r
            })
            .collect();
        LocationSeries {
            location_id: LocationId(4),
            location_name: "Four".to_string(),
            population: 100.0,
            doy_holdout: None,
            rows,
        }
    }

    #[test]
    fn skipped_first_stage_leaves_column_empty() {
        let mut settings = ModelSettings::new(PathBuf::from("r"), 1, 4, 0);
        settings.no_hosp_locs.insert(LocationId(4));
        let predictor = HalfPredictor {
            calls: Mutex::new(Vec::new()),
        };
        let ctx = EnsembleContext {
            settings: &settings,
            predictor: &predictor,
            synthesizer: &EchoSynthesizer,
        };
        let it = HoldoutIteration {
            depth: 2,
            draws: 2,
            draw_offset: 2,
        };

        let out = run_iteration(&ctx, &series(), it, 0).unwrap();
        assert_eq!(*predictor.calls.lock().unwrap(), vec![FirstStageKind::Cfr]);
        assert_eq!(out.model_data.doy_holdout, Some(2));
        assert_eq!(out.model_data.rows.len(), 8);
        assert!(out.model_data.rows.iter().all(|r| r.predicted_death_rate_hfr.is_none()));
        assert!(out.model_data.rows.iter().all(|r| r.predicted_death_rate_cfr == Some(0.5)));
        assert!(out.draws.smooth.has_contiguous_ids(2));
    }

    #[test]
    fn malformed_synthesis_output_is_a_location_failure() {
        let settings = ModelSettings::new(PathBuf::from("r"), 0, 13, 0);
        let predictor = HalfPredictor {
            calls: Mutex::new(Vec::new()),
        };
        let ctx = EnsembleContext {
            settings: &settings,
            predictor: &predictor,
            synthesizer: &EchoSynthesizer,
        };
        let it = HoldoutIteration {
            depth: 0,
            draws: 13,
            draw_offset: 0,
        };
        let err = run_iteration(&ctx, &series(), it, 0).unwrap_err();
        assert!(err.is_location_scoped());
    }

    #[test]
    fn merge_adds_rows_for_prediction_only_dates() {
        let s = series();
        let extra = s.last_date().unwrap() + Duration::days(1);
        let mut pred = Prediction::new();
        pred.insert(extra, 0.3);
        let merged = merge_predictions(&s, &[(FirstStageKind::Hfr, pred)]);
        assert_eq!(merged.rows.len(), 11);
        let last = merged.rows.last().unwrap();
        assert_eq!(last.date, extra);
        assert_eq!(last.predicted_death_rate_hfr, Some(0.3));
        assert_eq!(last.death_rate, None);
    }
}
