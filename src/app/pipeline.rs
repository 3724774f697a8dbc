//! Shared pipeline stages used by the `run`, `model` and `compile` commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! ingest -> prepare -> per-location workers -> collect -> continuity ->
//! aggregates -> summaries -> infection draws
//!
//! Every stage communicates through the working directory, so `model` and
//! `compile` can pick up a run that `run` (or an external scheduler) started.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::compile::{
    InfectionDeriver, REPORTING_LAG_DAYS, aggregate_results, collect_bundles, counts_to_rates, enforce_continuity,
    failed_locations, observed_deaths, populations,
};
use crate::dispatch::{JobOutcome, LocalDispatcher, run_worker};
use crate::domain::{DrawTable, LocationId, LocationSeries, ModelSettings, RunConfig};
use crate::ensemble::EnsembleContext;
use crate::error::PipelineError;
use crate::io::{
    OutputLayout, ResultStore, load_draw_table, load_hierarchy, load_model_inputs, write_draws_csv, write_json_pretty,
    write_model_data_csv, write_summary_csv,
};
use crate::models::{RatioRegression, SplineSmoother};
use crate::prep::{Thresholds, prepare_inputs};
use crate::report::{RunMetadata, summarize_draws};

/// Outputs of the preparation stage.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub layout: OutputLayout,
    pub settings: ModelSettings,
    pub metadata: RunMetadata,
    pub series: Vec<LocationSeries>,
}

/// Per-location worker results.
#[derive(Debug, Clone, Default)]
pub struct ModelRun {
    pub written: Vec<LocationId>,
    pub failed: Vec<(LocationId, String)>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| PipelineError::json(path, e))
}

/// Ingest, prepare and write the working directory.
pub fn prepare(config: &RunConfig) -> Result<Prepared, PipelineError> {
    config.validate()?;
    let layout = OutputLayout::new(&config.output_root);
    layout.create_dirs()?;
    let cleared = ResultStore::new(layout.results_dir()).clear()?;
    if cleared > 0 {
        info!(cleared, "Removed result bundles from an earlier run.");
    }

    let ingested = load_model_inputs(&config.input)?;
    let hierarchy = load_hierarchy(&config.hierarchy)?;
    info!(
        locations = ingested.series.len(),
        rows = ingested.rows_read,
        skipped = ingested.row_errors.len(),
        hierarchy = hierarchy.locations().count(),
        "Loaded inputs."
    );

    let prepared = prepare_inputs(
        ingested.series,
        &hierarchy,
        config.holdout_days,
        Thresholds {
            deaths: config.death_threshold,
            epi: config.epi_threshold,
        },
    )?;

    let mut settings = ModelSettings::new(layout.results_dir(), config.holdouts, config.n_draws, config.seed);
    settings.no_cases_locs = prepared.no_cases_locs.clone();
    settings.no_hosp_locs = prepared.no_hosp_locs.clone();

    let metadata = RunMetadata {
        input: config.input.clone(),
        hierarchy: config.hierarchy.clone(),
        infections: config.infections.clone(),
        holdouts: config.holdouts,
        n_draws: config.n_draws,
        seed: config.seed,
        holdout_days: config.holdout_days,
        death_threshold: config.death_threshold,
        epi_threshold: config.epi_threshold,
        reporting_lag_days: REPORTING_LAG_DAYS,
        model_locations: prepared.series.iter().map(|s| s.location_id).collect(),
        input_aggregates: prepared.input_aggregates,
        dropped_locations: prepared.dropped_locations,
        no_cases_locs: prepared.no_cases_locs.into_iter().collect(),
        no_hosp_locs: prepared.no_hosp_locs.into_iter().collect(),
        aggregate_missing_constituents: prepared.aggregate_missing_constituents,
        ..RunMetadata::default()
    };

    write_json_pretty(&layout.settings(), &settings)?;
    write_json_pretty(&layout.prepared_metadata(), &metadata)?;
    write_model_data_csv(&layout.model_inputs(), &prepared.series)?;
    debug!(dir = %layout.working_dir().display(), "Wrote working directory.");

    Ok(Prepared {
        layout,
        settings,
        metadata,
        series: prepared.series,
    })
}

/// Run every prepared location on a local worker pool.
pub fn model_locations(
    settings: &ModelSettings,
    series: Vec<LocationSeries>,
    threads: usize,
) -> Result<ModelRun, PipelineError> {
    let store = ResultStore::create(&settings.results_dir)?;
    let predictor = RatioRegression::default();
    let synthesizer = SplineSmoother::default();
    let ctx = EnsembleContext {
        settings,
        predictor: &predictor,
        synthesizer: &synthesizer,
    };

    let mut dispatcher = LocalDispatcher::new(ctx, &store, threads)?;
    let handles: Vec<_> = series.into_iter().map(|s| dispatcher.submit(s)).collect();

    let mut run = ModelRun::default();
    for handle in handles {
        match dispatcher.collect(handle)? {
            JobOutcome::Written(_) => run.written.push(handle.location_id),
            JobOutcome::Failed(reason) => run.failed.push((handle.location_id, reason)),
        }
    }
    info!(written = run.written.len(), failed = run.failed.len(), "Location workers finished.");
    Ok(run)
}

/// Model one location of a prepared run (the unit an external scheduler submits).
pub fn model_one(output_root: &Path, location_id: LocationId) -> Result<PathBuf, PipelineError> {
    let layout = OutputLayout::new(output_root);
    let settings: ModelSettings = read_json(&layout.settings())?;
    let inputs = load_model_inputs(&layout.model_inputs())?;
    let series = inputs
        .series
        .into_iter()
        .find(|s| s.location_id == location_id)
        .ok_or_else(|| PipelineError::Config(format!("location {location_id} is not in the prepared inputs")))?;

    let store = ResultStore::create(&settings.results_dir)?;
    let predictor = RatioRegression::default();
    let synthesizer = SplineSmoother::default();
    let ctx = EnsembleContext {
        settings: &settings,
        predictor: &predictor,
        synthesizer: &synthesizer,
    };
    run_worker(&ctx, &store, &series)
}

/// Cross-location reduction and publishing.
///
/// Returns the completed run metadata, also written to `metadata.json`.
pub fn compile(output_root: &Path, infection_threads: usize) -> Result<RunMetadata, PipelineError> {
    let layout = OutputLayout::new(output_root);
    let settings: ModelSettings = read_json(&layout.settings())?;
    let mut metadata: RunMetadata = read_json(&layout.prepared_metadata())?;
    let hierarchy = load_hierarchy(&metadata.hierarchy)?;
    let infections: Option<DrawTable> = metadata.infections.as_deref().map(load_draw_table).transpose()?;

    info!("Collecting result bundles.");
    let store = ResultStore::new(layout.results_dir());
    let expected: BTreeSet<LocationId> = metadata.model_locations.iter().copied().collect();
    let bundles = store
        .load_all()?
        .into_iter()
        .filter(|b| expected.contains(&b.location_id))
        .collect();
    let collected = collect_bundles(bundles, settings.n_draws)?;
    metadata.failed_model_locations = failed_locations(&metadata.model_locations, &collected);
    metadata.modeled_locations = collected.model_data.len();

    info!("Checking continuity.");
    let continuity = enforce_continuity(collected.smooth_draws, &layout.problem_location_report())?;
    metadata.nan_locations = continuity.nan_locations.clone();

    let observed = observed_deaths(&collected.model_data);
    write_model_data_csv(&layout.model_data(), &collected.model_data)?;
    write_draws_csv(&layout.model_results(), &collected.noisy_draws, Some(&observed))?;
    write_draws_csv(&layout.model_results_refit(), &continuity.complete, Some(&observed))?;
    write_draws_csv(&layout.model_results_refit_nans(), &continuity.incomplete, None)?;

    info!("Aggregating.");
    let aggregates = aggregate_results(&collected.model_data, &continuity.complete, &hierarchy)?;
    metadata.aggregate_locations = aggregates.model_data.len();
    for (id, missing) in &aggregates.missing_constituents {
        metadata.aggregate_missing_constituents.insert(*id, missing.clone());
    }
    write_model_data_csv(&layout.model_data_aggregates(), &aggregates.model_data)?;
    write_draws_csv(&layout.model_results_refit_aggregates(), &aggregates.draws, None)?;

    let mut summary = summarize_draws(
        &counts_to_rates(&continuity.complete, &populations(&collected.model_data))?,
        &observed,
    );
    summary.extend(summarize_draws(
        &counts_to_rates(&aggregates.draws, &populations(&aggregates.model_data))?,
        &observed,
    ));
    write_summary_csv(&layout.model_summary(), &summary)?;

    info!("Writing infection draws.");
    let locations: BTreeSet<LocationId> = hierarchy.leaves().into_iter().collect();
    let deriver = InfectionDeriver::new(
        &continuity.complete,
        infections.as_ref(),
        &locations,
        &observed,
        metadata.reporting_lag_days,
    );
    metadata.infection_files = deriver.write_all(&layout.infections_dir(), infection_threads)?.len();

    write_json_pretty(&layout.metadata(), &metadata)?;
    Ok(metadata)
}

/// Full pipeline: prepare, model every location, compile.
pub fn run_all(config: &RunConfig) -> Result<RunMetadata, PipelineError> {
    let prepared = prepare(config)?;
    model_locations(&prepared.settings, prepared.series, config.threads)?;
    compile(prepared.layout.root(), config.infection_threads)
}
