use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use deaths_spline::app::pipeline::{compile, model_one, prepare, run_all};
use deaths_spline::domain::{DrawRow, DrawTable, LocationId, ModelDataBundle, RunConfig};
use deaths_spline::io::{OutputLayout, ResultStore};
use tempfile::TempDir;

const N_DRAWS: usize = 8;
const DAYS: i64 = 45;

fn write(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
}

/// Global (1) > Country (10) > North (11), South (12), Tiny (13).
fn write_hierarchy(dir: &Path) -> PathBuf {
    let path = dir.join("hierarchy.csv");
    write(
        &path,
        "location_id,parent_id,location_name\n1,1,Global\n10,1,Country\n11,10,North\n12,10,South\n13,10,Tiny\n",
    );
    path
}

fn write_inputs(dir: &Path) -> PathBuf {
    write_inputs_with_south(dir, "inputs.csv", DAYS, 1.5)
}

fn write_inputs_with_south(dir: &Path, file: &str, south_days: i64, south_scale: f64) -> PathBuf {
    let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
    let mut csv = String::from(
        "location_id,location_name,date,population,Confirmed case rate,Hospitalization rate,Death rate\n",
    );
    for (id, name, population, scale, days) in [
        (11, "North", 2_000_000.0, 1.0, DAYS),
        (12, "South", 1_000_000.0, south_scale, south_days),
    ] {
        for i in 0..days {
            let t = (1 + i) as f64;
            csv.push_str(&format!(
                "{id},{name},{},{population},{},{},{}\n",
                start + Duration::days(i),
                1e-5 * scale * t * t,
                4e-6 * scale * t * t,
                2e-7 * scale * t * t,
            ));
        }
    }
    // Never reaches the death threshold.
    for i in 0..DAYS {
        csv.push_str(&format!("13,Tiny,{},1000,0.0001,,0.000001\n", start + Duration::days(i)));
    }
    let path = dir.join(file);
    write(&path, &csv);
    path
}

fn write_infections(dir: &Path) -> PathBuf {
    let start = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
    let header: Vec<String> = (0..N_DRAWS).map(|d| format!("draw_{d}")).collect();
    let mut csv = format!("location_id,date,{}\n", header.join(","));
    for i in 0..DAYS {
        let values: Vec<String> = (0..N_DRAWS).map(|d| format!("{}", 100 + d as i64 + i)).collect();
        csv.push_str(&format!("11,{},{}\n", start + Duration::days(i), values.join(",")));
    }
    let path = dir.join("infections.csv");
    write(&path, &csv);
    path
}

fn config(dir: &Path, output_root: PathBuf) -> RunConfig {
    RunConfig {
        input: write_inputs(dir),
        hierarchy: write_hierarchy(dir),
        infections: Some(write_infections(dir)),
        output_root,
        holdouts: 1,
        n_draws: N_DRAWS,
        holdout_days: 0,
        seed: 7,
        threads: 2,
        infection_threads: 3,
        death_threshold: 5.0,
        epi_threshold: 10.0,
    }
}

fn header(path: &Path) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.headers().unwrap().iter().map(str::to_string).collect()
}

fn location_ids(path: &Path) -> BTreeSet<i64> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap()[0].parse::<i64>().unwrap())
        .collect()
}

#[test]
fn full_run_publishes_every_output() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), dir.path().join("out"));

    let metadata = run_all(&config).unwrap();
    let layout = OutputLayout::new(&config.output_root);

    assert_eq!(metadata.n_draws, N_DRAWS);
    assert_eq!(metadata.reporting_lag_days, 23);
    assert_eq!(metadata.dropped_locations, vec![LocationId(13)]);
    assert_eq!(metadata.input_aggregates, vec![LocationId(10)]);
    assert!(metadata.no_cases_locs.is_empty());
    assert_eq!(
        metadata.modeled_locations + metadata.failed_model_locations.len(),
        metadata.model_locations.len()
    );
    assert!(
        metadata.aggregate_missing_constituents[&LocationId(-10)].contains(&LocationId(13)),
        "{:?}",
        metadata.aggregate_missing_constituents
    );
    assert_eq!(metadata.infection_files, N_DRAWS);

    for path in [
        layout.model_data(),
        layout.model_results(),
        layout.model_results_refit(),
        layout.model_results_refit_nans(),
        layout.model_data_aggregates(),
        layout.model_results_refit_aggregates(),
        layout.model_summary(),
        layout.metadata(),
    ] {
        assert!(path.exists(), "missing {}", path.display());
    }
    assert!(!layout.problem_location_report().exists());

    let refit = header(&layout.model_results_refit());
    let draws: Vec<&String> = refit.iter().filter(|c| c.starts_with("draw_")).collect();
    assert_eq!(draws.len(), N_DRAWS);
    assert_eq!(draws[0], "draw_0");
    assert_eq!(draws[N_DRAWS - 1], &format!("draw_{}", N_DRAWS - 1));
    assert!(refit.contains(&"observed".to_string()));

    let infection_file = layout.infections_dir().join("infections_draw_0000.csv");
    assert_eq!(
        header(&infection_file),
        vec!["location_id", "date", "infections_draw", "deaths_draw", "observed", "duration"]
    );
    // Only most-detailed locations; the modeled parent (10) would double count.
    let ids = location_ids(&infection_file);
    assert!(!ids.is_empty());
    assert!(ids.is_subset(&BTreeSet::from([11, 12, 13])), "{ids:?}");
}

#[test]
fn rerun_into_same_root_does_not_publish_stale_bundles() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), dir.path().join("out"));
    run_all(&config).unwrap();

    // South now has too few points for the smoother but clears the thresholds.
    config.input = write_inputs_with_south(dir.path(), "rerun.csv", 2, 100.0);
    let metadata = run_all(&config).unwrap();

    assert!(metadata.model_locations.contains(&LocationId(12)));
    assert!(
        metadata.failed_model_locations.contains(&LocationId(12)),
        "{:?}",
        metadata.failed_model_locations
    );
    let layout = OutputLayout::new(&config.output_root);
    assert!(!location_ids(&layout.model_results_refit()).contains(&12));
    assert!(!location_ids(&layout.model_results()).contains(&12));
}

#[test]
fn interior_gap_publishes_only_the_diagnostic() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), dir.path().join("out"));
    let prepared = prepare(&config).unwrap();
    let store = ResultStore::create(prepared.layout.results_dir()).unwrap();

    let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
    for series in &prepared.series {
        let mut draws = DrawTable::with_draws(N_DRAWS);
        for (i, missing) in [false, true, false].into_iter().enumerate() {
            let value = if missing { None } else { Some(1.0 + i as f64) };
            draws
                .push(DrawRow {
                    location_id: series.location_id,
                    date: start + Duration::days(i as i64),
                    population: None,
                    values: vec![value; N_DRAWS],
                })
                .unwrap();
        }
        store
            .write(&ModelDataBundle {
                location_id: series.location_id,
                model_data: series.clone(),
                noisy_draws: draws.clone(),
                smooth_draws: draws,
            })
            .unwrap();
    }

    let err = compile(&config.output_root, 2).unwrap_err();
    assert_eq!(err.exit_code(), 5);

    let layout = prepared.layout;
    assert!(layout.problem_location_report().exists());
    for path in [
        layout.model_data(),
        layout.model_results(),
        layout.model_results_refit(),
        layout.model_summary(),
        layout.metadata(),
    ] {
        assert!(!path.exists(), "published {}", path.display());
    }
}

#[test]
fn staged_run_matches_full_run() {
    let dir = TempDir::new().unwrap();
    let full = config(dir.path(), dir.path().join("full"));
    run_all(&full).unwrap();

    let staged = RunConfig {
        output_root: dir.path().join("staged"),
        ..full.clone()
    };
    let prepared = prepare(&staged).unwrap();
    for id in &prepared.metadata.model_locations {
        if let Err(err) = model_one(&staged.output_root, *id) {
            assert!(err.is_location_scoped(), "{err}");
        }
    }
    compile(&staged.output_root, 2).unwrap();

    let a = fs::read_to_string(OutputLayout::new(&full.output_root).model_results_refit()).unwrap();
    let b = fs::read_to_string(OutputLayout::new(&staged.output_root).model_results_refit()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn missing_population_column_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), dir.path().join("out"));
    let bad = dir.path().join("bad.csv");
    write(&bad, "location_id,location_name,date,Death rate\n11,North,2020-03-01,0.1\n");
    config.input = bad;

    let err = run_all(&config).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
