//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the pipeline code stays clean and testable
//! - output changes are localized

use std::path::Path;

use crate::domain::LocationId;
use crate::report::RunMetadata;

/// Format the run summary printed after a completed run.
pub fn format_run_summary(meta: &RunMetadata, output_root: &Path) -> String {
    let mut out = String::new();

    out.push_str("=== deaths - holdout ensemble ===\n");
    out.push_str(&format!("Input: {}\n", meta.input.display()));
    out.push_str(&format!(
        "Draws: {} | holdouts: {} | seed: {} | holdout days: {}\n",
        meta.n_draws, meta.holdouts, meta.seed, meta.holdout_days
    ));
    out.push_str(&format!(
        "Thresholds: deaths >= {} | cases/hosp >= {}\n",
        meta.death_threshold, meta.epi_threshold
    ));

    out.push_str("\nLocations:\n");
    out.push_str(&format!("- submitted       {:>6}\n", meta.model_locations.len()));
    out.push_str(&format!("- modeled         {:>6}\n", meta.modeled_locations));
    out.push_str(&format!("- aggregates      {:>6}\n", meta.aggregate_locations));
    out.push_str(&format_list("dropped", &meta.dropped_locations));
    out.push_str(&format_list("no cases model", &meta.no_cases_locs));
    out.push_str(&format_list("no hosp model", &meta.no_hosp_locs));
    out.push_str(&format_list("failed", &meta.failed_model_locations));
    out.push_str(&format_list("trailing NaNs", &meta.nan_locations));
    if !meta.aggregate_missing_constituents.is_empty() {
        out.push_str(&format!(
            "- aggregates missing constituents: {}\n",
            meta.aggregate_missing_constituents.len()
        ));
    }

    out.push_str(&format!(
        "\nWrote {} infection draw files (lag {} days).\n",
        meta.infection_files, meta.reporting_lag_days
    ));
    out.push_str(&format!("Outputs: {}\n", output_root.display()));
    out
}

fn format_list(label: &str, ids: &[LocationId]) -> String {
    if ids.is_empty() {
        return String::new();
    }
    const SHOWN: usize = 10;
    let mut parts: Vec<String> = ids.iter().take(SHOWN).map(|id| id.to_string()).collect();
    if ids.len() > SHOWN {
        parts.push(format!("... (+{})", ids.len() - SHOWN));
    }
    format!("- {:<15} {:>6}  [{}]\n", label, ids.len(), parts.join(", "))
}
