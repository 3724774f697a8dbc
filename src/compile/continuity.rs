//! Continuity check on assembled smooth draws.
//!
//! A row is incomplete when any draw is missing. Incomplete rows are allowed
//! only after a location's last complete row; anything earlier is an interior
//! gap and aborts the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info};

use crate::domain::{DrawTable, LocationId};
use crate::error::PipelineError;
use crate::io::write_gap_report;

/// Days from a location's last complete row to its first incomplete one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocationGap {
    pub location_id: LocationId,
    pub gap_days: i64,
}

impl LocationGap {
    pub fn is_interior(&self) -> bool {
        self.gap_days < 0
    }
}

#[derive(Debug, Clone)]
pub struct ContinuityReport {
    /// Rows with every draw present.
    pub complete: DrawTable,
    /// Rows with at least one missing draw.
    pub incomplete: DrawTable,
    /// One entry per location that has both complete and incomplete rows.
    pub gaps: Vec<LocationGap>,
    /// Locations with any incomplete row, including ones with no complete rows.
    pub nan_locations: Vec<LocationId>,
}

impl ContinuityReport {
    pub fn interior_locations(&self) -> Vec<LocationId> {
        self.gaps
            .iter()
            .filter(|g| g.is_interior())
            .map(|g| g.location_id)
            .collect()
    }
}

/// Split `smooth` into complete and incomplete rows and measure each gap.
pub fn check_continuity(smooth: DrawTable) -> ContinuityReport {
    let (incomplete, complete) = smooth.partition(|r| r.has_missing());

    let mut last_complete: BTreeMap<LocationId, NaiveDate> = BTreeMap::new();
    for row in complete.rows() {
        let entry = last_complete.entry(row.location_id).or_insert(row.date);
        *entry = (*entry).max(row.date);
    }
    let mut first_incomplete: BTreeMap<LocationId, NaiveDate> = BTreeMap::new();
    for row in incomplete.rows() {
        let entry = first_incomplete.entry(row.location_id).or_insert(row.date);
        *entry = (*entry).min(row.date);
    }

    let gaps = first_incomplete
        .iter()
        .filter_map(|(&location_id, &first)| {
            last_complete.get(&location_id).map(|&last| LocationGap {
                location_id,
                gap_days: (first - last).num_days(),
            })
        })
        .collect();

    ContinuityReport {
        complete,
        incomplete,
        gaps,
        nan_locations: first_incomplete.into_keys().collect(),
    }
}

/// Run the check and abort on interior gaps, writing the `(location_id, gap)`
/// report to `report_path` first.
pub fn enforce_continuity(smooth: DrawTable, report_path: &Path) -> Result<ContinuityReport, PipelineError> {
    let report = check_continuity(smooth);
    let interior = report.interior_locations();
    if !interior.is_empty() {
        write_gap_report(report_path, &report.gaps)?;
        error!(
            locations = ?interior,
            report = %report_path.display(),
            "Interior gaps in smooth draws."
        );
        return Err(PipelineError::InteriorGap {
            locations: interior,
            report: PathBuf::from(report_path),
        });
    }
    if !report.nan_locations.is_empty() {
        info!(
            locations = report.nan_locations.len(),
            rows = report.incomplete.len(),
            "Dropping trailing incomplete rows."
        );
    }
    Ok(report)
}
