//! Daily deaths per draw, shifted back to infection dates.
//!
//! Smooth draws are cumulative counts. Each location's series is differenced
//! (with a zero before its first date), dated back by the reporting lag, and
//! written as one file per draw, optionally joined with an external
//! infections table keyed by infection date.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use tracing::info;

use crate::compile::ObservedKeys;
use crate::domain::{DrawTable, LocationId};
use crate::error::PipelineError;
use crate::io::write_infection_draw_csv;

/// Days between case reporting and the underlying report date.
pub const CASE_REPORTING_LAG_DAYS: i64 = 12;

/// Days from infection to a reported death.
pub const REPORTING_LAG_DAYS: i64 = CASE_REPORTING_LAG_DAYS + 11;

/// Size of the per-draw writer pool.
pub const DEFAULT_INFECTION_THREADS: usize = 25;

/// First difference per location along the date axis.
///
/// The first date of each location keeps its cumulative value. A missing
/// value on either side gives a missing increment.
pub fn daily_from_cumulative(cumulative: &DrawTable) -> DrawTable {
    let mut daily = cumulative.clone();
    daily.sort_rows();
    let sorted = daily.clone();
    let previous = sorted.rows();

    for (i, row) in daily.rows_mut().iter_mut().enumerate() {
        let Some(prev) = i.checked_sub(1).map(|p| &previous[p]) else {
            continue;
        };
        if prev.location_id != row.location_id {
            continue;
        }
        for (v, p) in row.values.iter_mut().zip(&prev.values) {
            *v = match (*v, *p) {
                (Some(c), Some(p)) => Some(c - p),
                _ => None,
            };
        }
    }
    daily
}

/// Move every date back by `days`.
pub fn shift_dates(table: &DrawTable, days: i64) -> DrawTable {
    let mut shifted = table.clone();
    for row in shifted.rows_mut() {
        row.date = row.date - Duration::days(days);
    }
    shifted
}

/// One row of a per-draw infection file.
#[derive(Debug, Clone, PartialEq)]
pub struct InfectionRow {
    pub location_id: LocationId,
    /// Infection date (death date minus the lag).
    pub date: NaiveDate,
    pub infections: Option<f64>,
    pub deaths: Option<f64>,
    /// Whether a death rate was observed on the corresponding death date.
    pub observed: bool,
    pub duration: i64,
}

/// Prepared inputs for the per-draw fan-out.
pub struct InfectionDeriver<'a> {
    daily: DrawTable,
    infections: Option<&'a DrawTable>,
    infection_rows: HashMap<(LocationId, NaiveDate), usize>,
    infection_columns: HashMap<usize, usize>,
    observed: &'a ObservedKeys,
    lag_days: i64,
}

impl<'a> InfectionDeriver<'a> {
    /// `cumulative` is the smooth count table; only rows for `locations`
    /// are kept.
    pub fn new(
        cumulative: &DrawTable,
        infections: Option<&'a DrawTable>,
        locations: &BTreeSet<LocationId>,
        observed: &'a ObservedKeys,
        lag_days: i64,
    ) -> Self {
        let mut daily = shift_dates(&daily_from_cumulative(cumulative), lag_days);
        daily.retain(|r| locations.contains(&r.location_id));

        let (infection_rows, infection_columns) = match infections {
            Some(table) => (
                table.rows().iter().enumerate().map(|(i, r)| (r.key(), i)).collect(),
                table.draw_ids().iter().enumerate().map(|(pos, &id)| (id, pos)).collect(),
            ),
            None => (HashMap::new(), HashMap::new()),
        };

        Self {
            daily,
            infections,
            infection_rows,
            infection_columns,
            observed,
            lag_days,
        }
    }

    pub fn draw_ids(&self) -> &[usize] {
        self.daily.draw_ids()
    }

    /// Rows of the file for the draw at column position `pos`.
    pub fn draw_rows(&self, pos: usize) -> Vec<InfectionRow> {
        let draw_id = self.daily.draw_ids()[pos];
        let infection_col = self.infection_columns.get(&draw_id).copied();

        self.daily
            .rows()
            .iter()
            .map(|row| {
                let infections = self.infections.zip(infection_col).and_then(|(table, col)| {
                    self.infection_rows
                        .get(&row.key())
                        .and_then(|&i| table.rows()[i].values[col])
                });
                let death_date = row.date + Duration::days(self.lag_days);
                InfectionRow {
                    location_id: row.location_id,
                    date: row.date,
                    infections,
                    deaths: row.values[pos],
                    observed: self.observed.contains(&(row.location_id, death_date)),
                    duration: self.lag_days,
                }
            })
            .collect()
    }

    /// Write `infections_draw_XXXX.csv` for every draw on a pool of `threads`.
    pub fn write_all(&self, dir: &Path, threads: usize) -> Result<Vec<PathBuf>, PipelineError> {
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build infection writer pool: {e}")))?;

        let paths = pool.install(|| {
            (0..self.daily.n_draws())
                .into_par_iter()
                .map(|pos| {
                    let path = dir.join(format!("infections_draw_{:04}.csv", self.draw_ids()[pos]));
                    write_infection_draw_csv(&path, &self.draw_rows(pos))?;
                    Ok(path)
                })
                .collect::<Result<Vec<_>, PipelineError>>()
        })?;
        info!(files = paths.len(), dir = %dir.display(), "Wrote infection draws.");
        Ok(paths)
    }
}
