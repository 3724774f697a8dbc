//! Wide draw tables: one row per `(location, date)`, one column per draw id.
//!
//! Draw ids are tracked explicitly rather than by position so that tables
//! produced by different holdout iterations can be relabelled into disjoint
//! ranges and merged without ambiguity.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::LocationId;
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawRow {
    pub location_id: LocationId,
    pub date: NaiveDate,
    /// Present on rate tables until they are rescaled into counts.
    pub population: Option<f64>,
    /// One value per entry of the table's `draw_ids`, in the same order.
    pub values: Vec<Option<f64>>,
}

impl DrawRow {
    /// True when any draw value is missing.
    pub fn has_missing(&self) -> bool {
        self.values.iter().any(Option::is_none)
    }

    pub fn key(&self) -> (LocationId, NaiveDate) {
        (self.location_id, self.date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawTable {
    draw_ids: Vec<usize>,
    rows: Vec<DrawRow>,
}

pub fn draw_column_name(draw_id: usize) -> String {
    format!("draw_{draw_id}")
}

impl DrawTable {
    /// Empty table with the given column ids.
    pub fn new(draw_ids: Vec<usize>) -> Self {
        Self {
            draw_ids,
            rows: Vec::new(),
        }
    }

    /// Empty table with locally scoped ids `0..n`.
    pub fn with_draws(n: usize) -> Self {
        Self::new((0..n).collect())
    }

    /// Build a table, checking every row has one value per column.
    pub fn from_rows(draw_ids: Vec<usize>, rows: Vec<DrawRow>) -> Result<Self, String> {
        let mut table = Self::new(draw_ids);
        for row in rows {
            table.push(row)?;
        }
        table.sort_rows();
        Ok(table)
    }

    pub fn push(&mut self, row: DrawRow) -> Result<(), String> {
        if row.values.len() != self.draw_ids.len() {
            return Err(format!(
                "row ({}, {}) has {} values for {} draw columns",
                row.location_id,
                row.date,
                row.values.len(),
                self.draw_ids.len()
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn draw_ids(&self) -> &[usize] {
        &self.draw_ids
    }

    pub fn n_draws(&self) -> usize {
        self.draw_ids.len()
    }

    pub fn rows(&self) -> &[DrawRow] {
        &self.rows
    }

    /// Rows for in-place edits of dates and values. Callers keep row widths.
    pub(crate) fn rows_mut(&mut self) -> &mut [DrawRow] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<DrawRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.draw_ids.iter().map(|&d| draw_column_name(d)).collect()
    }

    /// True when the columns are exactly `draw_0..draw_{n-1}` in order.
    pub fn has_contiguous_ids(&self, n: usize) -> bool {
        self.draw_ids.len() == n && self.draw_ids.iter().enumerate().all(|(i, &d)| i == d)
    }

    pub fn location_ids(&self) -> BTreeSet<LocationId> {
        self.rows.iter().map(|r| r.location_id).collect()
    }

    pub fn sort_rows(&mut self) {
        self.rows.sort_by_key(DrawRow::key);
    }

    /// Shift every draw id by `offset`.
    pub fn relabel(mut self, offset: usize) -> Self {
        for id in &mut self.draw_ids {
            *id += offset;
        }
        self
    }

    /// Split rows by a predicate: `(matching, rest)`.
    pub fn partition<F>(self, pred: F) -> (DrawTable, DrawTable)
    where
        F: Fn(&DrawRow) -> bool,
    {
        let (yes, no): (Vec<DrawRow>, Vec<DrawRow>) = self.rows.into_iter().partition(|r| pred(r));
        (
            DrawTable {
                draw_ids: self.draw_ids.clone(),
                rows: yes,
            },
            DrawTable {
                draw_ids: self.draw_ids,
                rows: no,
            },
        )
    }

    pub fn retain<F>(&mut self, pred: F)
    where
        F: FnMut(&DrawRow) -> bool,
    {
        self.rows.retain(pred);
    }

    /// Multiply every draw by its row's population and drop the population.
    ///
    /// Returns the key of the first row without a population.
    pub fn rescale_by_population(mut self) -> Result<Self, (LocationId, NaiveDate)> {
        for row in &mut self.rows {
            let Some(population) = row.population.take() else {
                return Err(row.key());
            };
            for v in row.values.iter_mut().flatten() {
                *v *= population;
            }
        }
        Ok(self)
    }

    /// Outer-merge tables with disjoint draw ids on `(location, date)`.
    ///
    /// The result has the sorted union of draw ids; cells a table did not
    /// cover are `None`. Population is taken from the first table that has
    /// the row.
    pub fn outer_merge(tables: Vec<DrawTable>) -> Result<DrawTable, PipelineError> {
        let mut seen = BTreeSet::new();
        for table in &tables {
            for &id in &table.draw_ids {
                if !seen.insert(id) {
                    return Err(PipelineError::DrawIdCollision { draw_id: id });
                }
            }
        }
        let draw_ids: Vec<usize> = seen.into_iter().collect();
        let position: BTreeMap<usize, usize> = draw_ids.iter().enumerate().map(|(i, &d)| (d, i)).collect();
        let width = draw_ids.len();

        let mut merged: BTreeMap<(LocationId, NaiveDate), DrawRow> = BTreeMap::new();
        for table in tables {
            let columns: Vec<usize> = table.draw_ids.iter().map(|d| position[d]).collect();
            for row in table.rows {
                let entry = merged.entry(row.key()).or_insert_with(|| DrawRow {
                    location_id: row.location_id,
                    date: row.date,
                    population: None,
                    values: vec![None; width],
                });
                if entry.population.is_none() {
                    entry.population = row.population;
                }
                for (&col, value) in columns.iter().zip(row.values) {
                    entry.values[col] = value;
                }
            }
        }

        Ok(DrawTable {
            draw_ids,
            rows: merged.into_values().collect(),
        })
    }

    /// Stack tables that share the same draw ids (e.g. one per location).
    pub fn concat(tables: Vec<DrawTable>) -> Result<DrawTable, PipelineError> {
        let mut iter = tables.into_iter();
        let Some(mut out) = iter.next() else {
            return Ok(DrawTable::default());
        };
        for table in iter {
            if table.draw_ids != out.draw_ids {
                return Err(PipelineError::DrawBudgetMismatch {
                    allocated: table.draw_ids.len(),
                    requested: out.draw_ids.len(),
                });
            }
            out.rows.extend(table.rows);
        }
        out.sort_rows();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 5, d).unwrap()
    }

    fn row(d: u32, values: &[f64]) -> DrawRow {
        DrawRow {
            location_id: LocationId(10),
            date: day(d),
            population: Some(100.0),
            values: values.iter().copied().map(Some).collect(),
        }
    }

    #[test]
    fn push_rejects_wrong_width() {
        let mut table = DrawTable::with_draws(2);
        assert!(table.push(row(1, &[1.0])).is_err());
        assert!(table.push(row(1, &[1.0, 2.0])).is_ok());
    }

    #[test]
    fn outer_merge_unions_dates_and_fills_missing() {
        let a = DrawTable::from_rows(vec![0, 1], vec![row(1, &[1.0, 2.0]), row(2, &[3.0, 4.0])]).unwrap();
        let b = DrawTable::from_rows(vec![0], vec![row(1, &[5.0])]).unwrap().relabel(2);

        let merged = DrawTable::outer_merge(vec![a, b]).unwrap();
        assert!(merged.has_contiguous_ids(3));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.rows()[0].values, vec![Some(1.0), Some(2.0), Some(5.0)]);
        assert_eq!(merged.rows()[1].values, vec![Some(3.0), Some(4.0), None]);
        assert!(merged.rows()[1].has_missing());
    }

    #[test]
    fn outer_merge_rejects_overlapping_ids() {
        let a = DrawTable::from_rows(vec![0, 1], vec![row(1, &[1.0, 2.0])]).unwrap();
        let b = DrawTable::from_rows(vec![1], vec![row(1, &[5.0])]).unwrap();
        let err = DrawTable::outer_merge(vec![a, b]).unwrap_err();
        assert!(matches!(err, PipelineError::DrawIdCollision { draw_id: 1 }));
    }

    #[test]
    fn rescale_multiplies_and_drops_population() {
        let table = DrawTable::from_rows(vec![0, 1], vec![row(1, &[0.01, 0.02])]).unwrap();
        let counts = table.rescale_by_population().unwrap();
        let r = &counts.rows()[0];
        assert_eq!(r.population, None);
        assert!((r.values[0].unwrap() - 1.0).abs() < 1e-12);
        assert!((r.values[1].unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn rescale_reports_missing_population() {
        let mut r = row(3, &[1.0]);
        r.population = None;
        let table = DrawTable::from_rows(vec![0], vec![r]).unwrap();
        assert_eq!(table.rescale_by_population().unwrap_err(), (LocationId(10), day(3)));
    }

    #[test]
    fn concat_requires_matching_ids() {
        let a = DrawTable::from_rows(vec![0, 1], vec![row(1, &[1.0, 2.0])]).unwrap();
        let b = DrawTable::from_rows(vec![0], vec![row(2, &[1.0])]).unwrap();
        assert!(DrawTable::concat(vec![a, b]).is_err());
    }
}
