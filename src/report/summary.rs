//! Mean and 95% interval of the draws per location and date.

use serde::Serialize;

use chrono::NaiveDate;

use crate::compile::{ObservedKeys, daily_from_cumulative};
use crate::domain::{DrawTable, LocationId};

pub const LOWER_PERCENTILE: f64 = 2.5;
pub const UPPER_PERCENTILE: f64 = 97.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub location_id: LocationId,
    pub date: NaiveDate,
    pub cumulative: Interval,
    pub daily: Interval,
    pub observed: bool,
}

/// Linear-interpolated percentile of sorted values (`p` in 0..=100).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Interval over the non-missing values, `None` if there are none.
pub fn interval(values: &[Option<f64>]) -> Option<Interval> {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(f64::total_cmp);
    Some(Interval {
        mean: present.iter().sum::<f64>() / present.len() as f64,
        lower: percentile(&present, LOWER_PERCENTILE),
        upper: percentile(&present, UPPER_PERCENTILE),
    })
}

/// Summarize cumulative draws and their first differences.
///
/// Each location's first date has a daily value equal to its cumulative one.
pub fn summarize_draws(cumulative: &DrawTable, observed: &ObservedKeys) -> Vec<SummaryRow> {
    let mut sorted = cumulative.clone();
    sorted.sort_rows();
    let daily = daily_from_cumulative(&sorted);

    sorted
        .rows()
        .iter()
        .zip(daily.rows())
        .filter_map(|(c, d)| {
            Some(SummaryRow {
                location_id: c.location_id,
                date: c.date,
                cumulative: interval(&c.values)?,
                daily: interval(&d.values)?,
                observed: observed.contains(&c.key()),
            })
        })
        .collect()
}
