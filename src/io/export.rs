//! Export pipeline tables to CSV and JSON.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream
//! scripts: one header row, ISO dates, empty cells for missing values.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::compile::{InfectionRow, LocationGap, ObservedKeys};
use crate::domain::{DrawTable, FirstStageKind, Indicator, LocationSeries};
use crate::error::PipelineError;
use crate::report::SummaryRow;

fn create_writer(path: &Path) -> Result<csv::Writer<File>, PipelineError> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(csv::Writer::from_writer(file))
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn finish(path: &Path, mut writer: csv::Writer<File>) -> Result<(), PipelineError> {
    writer.flush().map_err(|e| PipelineError::io(path, e))
}

/// Write model data in the fixed column schema.
pub fn write_model_data_csv(path: &Path, series: &[LocationSeries]) -> Result<(), PipelineError> {
    let mut w = create_writer(path)?;

    let mut header = vec!["location_id".to_string(), "location_name".to_string(), "date".to_string()];
    header.extend(Indicator::ALL.iter().map(|i| i.column_name().to_string()));
    header.extend(FirstStageKind::ALL.iter().map(|k| k.predicted_column().to_string()));
    header.push("population".to_string());
    header.push("doy_holdout".to_string());
    w.write_record(&header).map_err(|e| PipelineError::csv(path, e))?;

    for s in series {
        for row in &s.rows {
            let mut record = vec![s.location_id.to_string(), s.location_name.clone(), row.date.to_string()];
            record.extend(Indicator::ALL.iter().map(|&i| fmt_opt(row.indicator(i))));
            record.extend(FirstStageKind::ALL.iter().map(|&k| fmt_opt(row.prediction(k))));
            record.push(s.population.to_string());
            record.push(s.doy_holdout.map(|d| d.to_string()).unwrap_or_default());
            w.write_record(&record).map_err(|e| PipelineError::csv(path, e))?;
        }
    }

    finish(path, w)
}

/// Write a wide draw table. When `observed` is given an `observed` flag
/// column (0/1) is appended.
pub fn write_draws_csv(path: &Path, table: &DrawTable, observed: Option<&ObservedKeys>) -> Result<(), PipelineError> {
    let mut w = create_writer(path)?;

    let mut header = vec!["location_id".to_string(), "date".to_string()];
    header.extend(table.column_names());
    if observed.is_some() {
        header.push("observed".to_string());
    }
    w.write_record(&header).map_err(|e| PipelineError::csv(path, e))?;

    for row in table.rows() {
        let mut record = Vec::with_capacity(header.len());
        record.push(row.location_id.to_string());
        record.push(row.date.to_string());
        record.extend(row.values.iter().map(|v| fmt_opt(*v)));
        if let Some(keys) = observed {
            record.push(u8::from(keys.contains(&row.key())).to_string());
        }
        w.write_record(&record).map_err(|e| PipelineError::csv(path, e))?;
    }

    finish(path, w)
}

/// Write the `(location_id, gap)` diagnostic for the continuity check.
pub fn write_gap_report(path: &Path, gaps: &[LocationGap]) -> Result<(), PipelineError> {
    let mut w = create_writer(path)?;
    w.write_record(["location_id", "gap"]).map_err(|e| PipelineError::csv(path, e))?;
    for g in gaps {
        w.write_record([g.location_id.to_string(), g.gap_days.to_string()])
            .map_err(|e| PipelineError::csv(path, e))?;
    }
    finish(path, w)
}

pub fn write_summary_csv(path: &Path, rows: &[SummaryRow]) -> Result<(), PipelineError> {
    let mut w = create_writer(path)?;
    w.write_record([
        "location_id",
        "date",
        "cumulative_mean",
        "cumulative_lower",
        "cumulative_upper",
        "daily_mean",
        "daily_lower",
        "daily_upper",
        "observed",
    ])
    .map_err(|e| PipelineError::csv(path, e))?;

    for r in rows {
        w.write_record([
            r.location_id.to_string(),
            r.date.to_string(),
            r.cumulative.mean.to_string(),
            r.cumulative.lower.to_string(),
            r.cumulative.upper.to_string(),
            r.daily.mean.to_string(),
            r.daily.lower.to_string(),
            r.daily.upper.to_string(),
            u8::from(r.observed).to_string(),
        ])
        .map_err(|e| PipelineError::csv(path, e))?;
    }
    finish(path, w)
}

/// Write one infection/death draw file.
pub fn write_infection_draw_csv(path: &Path, rows: &[InfectionRow]) -> Result<(), PipelineError> {
    let mut w = create_writer(path)?;
    w.write_record([
        "location_id",
        "date",
        "infections_draw",
        "deaths_draw",
        "observed",
        "duration",
    ])
    .map_err(|e| PipelineError::csv(path, e))?;

    for r in rows {
        w.write_record([
            r.location_id.to_string(),
            r.date.to_string(),
            fmt_opt(r.infections),
            fmt_opt(r.deaths),
            u8::from(r.observed).to_string(),
            r.duration.to_string(),
        ])
        .map_err(|e| PipelineError::csv(path, e))?;
    }
    finish(path, w)
}

/// Write any serializable value as pretty JSON (settings, run metadata).
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| PipelineError::json(path, e))?;
    writer.flush().map_err(|e| PipelineError::io(path, e))
}
