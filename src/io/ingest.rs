//! CSV ingest and normalization.
//!
//! Turns the model-input, hierarchy and infection tables into domain types.
//!
//! Design goals:
//! - **Strict schema** for required columns (clear errors, exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Deterministic output** (locations and rows sorted)

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use tracing::{debug, warn};

use crate::domain::{DrawRow, DrawTable, Hierarchy, Indicator, Location, LocationId, LocationSeries, ModelRow};
use crate::error::PipelineError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Model inputs grouped by location.
#[derive(Debug, Clone)]
pub struct IngestedInputs {
    pub series: Vec<LocationSeries>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

fn open_reader(path: &Path) -> Result<(csv::Reader<File>, HashMap<String, usize>), PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);
    let headers = reader.headers().map_err(|e| PipelineError::csv(path, e))?.clone();
    let header_map = build_header_map(&headers);
    Ok((reader, header_map))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn ensure_columns(path: &Path, header_map: &HashMap<String, usize>, required: &[&str]) -> Result<(), PipelineError> {
    for name in required {
        if !header_map.contains_key(*name) {
            return Err(PipelineError::Config(format!(
                "'{}' is missing required column `{name}`",
                path.display()
            )));
        }
    }
    Ok(())
}

fn date_column(header_map: &HashMap<String, usize>) -> &'static str {
    // The upstream tables use `Date`; exports use `date`. Both normalize.
    if header_map.contains_key("date") { "date" } else { "ds" }
}

/// Load the per-location model inputs (`location_id`, `location_name`,
/// `date`, the three rate columns, `population`).
pub fn load_model_inputs(path: &Path) -> Result<IngestedInputs, PipelineError> {
    let (mut reader, header_map) = open_reader(path)?;
    ensure_columns(path, &header_map, &["location_id", "location_name", "date", "population"])?;
    let date_col = date_column(&header_map);

    let mut by_location: BTreeMap<LocationId, LocationSeries> = BTreeMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: header is line 1 and CSV lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_input_row(&record, &header_map, date_col) {
            Ok((location_id, name, population, row)) => {
                let series = by_location.entry(location_id).or_insert_with(|| LocationSeries {
                    location_id,
                    location_name: name,
                    population,
                    doy_holdout: None,
                    rows: Vec::new(),
                });
                series.rows.push(row);
            }
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        warn!(
            path = %path.display(),
            skipped = row_errors.len(),
            first = %row_errors[0].message,
            "Skipped invalid model input rows."
        );
    }

    let mut series: Vec<LocationSeries> = by_location.into_values().collect();
    for s in &mut series {
        s.sort_rows();
        s.rows.dedup_by_key(|r| r.date);
    }
    debug!(locations = series.len(), rows_read, "Loaded model inputs.");

    Ok(IngestedInputs {
        series,
        row_errors,
        rows_read,
    })
}

fn parse_input_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    date_col: &str,
) -> Result<(LocationId, String, f64, ModelRow), String> {
    let location_id = parse_location_id(get_required(record, header_map, "location_id")?)?;
    let name = get_required(record, header_map, "location_name")?.to_string();
    let date = parse_date(get_required(record, header_map, date_col)?)?;
    let population = parse_opt_f64(get_optional(record, header_map, "population"))
        .filter(|p| *p > 0.0)
        .ok_or_else(|| "Missing/invalid `population` (must be > 0).".to_string())?;

    let mut row = ModelRow::empty(date);
    for indicator in Indicator::ALL {
        let key = indicator.column_name().to_ascii_lowercase();
        *row.indicator_mut(indicator) = parse_opt_f64(get_optional(record, header_map, &key));
    }
    Ok((location_id, name, population, row))
}

/// Load the location hierarchy (`location_id`, `parent_id`, `location_name`,
/// optional `population`).
pub fn load_hierarchy(path: &Path) -> Result<Hierarchy, PipelineError> {
    let (mut reader, header_map) = open_reader(path)?;
    ensure_columns(path, &header_map, &["location_id", "parent_id", "location_name"])?;

    let mut locations = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| PipelineError::csv(path, e))?;
        let parsed = (|| -> Result<Location, String> {
            Ok(Location {
                id: parse_location_id(get_required(&record, &header_map, "location_id")?)?,
                parent_id: parse_location_id(get_required(&record, &header_map, "parent_id")?)?,
                name: get_required(&record, &header_map, "location_name")?.to_string(),
                population: parse_opt_f64(get_optional(&record, &header_map, "population")),
            })
        })();
        let location = parsed
            .map_err(|message| PipelineError::Config(format!("'{}' line {line}: {message}", path.display())))?;
        locations.push(location);
    }

    Hierarchy::from_locations(locations)
}

/// Load a wide draw table (`location_id`, `date`, `draw_*`).
///
/// Columns are ordered by draw id regardless of their order in the file.
pub fn load_draw_table(path: &Path) -> Result<DrawTable, PipelineError> {
    let (mut reader, header_map) = open_reader(path)?;
    ensure_columns(path, &header_map, &["location_id", "date"])?;

    let mut draw_columns: Vec<(usize, usize)> = header_map
        .iter()
        .filter_map(|(name, &idx)| {
            name.strip_prefix("draw_")
                .and_then(|n| n.parse::<usize>().ok())
                .map(|id| (id, idx))
        })
        .collect();
    draw_columns.sort();
    if draw_columns.is_empty() {
        return Err(PipelineError::Config(format!("'{}' has no draw_* columns", path.display())));
    }

    let mut table = DrawTable::new(draw_columns.iter().map(|(id, _)| *id).collect());
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| PipelineError::csv(path, e))?;
        (|| -> Result<DrawRow, String> {
            Ok(DrawRow {
                location_id: parse_location_id(get_required(&record, &header_map, "location_id")?)?,
                date: parse_date(get_required(&record, &header_map, "date")?)?,
                population: None,
                values: draw_columns
                    .iter()
                    .map(|(_, col)| parse_opt_f64(record.get(*col).map(str::trim).filter(|s| !s.is_empty())))
                    .collect(),
            })
        })()
        .and_then(|row| table.push(row))
        .map_err(|message| PipelineError::Config(format!("'{}' line {line}: {message}", path.display())))?;
    }
    table.sort_rows();
    Ok(table)
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_location_id(s: &str) -> Result<LocationId, String> {
    // Some exports write integer ids as floats (`102.0`).
    let s = s.strip_suffix(".0").unwrap_or(s);
    s.parse::<i64>()
        .map(LocationId)
        .map_err(|_| format!("Invalid location id '{s}'."))
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, String> {
    // ISO dates are expected, but a few common export formats are accepted.
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
    let s = s.split_whitespace().next().unwrap_or(s);
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    Err(format!(
        "Invalid date '{s}'. Expected one of: YYYY-MM-DD, DD/MM/YYYY, DD-MM-YYYY, YYYY/MM/DD."
    ))
}

fn parse_opt_f64(s: Option<&str>) -> Option<f64> {
    let s = s?;
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn model_inputs_group_and_sort() {
        let f = write_tmp(
            "\u{feff}location_id,location_name,Date,Confirmed case rate,Hospitalization rate,Death rate,population\n\
             2,B,2020-04-02,0.1,,0.01,50\n\
             1,A,2020-04-02,0.2,0.05,,100\n\
             1,A,2020-04-01,0.1,,0.001,100\n\
             1,A,not-a-date,0.1,,0.001,100\n",
        );
        let ingested = load_model_inputs(f.path()).unwrap();
        assert_eq!(ingested.rows_read, 4);
        assert_eq!(ingested.row_errors.len(), 1);
        assert_eq!(ingested.row_errors[0].line, 5);

        let a = &ingested.series[0];
        assert_eq!(a.location_id, LocationId(1));
        assert_eq!(a.rows.len(), 2);
        assert!(a.rows[0].date < a.rows[1].date);
        assert_eq!(a.rows[1].hospitalization_rate, Some(0.05));
        assert_eq!(a.rows[1].death_rate, None);
        assert_eq!(ingested.series[1].population, 50.0);
    }

    #[test]
    fn missing_column_is_config_error() {
        let f = write_tmp("location_id,date,population\n1,2020-01-01,3\n");
        let err = load_model_inputs(f.path()).unwrap_err();
        assert!(err.to_string().contains("location_name"));
    }

    #[test]
    fn hierarchy_loads_tree() {
        let f = write_tmp(
            "location_id,parent_id,location_name,population\n\
             1,1,Global,\n\
             10,1,Country,\n\
             11,10,State,1000\n",
        );
        let h = load_hierarchy(f.path()).unwrap();
        assert_eq!(h.leaves(), vec![LocationId(11)]);
        assert_eq!(h.get(LocationId(11)).unwrap().population, Some(1000.0));
    }

    #[test]
    fn draw_table_orders_columns_by_id() {
        let f = write_tmp(
            "location_id,date,draw_1,draw_0\n\
             5,2020-05-02,2,1\n\
             5,2020-05-01,4,\n",
        );
        let t = load_draw_table(f.path()).unwrap();
        assert!(t.has_contiguous_ids(2));
        assert_eq!(t.rows()[0].values, vec![None, Some(4.0)]);
        assert_eq!(t.rows()[1].values, vec![Some(1.0), Some(2.0)]);
    }
}
