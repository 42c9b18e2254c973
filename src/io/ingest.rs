//! Delimited-table ingest and normalization.
//!
//! Turns a delimited text table with named columns into `Observation`s that
//! are safe to fit:
//!
//! - **Strict schema** for the columns the regression uses (exit code 2)
//! - **Row-level validation**: rows with a missing or non-numeric value in any
//!   used column are skipped and reported, the way listwise deletion works in
//!   statistical packages
//! - **Deterministic** unit index: units are kept in ascending order

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use tracing::{debug, warn};

use crate::domain::{ColumnSpec, Observation, UnitId};
use crate::error::AppError;

/// Summary stats about the observations actually kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStats {
    pub n_rows: usize,
    pub n_units: usize,
    pub unit_min: UnitId,
    pub unit_max: UnitId,
}

/// A row-level problem encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Normalized observations grouped by unit.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub columns: ColumnSpec,
    pub observations: Vec<Observation>,
    pub stats: DatasetStats,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    by_unit: BTreeMap<UnitId, Vec<usize>>,
    /// Every unit with a readable unit value, kept or not.
    array_units: Vec<UnitId>,
}

impl Dataset {
    /// Build a dataset from already-normalized observations.
    pub fn from_observations(columns: ColumnSpec, observations: Vec<Observation>) -> Result<Self, AppError> {
        let rows_read = observations.len();
        Self::assemble(columns, observations, Vec::new(), rows_read, BTreeSet::new())
    }

    fn assemble(
        columns: ColumnSpec,
        observations: Vec<Observation>,
        row_errors: Vec<RowError>,
        rows_read: usize,
        mut seen_units: BTreeSet<UnitId>,
    ) -> Result<Self, AppError> {
        let mut by_unit: BTreeMap<UnitId, Vec<usize>> = BTreeMap::new();
        for (idx, obs) in observations.iter().enumerate() {
            by_unit.entry(obs.unit).or_default().push(idx);
            seen_units.insert(obs.unit);
        }

        let (Some(&unit_min), Some(&unit_max)) = (by_unit.keys().next(), by_unit.keys().next_back()) else {
            return Err(AppError::no_data("No valid rows remain after normalization."));
        };

        let stats = DatasetStats {
            n_rows: observations.len(),
            n_units: by_unit.len(),
            unit_min,
            unit_max,
        };

        Ok(Self {
            columns,
            observations,
            stats,
            row_errors,
            rows_read,
            by_unit,
            array_units: seen_units.into_iter().collect(),
        })
    }

    /// All units present, ascending.
    pub fn units(&self) -> Vec<UnitId> {
        self.by_unit.keys().copied().collect()
    }

    /// Units addressed by array indices, ascending.
    ///
    /// Depends only on the unit column, so a unit whose rows were all skipped
    /// keeps its index (and then fails with no data).
    pub fn array_units(&self) -> &[UnitId] {
        &self.array_units
    }

    pub fn has_unit(&self, unit: UnitId) -> bool {
        self.by_unit.contains_key(&unit)
    }

    /// Observations belonging to one unit, in file order.
    pub fn unit_rows(&self, unit: UnitId) -> impl Iterator<Item = &Observation> + '_ {
        self.by_unit
            .get(&unit)
            .into_iter()
            .flatten()
            .map(|&idx| &self.observations[idx])
    }

    pub fn rows_used(&self) -> usize {
        self.observations.len()
    }
}

/// Load a delimited file into a `Dataset`.
pub fn load_dataset(path: &Path, columns: &ColumnSpec, delimiter: u8) -> Result<Dataset, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::usage(format!("Failed to open data file '{}': {e}", path.display())))?;
    let dataset = read_dataset(file, columns, delimiter)?;

    debug!(
        path = %path.display(),
        rows_read = dataset.rows_read,
        rows_used = dataset.rows_used(),
        units = dataset.stats.n_units,
        "loaded dataset"
    );
    Ok(dataset)
}

/// Read a delimited table from any reader.
pub fn read_dataset<R: Read>(input: R, columns: &ColumnSpec, delimiter: u8) -> Result<Dataset, AppError> {
    let columns = normalize_columns(columns)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| AppError::usage(format!("Failed to read header row: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    let layout = ColumnLayout::resolve(&columns, &header_map)?;

    let mut observations = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut seen_units = BTreeSet::new();

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        rows_read += 1;

        let parsed = result.map_err(|e| format!("parse error: {e}")).and_then(|record| {
            if let Some(unit) = field(&record, &layout.unit).ok().and_then(parse_unit) {
                seen_units.insert(unit);
            }
            layout.parse(&record)
        });

        match parsed {
            Ok(obs) => observations.push(obs),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        warn!(
            skipped = row_errors.len(),
            rows_read,
            first_line = row_errors[0].line,
            first_error = %row_errors[0].message,
            "skipped rows with missing or invalid values"
        );
    }

    Dataset::assemble(columns, observations, row_errors, rows_read, seen_units)
}

/// Scan only the unit column: the ascending units array indices address.
pub fn load_units(path: &Path, unit_col: &str, delimiter: u8) -> Result<Vec<UnitId>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::usage(format!("Failed to open data file '{}': {e}", path.display())))?;
    read_units(file, unit_col, delimiter)
}

pub fn read_units<R: Read>(input: R, unit_col: &str, delimiter: u8) -> Result<Vec<UnitId>, AppError> {
    let name = normalize_header_name(unit_col);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| AppError::usage(format!("Failed to read header row: {e}")))?
        .clone();
    let idx = *build_header_map(&headers)
        .get(&name)
        .ok_or_else(|| AppError::usage(format!("Missing required column: `{name}`")))?;
    let col = (name, idx);

    let mut units = BTreeSet::new();
    for record in reader.records().flatten() {
        if let Some(unit) = field(&record, &col).ok().and_then(parse_unit) {
            units.insert(unit);
        }
    }
    if units.is_empty() {
        return Err(AppError::no_data(format!("No readable values in unit column `{}`.", col.0)));
    }
    Ok(units.into_iter().collect())
}

/// Column positions for the fields the regression uses.
struct ColumnLayout {
    unit: (String, usize),
    response: (String, usize),
    regressors: Vec<(String, usize)>,
    factors: Vec<(String, usize)>,
}

impl ColumnLayout {
    fn resolve(columns: &ColumnSpec, header_map: &HashMap<String, usize>) -> Result<Self, AppError> {
        let lookup = |name: &String| -> Result<(String, usize), AppError> {
            header_map
                .get(name)
                .map(|&idx| (name.clone(), idx))
                .ok_or_else(|| AppError::usage(format!("Missing required column: `{name}`")))
        };

        let regressors = std::iter::once(&columns.predictor)
            .chain(columns.controls.iter())
            .map(lookup)
            .collect::<Result<Vec<_>, _>>()?;
        let factors = columns.factors.iter().map(lookup).collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            unit: lookup(&columns.unit)?,
            response: lookup(&columns.response)?,
            regressors,
            factors,
        })
    }

    fn parse(&self, record: &StringRecord) -> Result<Observation, String> {
        let unit = parse_unit(field(record, &self.unit)?)
            .ok_or_else(|| format!("`{}` is not an integer", self.unit.0))?;
        let response = parse_number(record, &self.response)?;
        let regressors = self
            .regressors
            .iter()
            .map(|col| parse_number(record, col))
            .collect::<Result<Vec<_>, _>>()?;
        let levels = self
            .factors
            .iter()
            .map(|col| field(record, col).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Observation {
            unit,
            response,
            regressors,
            levels,
        })
    }
}

fn normalize_columns(columns: &ColumnSpec) -> Result<ColumnSpec, AppError> {
    let norm = |s: &String| normalize_header_name(s);
    let out = ColumnSpec {
        unit: norm(&columns.unit),
        response: norm(&columns.response),
        predictor: norm(&columns.predictor),
        controls: columns.controls.iter().map(norm).collect(),
        factors: columns.factors.iter().map(norm).collect(),
    };

    let mut seen = HashSet::new();
    let all = [&out.unit, &out.response, &out.predictor]
        .into_iter()
        .chain(out.controls.iter())
        .chain(out.factors.iter());
    for name in all {
        if name.is_empty() {
            return Err(AppError::usage("Column names must not be empty."));
        }
        if !seen.insert(name.as_str()) {
            return Err(AppError::usage(format!(
                "Column `{name}` is used more than once in the model."
            )));
        }
    }

    Ok(out)
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn field<'a>(record: &'a StringRecord, (name, idx): &(String, usize)) -> Result<&'a str, String> {
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !is_missing_marker(s))
        .ok_or_else(|| format!("missing value for `{name}`"))
}

fn is_missing_marker(s: &str) -> bool {
    matches!(s, "NA" | "na" | "NaN" | "nan" | "NULL" | "null" | ".")
}

fn parse_number(record: &StringRecord, col: &(String, usize)) -> Result<f64, String> {
    let raw = field(record, col)?;
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("`{}` is not a finite number: '{raw}'", col.0))
}

fn parse_unit(s: &str) -> Option<UnitId> {
    if let Ok(v) = s.parse::<UnitId>() {
        return Some(v);
    }
    // Some exports write integer years as `1990.0`.
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        Some(v as UnitId)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> ColumnSpec {
        ColumnSpec {
            unit: "year".to_string(),
            response: "y".to_string(),
            predictor: "x".to_string(),
            controls: vec![],
            factors: vec![],
        }
    }

    #[test]
    fn reads_and_groups_by_unit() {
        let csv = "year,x,y\n2001,1,2\n2000,2,3\n2001,3,4\n";
        let ds = read_dataset(csv.as_bytes(), &columns(), b',').unwrap();

        assert_eq!(ds.units(), vec![2000, 2001]);
        assert_eq!(ds.unit_rows(2001).count(), 2);
        assert_eq!(ds.stats.unit_min, 2000);
        assert_eq!(ds.stats.unit_max, 2001);
        assert!(ds.row_errors.is_empty());
    }

    #[test]
    fn header_match_ignores_case_and_bom() {
        let csv = "\u{feff}Year;X;Y\n1999;1.5;2\n";
        let ds = read_dataset(csv.as_bytes(), &columns(), b';').unwrap();
        assert_eq!(ds.rows_used(), 1);
        assert_eq!(ds.observations[0].regressors, vec![1.5]);
    }

    #[test]
    fn skips_rows_with_missing_values() {
        let csv = "year,x,y\n2000,1,NA\n2000,,3\n2000,abc,3\n2000,1,2\n1990.0,1,1\n";
        let ds = read_dataset(csv.as_bytes(), &columns(), b',').unwrap();

        assert_eq!(ds.rows_read, 5);
        assert_eq!(ds.rows_used(), 2);
        assert_eq!(ds.row_errors.len(), 3);
        assert_eq!(ds.row_errors[0].line, 2);
        assert!(ds.has_unit(1990));
    }

    #[test]
    fn missing_column_is_a_usage_error() {
        let csv = "year,x\n2000,1\n";
        let err = read_dataset(csv.as_bytes(), &columns(), b',').unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("`y`"));
    }

    #[test]
    fn reused_column_is_rejected() {
        let mut cols = columns();
        cols.controls.push("X".to_string());
        let err = read_dataset("year,x,y\n".as_bytes(), &cols, b',').unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn no_usable_rows_is_no_data() {
        let csv = "year,x,y\n2000,NA,1\n";
        let err = read_dataset(csv.as_bytes(), &columns(), b',').unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn factors_are_kept_as_levels() {
        let mut cols = columns();
        cols.factors.push("carrier".to_string());
        let csv = "year,x,y,carrier\n2000,1,2,AA\n2000,2,3,\n";
        let ds = read_dataset(csv.as_bytes(), &cols, b',').unwrap();
        assert_eq!(ds.rows_used(), 1);
        assert_eq!(ds.observations[0].levels, vec!["AA".to_string()]);
    }

    #[test]
    fn array_units_include_units_without_usable_rows() {
        let csv = "year,x,y\n2002,1,2\n2001,NA,1\n2003,1,3\n";
        let ds = read_dataset(csv.as_bytes(), &columns(), b',').unwrap();
        assert_eq!(ds.units(), vec![2002, 2003]);
        assert_eq!(ds.array_units(), &[2001, 2002, 2003]);

        let units = read_units(csv.as_bytes(), "YEAR", b',').unwrap();
        assert_eq!(units, ds.array_units());
        assert_eq!(read_units("year\n".as_bytes(), "year", b',').unwrap_err().exit_code(), 3);
        assert_eq!(read_units(csv.as_bytes(), "unit", b',').unwrap_err().exit_code(), 2);
    }
}
