//! Read back result rows written by independent array elements.
//!
//! Accepts header-less append files as well as full tables written by
//! `yearfit run --export`. A unit that appears more than once (an element that
//! was re-submitted after a partial failure) keeps its last row.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::{UnitId, UnitResult};
use crate::error::AppError;
use crate::io::ingest::RowError;

/// Concatenated rows from one or more result files.
#[derive(Debug, Clone, Default)]
pub struct CollectedResults {
    /// One row per unit, ascending.
    pub results: Vec<UnitResult>,
    pub row_errors: Vec<(PathBuf, RowError)>,
    /// Rows that replaced an earlier row for the same unit.
    pub duplicates: usize,
    pub files: usize,
}

impl CollectedResults {
    /// Units from `expected` without a row, ascending.
    pub fn missing_units(&self, expected: &[UnitId]) -> Vec<UnitId> {
        let mut missing: Vec<UnitId> = expected
            .iter()
            .copied()
            .filter(|u| self.results.binary_search_by_key(u, |r| r.unit).is_err())
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }
}

/// Read and merge result files in the given order.
pub fn read_result_files(paths: &[PathBuf]) -> Result<CollectedResults, AppError> {
    let mut merged: BTreeMap<UnitId, UnitResult> = BTreeMap::new();
    let mut row_errors = Vec::new();
    let mut duplicates = 0usize;

    for path in paths {
        let file = File::open(path)
            .map_err(|e| AppError::usage(format!("Failed to open results '{}': {e}", path.display())))?;
        let (rows, errors) = read_result_rows(file)
            .map_err(|e| e.context(format!("results '{}'", path.display())))?;
        debug!(path = %path.display(), rows = rows.len(), errors = errors.len(), "read result file");

        for row in rows {
            if merged.insert(row.unit, row).is_some() {
                duplicates += 1;
            }
        }
        row_errors.extend(errors.into_iter().map(|e| (path.clone(), e)));
    }

    if duplicates > 0 {
        warn!(duplicates, "units reported more than once; keeping the last row");
    }

    Ok(CollectedResults {
        results: merged.into_values().collect(),
        row_errors,
        duplicates,
        files: paths.len(),
    })
}

/// Parse result rows from a reader, in file order.
///
/// A leading `unit,...` header line is skipped wherever it appears, so
/// concatenated exports are accepted too.
pub fn read_result_rows<R: Read>(input: R) -> Result<(Vec<UnitResult>, Vec<RowError>), AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(input);

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (idx, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map_or(idx + 1, |p| p.line() as usize);
                errors.push(RowError {
                    line,
                    message: format!("parse error: {e}"),
                });
                continue;
            }
        };
        // Blank lines are skipped by the reader, so prefer its physical line number.
        let line = record.position().map_or(idx + 1, |p| p.line() as usize);

        let first = record.get(0).unwrap_or_default();
        if first.eq_ignore_ascii_case("unit") {
            continue;
        }
        if record.len() == 1 && first.is_empty() {
            continue;
        }

        match parse_row(&record) {
            Ok(row) => rows.push(row),
            Err(message) => errors.push(RowError { line, message }),
        }
    }

    Ok((rows, errors))
}

fn parse_row(record: &csv::StringRecord) -> Result<UnitResult, String> {
    if record.len() != 4 {
        return Err(format!("expected 4 fields, found {}", record.len()));
    }
    let unit = record[0]
        .parse::<UnitId>()
        .map_err(|_| format!("invalid unit '{}'", &record[0]))?;
    let num = |i: usize| -> Result<f64, String> {
        record[i]
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("invalid number '{}'", &record[i]))
    };
    let row = UnitResult::row(unit, num(1)?, num(2)?, num(3)?);
    if !(row.lower <= row.estimate && row.estimate <= row.upper) {
        return Err(format!("unit {unit}: interval does not contain the estimate"));
    }
    Ok(row)
}

/// Expand directory arguments into the result files they contain.
///
/// Files named explicitly are kept as given; directory entries are sorted by
/// name so the merge order (and the surviving duplicate) is reproducible.
pub fn expand_result_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, AppError> {
    let mut out = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            out.push(input.clone());
            continue;
        }
        let entries = std::fs::read_dir(input)
            .map_err(|e| AppError::usage(format!("Failed to list '{}': {e}", input.display())))?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_results_file(p))
            .collect();
        found.sort();
        if found.is_empty() {
            warn!(dir = %input.display(), "no result files in directory");
        }
        out.extend(found);
    }
    if out.is_empty() {
        return Err(AppError::usage("No result files to collect."));
    }
    Ok(out)
}

/// Best-effort check that a path looks like something `read_result_files` can use.
pub fn is_results_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("txt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headerless_and_headed_rows() {
        let text = "unit,lower,estimate,upper\n1988,0.1,0.2,0.3\n\n1987,-1,0,1\n";
        let (rows, errors) = read_result_rows(text.as_bytes()).unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(rows.iter().map(|r| r.unit).collect::<Vec<_>>(), vec![1988, 1987]);
        assert_eq!(rows[0], UnitResult::row(1988, 0.1, 0.2, 0.3));
    }

    #[test]
    fn malformed_lines_become_row_errors() {
        let text = "1988,0.1,0.2\nabc,1,2,3\n1989,0,1,nan\n1990,2,1,3\n1991,0,1,2\n";
        let (rows, errors) = read_result_rows(text.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(errors.iter().map(|e| e.line).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn merges_files_and_keeps_last_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        std::fs::write(&a, "2001,0,1,2\n2000,0,1,2\n").unwrap();
        std::fs::write(&b, "2001,5,6,7\n2003,0,1,2\n").unwrap();

        let collected = read_result_files(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(collected.results.iter().map(|r| r.unit).collect::<Vec<_>>(), vec![2000, 2001, 2003]);
        assert_eq!(collected.results[1].estimate, 6.0);
        assert_eq!(collected.duplicates, 1);
        assert_eq!(collected.missing_units(&[2000, 2001, 2002, 2003, 2004]), vec![2002, 2004]);

        assert!(is_results_file(&a));
        assert!(!is_results_file(dir.path()));
    }

    #[test]
    fn directories_expand_to_sorted_result_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.csv", "a.txt", "notes.md"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let extra = PathBuf::from("explicit.out");
        let paths = expand_result_paths(&[dir.path().to_path_buf(), extra.clone()]).unwrap();
        assert_eq!(paths, vec![dir.path().join("a.txt"), dir.path().join("b.csv"), extra]);

        let empty = tempfile::tempdir().unwrap();
        assert!(expand_result_paths(&[empty.path().to_path_buf()]).is_err());
    }

    #[test]
    fn missing_file_is_a_usage_error() {
        let err = read_result_files(&[PathBuf::from("/nonexistent/yearfit.csv")]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
