//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

use std::time::Duration;

use crate::domain::{ExecMode, RegressionSpec, UnitId, UnitResult};
use crate::io::collect::CollectedResults;
use crate::io::ingest::Dataset;

/// Format the header block of an in-process run.
pub fn format_run_summary(
    dataset: &Dataset,
    spec: &RegressionSpec,
    mode: ExecMode,
    workers: usize,
    elapsed: Duration,
) -> String {
    let mut out = String::new();
    let cols = &spec.columns;

    out.push_str("=== yearfit ===\n");
    out.push_str(&format!("Model: {} ~ {}", cols.response, cols.predictor));
    for c in &cols.controls {
        out.push_str(&format!(" + {c}"));
    }
    for f in &cols.factors {
        out.push_str(&format!(" + factor({f})"));
    }
    out.push_str(&format!("  | unit = {}\n", cols.unit));

    out.push_str(&format!(
        "Rows: read={} used={} skipped={}\n",
        dataset.rows_read,
        dataset.rows_used(),
        dataset.row_errors.len()
    ));
    out.push_str(&format!(
        "Units: n={} [{}..{}]\n",
        dataset.stats.n_units, dataset.stats.unit_min, dataset.stats.unit_max
    ));
    match mode {
        ExecMode::Sequential => out.push_str("Mode: sequential"),
        ExecMode::Parallel => out.push_str(&format!("Mode: parallel ({workers} workers)")),
    }
    out.push_str(&format!(" | elapsed {:.3}s\n", elapsed.as_secs_f64()));
    out.push_str(&format!("Interval: {:.1}% t-based\n\n", spec.level * 100.0));

    out
}

/// Format the results table.
pub fn format_results_table(results: &[UnitResult]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>8} {:>12} {:>12} {:>12} {:>10} {:>6}\n",
        "unit", "lower", "estimate", "upper", "se", "n"
    ));
    out.push_str(&format!(
        "{:-<8} {:-<12} {:-<12} {:-<12} {:-<10} {:-<6}\n",
        "", "", "", "", "", ""
    ));

    for r in results {
        let se = r.std_error.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".to_string());
        let n = r.n_obs.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
        out.push_str(
            format!(
                "{:>8} {:>12.5} {:>12.5} {:>12.5} {:>10} {:>6}\n",
                r.unit, r.lower, r.estimate, r.upper, se, n
            )
            .as_str(),
        );
    }

    out
}

/// Format the aggregation report.
///
/// `missing` pairs each absent unit with its array index when known.
pub fn format_collect_summary(collected: &CollectedResults, missing: &[(Option<i64>, UnitId)]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Collected {} unit(s) from {} file(s)",
        collected.results.len(),
        collected.files
    ));
    if collected.duplicates > 0 {
        out.push_str(&format!(", {} duplicate row(s) replaced", collected.duplicates));
    }
    if !collected.row_errors.is_empty() {
        out.push_str(&format!(", {} malformed line(s) skipped", collected.row_errors.len()));
    }
    out.push('\n');

    for (path, err) in collected.row_errors.iter().take(10) {
        out.push_str(&format!("  {}:{}: {}\n", path.display(), err.line, err.message));
    }

    if !missing.is_empty() {
        let units: Vec<String> = missing.iter().map(|(_, u)| u.to_string()).collect();
        out.push_str(&format!("Missing {} unit(s): {}\n", missing.len(), units.join(", ")));
    }

    out
}

/// Format the array index of each unit, one `index<TAB>unit` per line.
pub fn format_unit_indices(indices: &[(i64, UnitId)]) -> String {
    let mut out = String::from("index\tunit\n");
    for (index, unit) in indices {
        out.push_str(&format!("{index}\t{unit}\n"));
    }
    out
}
