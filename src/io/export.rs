//! Result tables: full CSV export, job-array appends, and JSON run summaries.
//!
//! Every results file shares one row format, `unit,lower,estimate,upper`, with
//! floats printed in shortest round-trip form so `collect` reads back exactly
//! what a unit computed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::Path;

use chrono::{DateTime, Utc};
use nix::fcntl::{FlockArg, flock};
use serde::Serialize;
use tracing::debug;

use crate::domain::{ExecMode, RegressionSpec, UnitResult};
use crate::error::AppError;

pub const RESULTS_HEADER: &str = "unit,lower,estimate,upper";

/// Format one results-table row (no trailing newline).
pub fn format_result_row(r: &UnitResult) -> String {
    format!("{},{},{},{}", r.unit, r.lower, r.estimate, r.upper)
}

/// Write a complete results table with header, replacing any existing file.
pub fn write_results_csv(path: &Path, results: &[UnitResult]) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::usage(format!("Failed to create results CSV '{}': {e}", path.display())))?;

    let mut out = String::with_capacity(32 * (results.len() + 1));
    out.push_str(RESULTS_HEADER);
    out.push('\n');
    for r in results {
        out.push_str(&format_result_row(r));
        out.push('\n');
    }

    file.write_all(out.as_bytes())
        .map_err(|e| AppError::usage(format!("Failed to write results CSV '{}': {e}", path.display())))?;
    Ok(())
}

/// Append one header-less row to a file shared by concurrent array elements.
///
/// The row goes out in a single `write_all` while holding an exclusive
/// `flock`, so rows from different processes never interleave even on
/// filesystems where `O_APPEND` alone is not atomic.
pub fn append_result_row(path: &Path, result: &UnitResult) -> Result<(), AppError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::usage(format!("Failed to open output '{}': {e}", path.display())))?;

    flock(file.as_raw_fd(), FlockArg::LockExclusive)
        .map_err(|e| AppError::usage(format!("Failed to lock output '{}': {e}", path.display())))?;

    let mut line = format_result_row(result);
    line.push('\n');
    let written = file.write_all(line.as_bytes()).and_then(|()| file.flush());

    // Closing the descriptor releases the lock as well; unlock explicitly so a
    // failed write does not hold it until drop.
    let _ = flock(file.as_raw_fd(), FlockArg::Unlock);

    written.map_err(|e| AppError::usage(format!("Failed to append to '{}': {e}", path.display())))?;
    debug!(path = %path.display(), unit = result.unit, "appended result row");
    Ok(())
}

/// JSON summary of one in-process run.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub tool: &'static str,
    pub generated_at: DateTime<Utc>,
    pub data: String,
    pub mode: ExecMode,
    pub threads: usize,
    pub spec: &'a RegressionSpec,
    pub rows_read: usize,
    pub rows_used: usize,
    pub rows_skipped: usize,
    pub elapsed_secs: f64,
    pub results: &'a [UnitResult],
}

pub fn write_results_json(path: &Path, summary: &RunSummary<'_>) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::usage(format!("Failed to create JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, summary)
        .map_err(|e| AppError::usage(format!("Failed to write JSON '{}': {e}", path.display())))?;
    Ok(())
}
