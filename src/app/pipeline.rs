//! Shared workflow behind `yearfit run` and `yearfit unit`.
//!
//! load dataset -> choose units -> fit (loop, pool, or one unit) -> results
//!
//! Printing and exports stay in `app`.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::domain::{ExecMode, RunConfig, UnitConfig, UnitId, UnitResult, UnitSelector};
use crate::error::AppError;
use crate::fit::{fit_unit, run_units, select_unit, validate_level};
use crate::io::export::append_result_row;
use crate::io::ingest::{Dataset, load_dataset};

/// Outputs of one in-process run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub dataset: Dataset,
    /// One row per unit, ascending.
    pub results: Vec<UnitResult>,
    /// Workers that shared the units (1 for sequential runs).
    pub workers: usize,
    /// Time spent fitting, excluding the load.
    pub elapsed: Duration,
}

/// Outputs of one job-array element.
#[derive(Debug, Clone)]
pub struct UnitOutput {
    pub result: UnitResult,
    pub elapsed: Duration,
}

/// Load the dataset and fit every requested unit.
pub fn run_pipeline(config: &RunConfig) -> Result<RunOutput, AppError> {
    validate_level(config.spec.level)?;
    let dataset = load_dataset(&config.data_path, &config.spec.columns, config.delimiter)?;
    report_row_errors(&dataset, &config.data_path);

    let units = requested_units(&dataset, &config.only_units)?;
    let workers = match config.mode {
        ExecMode::Sequential => 1,
        ExecMode::Parallel if config.threads == 0 => rayon::current_num_threads(),
        ExecMode::Parallel => config.threads,
    };

    info!(units = units.len(), mode = config.mode.display_name(), workers, "fitting units");
    let started = Instant::now();
    let results = run_units(&dataset, &units, &config.spec, config.mode, config.threads)?;
    let elapsed = started.elapsed();
    info!(elapsed_s = elapsed.as_secs_f64(), "all units finished");

    Ok(RunOutput {
        dataset,
        results,
        workers,
        elapsed,
    })
}

/// Fit the single unit chosen by `config.selector` and append its row.
///
/// Nothing is written when the fit fails, so `collect` reports the unit as
/// missing.
pub fn run_unit(config: &UnitConfig) -> Result<UnitOutput, AppError> {
    validate_level(config.spec.level)?;
    let dataset = load_dataset(&config.data_path, &config.spec.columns, config.delimiter)?;
    report_row_errors(&dataset, &config.data_path);

    let unit = select_unit(dataset.array_units(), config.selector)?;
    if let UnitSelector::Index { index, .. } = config.selector {
        info!(index, unit, "array index resolved");
    }

    let started = Instant::now();
    let result = fit_unit(&dataset, unit, &config.spec)?;
    let elapsed = started.elapsed();

    if let Some(path) = &config.output {
        append_result_row(path, &result)?;
    }

    Ok(UnitOutput { result, elapsed })
}

fn requested_units(dataset: &Dataset, only: &[UnitId]) -> Result<Vec<UnitId>, AppError> {
    let known = dataset.array_units();
    if only.is_empty() {
        return Ok(known.to_vec());
    }
    let unknown: Vec<String> = only
        .iter()
        .filter(|u| known.binary_search(u).is_err())
        .map(|u| u.to_string())
        .collect();
    if !unknown.is_empty() {
        return Err(AppError::no_data(format!(
            "Requested unit(s) not in the dataset: {}.",
            unknown.join(", ")
        )));
    }
    let mut units = only.to_vec();
    units.sort_unstable();
    units.dedup();
    Ok(units)
}

fn report_row_errors(dataset: &Dataset, path: &Path) {
    if dataset.row_errors.is_empty() {
        return;
    }
    warn!(
        path = %path.display(),
        skipped = dataset.row_errors.len(),
        rows_read = dataset.rows_read,
        "rows skipped during ingest"
    );
}
