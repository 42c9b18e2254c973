//! Execution patterns over independent units.
//!
//! - `run_sequential`: one loop, ascending units.
//! - `run_parallel`: a rayon pool; the calling thread blocks until every unit
//!   has returned, and results are gathered into one `Vec`.
//! - `select_unit`: the job-array pattern's mapping from a scheduler index to
//!   a unit. Each array element then calls `fit_unit` once.
//!
//! In both in-process patterns a single failing unit fails the whole batch.
//! The array pattern isolates failures per element instead.

use std::time::Instant;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::domain::{ExecMode, RegressionSpec, UnitId, UnitResult, UnitSelector};
use crate::error::AppError;
use crate::fit::unit::{fit_unit, validate_level};
use crate::io::ingest::Dataset;

/// Run `units` with the chosen execution mode. Output is sorted by unit.
pub fn run_units(
    dataset: &Dataset,
    units: &[UnitId],
    spec: &RegressionSpec,
    mode: ExecMode,
    threads: usize,
) -> Result<Vec<UnitResult>, AppError> {
    match mode {
        ExecMode::Sequential => run_sequential(dataset, units, spec),
        ExecMode::Parallel => run_parallel(dataset, units, spec, threads),
    }
}

/// Fit every unit in ascending order on the current thread.
#[instrument(skip_all, fields(units = units.len()))]
pub fn run_sequential(dataset: &Dataset, units: &[UnitId], spec: &RegressionSpec) -> Result<Vec<UnitResult>, AppError> {
    validate_level(spec.level)?;

    let mut ordered = units.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    let mut results = Vec::with_capacity(ordered.len());
    for unit in ordered {
        results.push(timed_fit(dataset, unit, spec)?);
    }
    Ok(results)
}

/// Fit every unit on a worker pool of `threads` threads (0 = one per core).
#[instrument(skip_all, fields(units = units.len(), threads = threads))]
pub fn run_parallel(
    dataset: &Dataset,
    units: &[UnitId],
    spec: &RegressionSpec,
    threads: usize,
) -> Result<Vec<UnitResult>, AppError> {
    validate_level(spec.level)?;

    let mut distinct = units.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("yearfit-worker-{i}"))
        .build()
        .map_err(|e| AppError::usage(format!("Failed to start worker pool: {e}")))?;
    info!(workers = pool.current_num_threads(), "dispatching units to worker pool");

    let mut results: Vec<UnitResult> = pool.install(|| {
        distinct
            .par_iter()
            .map(|&unit| timed_fit(dataset, unit, spec))
            .collect::<Result<Vec<_>, AppError>>()
    })?;

    // Gathered order is an implementation detail of the pool.
    results.sort_by_key(|r| r.unit);
    Ok(results)
}

fn timed_fit(dataset: &Dataset, unit: UnitId, spec: &RegressionSpec) -> Result<UnitResult, AppError> {
    let started = Instant::now();
    let result = fit_unit(dataset, unit, spec);
    debug!(
        unit,
        ok = result.is_ok(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
        "unit finished"
    );
    result
}

/// Resolve a job-array selector against the dataset's ascending unit list.
pub fn select_unit(units: &[UnitId], selector: UnitSelector) -> Result<UnitId, AppError> {
    match selector {
        UnitSelector::Unit(unit) => {
            if units.binary_search(&unit).is_ok() {
                Ok(unit)
            } else {
                Err(AppError::no_data(format!("Unit {unit} does not occur in the dataset.")))
            }
        }
        UnitSelector::Index { index, base } => {
            let pos = index
                .checked_sub(base)
                .and_then(|p| usize::try_from(p).ok())
                .filter(|&p| p < units.len())
                .ok_or_else(|| {
                    let last = base + units.len() as i64 - 1;
                    AppError::usage(format!(
                        "Array index {index} is outside {base}..={last} ({} units).",
                        units.len()
                    ))
                })?;
            Ok(units[pos])
        }
    }
}

/// Array index of each unit, as `yearfit unit --index` expects it.
pub fn unit_indices(units: &[UnitId], base: i64) -> Vec<(i64, UnitId)> {
    units
        .iter()
        .enumerate()
        .map(|(pos, &unit)| (base + pos as i64, unit))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColumnSpec, Observation};

    fn spec() -> RegressionSpec {
        RegressionSpec {
            columns: ColumnSpec {
                unit: "year".to_string(),
                response: "y".to_string(),
                predictor: "x".to_string(),
                controls: vec!["z".to_string()],
                factors: vec![],
            },
            level: 0.9,
        }
    }

    fn dataset(years: std::ops::RangeInclusive<UnitId>) -> Dataset {
        let mut rows = Vec::new();
        for year in years {
            let slope = (year - 1990) as f64 * 0.1;
            for i in 0..12 {
                let x = i as f64;
                let z = ((i * 7) % 5) as f64;
                let noise = ((i * 13 + year as usize) % 3) as f64 * 0.01;
                rows.push(Observation {
                    unit: year,
                    response: 2.0 + slope * x - 0.5 * z + noise,
                    regressors: vec![x, z],
                    levels: vec![],
                });
            }
        }
        Dataset::from_observations(spec().columns, rows).unwrap()
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let ds = dataset(1990..=2009);
        let units = ds.units();

        let seq = run_sequential(&ds, &units, &spec()).unwrap();
        let par = run_parallel(&ds, &units, &spec(), 4).unwrap();

        assert_eq!(seq.len(), units.len());
        assert_eq!(seq, par);
        assert!(seq.windows(2).all(|w| w[0].unit < w[1].unit));
    }

    #[test]
    fn duplicate_units_yield_one_row_each() {
        let ds = dataset(2000..=2002);
        let units = [2002, 2000, 2002, 2001, 2000];
        let res = run_parallel(&ds, &units, &spec(), 2).unwrap();
        let got: Vec<UnitId> = res.iter().map(|r| r.unit).collect();
        assert_eq!(got, vec![2000, 2001, 2002]);
    }

    #[test]
    fn one_failing_unit_fails_the_batch() {
        let ds = dataset(2000..=2003);
        let units = [2000, 2001, 1800, 2003];
        assert!(run_parallel(&ds, &units, &spec(), 2).is_err());
        assert!(run_sequential(&ds, &units, &spec()).is_err());
    }

    #[test]
    fn select_by_index_and_unit() {
        let units = vec![1987, 1988, 1990];
        assert_eq!(select_unit(&units, UnitSelector::Index { index: 1, base: 1 }).unwrap(), 1987);
        assert_eq!(select_unit(&units, UnitSelector::Index { index: 3, base: 1 }).unwrap(), 1990);
        assert_eq!(select_unit(&units, UnitSelector::Index { index: 0, base: 0 }).unwrap(), 1987);
        assert_eq!(select_unit(&units, UnitSelector::Unit(1988)).unwrap(), 1988);

        assert_eq!(select_unit(&units, UnitSelector::Index { index: 0, base: 1 }).unwrap_err().exit_code(), 2);
        assert_eq!(select_unit(&units, UnitSelector::Index { index: 4, base: 1 }).unwrap_err().exit_code(), 2);
        assert_eq!(select_unit(&units, UnitSelector::Unit(1989)).unwrap_err().exit_code(), 3);
    }

    #[test]
    fn indices_follow_unit_order() {
        assert_eq!(unit_indices(&[5, 9], 1), vec![(1, 5), (2, 9)]);
    }
}
