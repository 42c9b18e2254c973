//! The per-unit analysis step.
//!
//! Given the dataset and one unit identifier:
//! - subset the observations to that unit
//! - build the design matrix `[1, predictor, controls..., factor dummies...]`
//! - solve OLS
//! - report the predictor coefficient with its two-sided t interval
//!
//! The function is pure: the same dataset and unit always give the same row,
//! regardless of which process or thread evaluates it.

use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector};

use crate::domain::{Observation, RegressionSpec, UnitId, UnitResult};
use crate::error::AppError;
use crate::io::ingest::Dataset;
use crate::math::{OlsError, solve_ols, t_critical};

/// Column index of the predictor in the design matrix (after the intercept).
const PREDICTOR_COL: usize = 1;

/// Fit the regression for one unit and summarize the predictor coefficient.
pub fn fit_unit(dataset: &Dataset, unit: UnitId, spec: &RegressionSpec) -> Result<UnitResult, AppError> {
    validate_level(spec.level)?;
    if !dataset.has_unit(unit) {
        let message = if dataset.array_units().binary_search(&unit).is_ok() {
            format!("Unit {unit} has no usable rows; every row was skipped during ingest.")
        } else {
            format!("Unit {unit} does not occur in the dataset.")
        };
        return Err(AppError::no_data(message));
    }

    let rows: Vec<&Observation> = dataset.unit_rows(unit).collect();
    let (x, y) = build_design(&rows);

    let fit = solve_ols(&x, &y).map_err(|e| {
        let msg = format!("Unit {unit}: {e}");
        match e {
            OlsError::TooFewObservations { .. } => AppError::no_data(msg),
            OlsError::Singular | OlsError::NonFinite => AppError::numeric(msg),
        }
    })?;

    let estimate = fit.coefficients[PREDICTOR_COL];
    let std_error = fit.std_errors[PREDICTOR_COL];
    let t = t_critical(spec.level, fit.df);
    if !t.is_finite() {
        return Err(AppError::numeric(format!("Unit {unit}: no critical value for df={}", fit.df)));
    }

    Ok(UnitResult {
        unit,
        lower: estimate - t * std_error,
        estimate,
        upper: estimate + t * std_error,
        std_error: Some(std_error),
        n_obs: Some(fit.n),
        df: Some(fit.df),
    })
}

pub fn validate_level(level: f64) -> Result<(), AppError> {
    if level > 0.0 && level < 1.0 {
        Ok(())
    } else {
        Err(AppError::usage(format!("Confidence level must be in (0, 1), got {level}.")))
    }
}

/// Build `X` and `y` for one unit's rows.
///
/// Factor levels are collected from these rows only; the lexicographically
/// first level is the reference category and gets no column.
fn build_design(rows: &[&Observation]) -> (DMatrix<f64>, DVector<f64>) {
    let n = rows.len();
    let n_regressors = rows.first().map_or(0, |r| r.regressors.len());
    let n_factors = rows.first().map_or(0, |r| r.levels.len());

    let dummy_levels: Vec<Vec<&str>> = (0..n_factors)
        .map(|f| {
            let levels: BTreeSet<&str> = rows.iter().map(|r| r.levels[f].as_str()).collect();
            levels.into_iter().skip(1).collect()
        })
        .collect();

    let p = 1 + n_regressors + dummy_levels.iter().map(Vec::len).sum::<usize>();
    let mut x = DMatrix::zeros(n, p);

    for (i, row) in rows.iter().enumerate() {
        x[(i, 0)] = 1.0;
        for (j, v) in row.regressors.iter().enumerate() {
            x[(i, 1 + j)] = *v;
        }
        let mut col = 1 + n_regressors;
        for (f, levels) in dummy_levels.iter().enumerate() {
            if let Some(k) = levels.iter().position(|l| *l == row.levels[f]) {
                x[(i, col + k)] = 1.0;
            }
            col += levels.len();
        }
    }

    let y = DVector::from_iterator(n, rows.iter().map(|r| r.response));
    (x, y)
}
