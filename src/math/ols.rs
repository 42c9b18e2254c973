//! Ordinary least squares with classical standard errors.
//!
//! Each unit of work solves one small regression:
//!
//! ```text
//! minimize Σ (y_i - x_i^T β)^2
//! ```
//!
//! and needs, besides `β`, the usual inference quantities:
//!
//! - residual variance `σ² = SSE / (n - p)`
//! - coefficient covariance `σ² (XᵀX)⁻¹`
//!
//! Implementation choices:
//! - Rank is checked on the singular values of `X` before anything else, so
//!   collinear designs (e.g. a control that duplicates the predictor within a
//!   year) are reported instead of producing huge, meaningless coefficients.
//! - The normal equations are then solved through a Cholesky factorization of
//!   `XᵀX`, which also gives the inverse needed for standard errors.

use nalgebra::{DMatrix, DVector};

/// Relative singular-value threshold below which the design is treated as rank deficient.
const RANK_TOL: f64 = 1e-10;

/// Why a least-squares problem could not be solved.
#[derive(Debug, Clone, PartialEq)]
pub enum OlsError {
    /// Fewer observations than needed for a positive residual degree of freedom.
    TooFewObservations { n: usize, p: usize },
    /// `X` does not have full column rank.
    Singular,
    /// Coefficients or standard errors came out NaN/inf.
    NonFinite,
}

impl std::fmt::Display for OlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OlsError::TooFewObservations { n, p } => {
                write!(f, "{n} observation(s) for {p} coefficient(s); need at least {}", p + 1)
            }
            OlsError::Singular => write!(f, "design matrix is rank deficient"),
            OlsError::NonFinite => write!(f, "non-finite coefficient or standard error"),
        }
    }
}

impl std::error::Error for OlsError {}

/// Solved regression plus inference quantities.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: DVector<f64>,
    pub std_errors: DVector<f64>,
    /// Residual sum of squares.
    pub sse: f64,
    /// Residual variance estimate `SSE / df`.
    pub sigma2: f64,
    /// Residual degrees of freedom `n - p`.
    pub df: usize,
    pub n: usize,
}

/// Solve `y ~ X` by ordinary least squares.
///
/// `x` must already contain the intercept column if one is wanted.
pub fn solve_ols(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<OlsFit, OlsError> {
    let n = x.nrows();
    let p = x.ncols();
    if p == 0 || n <= p {
        return Err(OlsError::TooFewObservations { n, p });
    }

    let sv = x.singular_values();
    let sv_max = sv.max();
    if !(sv_max > 0.0) || sv.min() / sv_max < RANK_TOL {
        return Err(OlsError::Singular);
    }

    let xtx = x.tr_mul(x);
    let chol = xtx.cholesky().ok_or(OlsError::Singular)?;
    let coefficients = chol.solve(&x.tr_mul(y));
    let xtx_inv = chol.inverse();

    let residuals = y - x * &coefficients;
    let sse = residuals.norm_squared();
    let df = n - p;
    let sigma2 = sse / df as f64;

    let std_errors = DVector::from_iterator(p, (0..p).map(|j| (sigma2 * xtx_inv[(j, j)]).max(0.0).sqrt()));

    if coefficients.iter().chain(std_errors.iter()).any(|v| !v.is_finite()) {
        return Err(OlsError::NonFinite);
    }

    Ok(OlsFit {
        coefficients,
        std_errors,
        sse,
        sigma2,
        df,
        n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design(xs: &[f64]) -> DMatrix<f64> {
        DMatrix::from_fn(xs.len(), 2, |i, j| if j == 0 { 1.0 } else { xs[i] })
    }

    #[test]
    fn recovers_exact_line() {
        // y = 2 + 3x
        let x = design(&[0.0, 1.0, 2.0, 3.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0, 11.0]);

        let fit = solve_ols(&x, &y).unwrap();
        assert!((fit.coefficients[0] - 2.0).abs() < 1e-10);
        assert!((fit.coefficients[1] - 3.0).abs() < 1e-10);
        assert!(fit.sse < 1e-18);
        assert_eq!(fit.df, 2);
    }

    #[test]
    fn standard_errors_match_closed_form() {
        // Simple regression: se(b1) = sqrt(σ² / Sxx).
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [1.1, 1.9, 3.2, 3.8, 5.1];
        let fit = solve_ols(&design(&xs), &DVector::from_row_slice(&ys)).unwrap();

        let mean_x = xs.iter().sum::<f64>() / 5.0;
        let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
        let expected = (fit.sigma2 / sxx).sqrt();
        assert!((fit.std_errors[1] - expected).abs() < 1e-10);

        // Slope from the textbook formula: Sxy / Sxx = 0.99.
        assert!((fit.coefficients[1] - 0.99).abs() < 1e-10);
    }

    #[test]
    fn rejects_too_few_rows() {
        let x = design(&[1.0, 2.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0]);
        assert_eq!(solve_ols(&x, &y).unwrap_err(), OlsError::TooFewObservations { n: 2, p: 2 });
    }

    #[test]
    fn rejects_collinear_columns() {
        let x = DMatrix::from_row_slice(4, 3, &[
            1.0, 1.0, 2.0, //
            1.0, 2.0, 4.0, //
            1.0, 3.0, 6.0, //
            1.0, 4.0, 8.0,
        ]);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0, 5.0]);
        assert_eq!(solve_ols(&x, &y).unwrap_err(), OlsError::Singular);
    }
}
