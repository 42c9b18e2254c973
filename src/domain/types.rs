//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory while fitting units
//! - exported to CSV/JSON
//! - read back by the aggregation step

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Identifier of one unit of work (a year in the workshop datasets).
pub type UnitId = i64;

/// How the set of units is executed inside one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Plain loop in ascending unit order.
    Sequential,
    /// Worker pool; all results are gathered before returning.
    Parallel,
}

impl ExecMode {
    pub fn display_name(self) -> &'static str {
        match self {
            ExecMode::Sequential => "sequential",
            ExecMode::Parallel => "parallel",
        }
    }
}

/// Which columns of the input table feed the regression.
///
/// Column names are stored lowercased; header matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Integer column identifying the unit of work.
    pub unit: String,
    pub response: String,
    /// Predictor whose coefficient (and interval) is reported.
    pub predictor: String,
    /// Additional numeric regressors.
    #[serde(default)]
    pub controls: Vec<String>,
    /// Categorical regressors, dummy-coded per unit.
    #[serde(default)]
    pub factors: Vec<String>,
}

/// Regression settings shared by every unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionSpec {
    pub columns: ColumnSpec,
    /// Two-sided confidence level in `(0, 1)`.
    pub level: f64,
}

/// A normalized observation row.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub unit: UnitId,
    pub response: f64,
    /// Predictor first, then controls in `ColumnSpec::controls` order.
    pub regressors: Vec<f64>,
    /// Factor levels in `ColumnSpec::factors` order.
    pub levels: Vec<String>,
}

/// Summary of one fitted unit: the row of the results table plus diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit: UnitId,
    pub lower: f64,
    pub estimate: f64,
    pub upper: f64,
    /// Standard error of the estimate (absent when read back from a CSV row).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_error: Option<f64>,
    /// Observations used in the fit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_obs: Option<usize>,
    /// Residual degrees of freedom.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub df: Option<usize>,
}

impl UnitResult {
    /// A results-table row without diagnostics.
    pub fn row(unit: UnitId, lower: f64, estimate: f64, upper: f64) -> Self {
        Self {
            unit,
            lower,
            estimate,
            upper,
            std_error: None,
            n_obs: None,
            df: None,
        }
    }
}

/// A full in-process run as understood by the pipeline.
///
/// Derived from CLI flags (plus environment and defaults).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_path: PathBuf,
    pub delimiter: u8,
    pub spec: RegressionSpec,
    pub mode: ExecMode,
    /// Worker threads for `ExecMode::Parallel` (0 = one per core).
    pub threads: usize,
    /// Restrict the run to these units (all units when empty).
    pub only_units: Vec<UnitId>,

    pub export_csv: Option<PathBuf>,
    pub export_json: Option<PathBuf>,
}

/// How a job-array element picks its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSelector {
    /// Position in the ascending list of units, offset by `base`.
    Index { index: i64, base: i64 },
    /// The unit value itself.
    Unit(UnitId),
}

/// Configuration of a single job-array element.
#[derive(Debug, Clone)]
pub struct UnitConfig {
    pub data_path: PathBuf,
    pub delimiter: u8,
    pub spec: RegressionSpec,
    pub selector: UnitSelector,
    /// Shared file the result row is appended to (stdout only when absent).
    pub output: Option<PathBuf>,
}
