//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - execution and selection enums (`ExecMode`, `UnitSelector`)
//! - the regression description (`ColumnSpec`, `RegressionSpec`)
//! - normalized observations (`Observation`)
//! - per-unit outputs (`UnitResult`)

pub mod types;

pub use types::*;
