//! `yearfit` library crate.
//!
//! The binary is a thin wrapper around this library so that:
//!
//! - every execution pattern is testable without spawning processes
//! - the fitting step can be reused by other front-ends
//! - sequential, parallel and job-array runs share one code path

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod report;
pub mod slurm;
