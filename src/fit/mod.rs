//! Fitting units of work.
//!
//! Responsibilities:
//!
//! - fit one unit (`unit`): subset, design matrix, OLS, interval
//! - run many units sequentially or on a worker pool (`exec`)
//! - map job-array indices to units (`exec`)

pub mod exec;
pub mod unit;

pub use exec::*;
pub use unit::*;
