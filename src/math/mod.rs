//! Mathematical utilities: least squares and the Student t distribution.

pub mod dist;
pub mod ols;

pub use dist::*;
pub use ols::*;
