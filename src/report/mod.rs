//! Terminal reports for runs, array elements and aggregation.

pub mod format;

pub use format::*;
