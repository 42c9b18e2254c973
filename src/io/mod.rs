//! Input/output helpers.
//!
//! - delimited-table ingest + validation (`ingest`)
//! - result tables, appends and JSON summaries (`export`)
//! - reading result rows back for aggregation (`collect`)

pub mod collect;
pub mod export;
pub mod ingest;

pub use collect::*;
pub use export::*;
pub use ingest::*;
