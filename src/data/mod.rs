//! Synthetic datasets for trying the execution patterns without real data.

pub mod sample;

pub use sample::*;
