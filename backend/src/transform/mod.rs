//! Transform module.
//!
//! Field derivation applied to each record between extraction and loading.

pub mod evaluator;

pub use evaluator::{evaluate, ExternalLookup, NoLookup};
