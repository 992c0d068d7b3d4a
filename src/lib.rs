//! Benchlab - run long benchmark experiments and keep track of their results
//!
//! Experiments are external commands whose output goes to one log file per
//! iteration. The engine derives each experiment's status from its log,
//! caches the statuses in a JSON file, and runs whatever is still missing.

pub mod collection;
pub mod engine;
pub mod error;
pub mod experiment;
pub mod export;
pub mod results;
pub mod runner;
pub mod suite;

pub use error::{BenchError, Result};
