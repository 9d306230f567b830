//! wcetan-core: a static worst-case execution time analyzer for simple
//! in-order embedded pipelines with instruction caches and (static or
//! dynamic) instruction scratchpads.

pub mod analyzer;

pub use analyzer::config::Configuration;
pub use analyzer::error::AnalysisError;
pub use analyzer::pipeline::{AnalysisOutcome, TimingAnalysis};
