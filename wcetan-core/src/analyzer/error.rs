//! Error types for the analysis pipeline.
//!
//! All fatal conditions are represented as `AnalysisError` variants using
//! `thiserror`. Non-fatal outcomes (suboptimal solver results, expected-value
//! mismatches) are *not* errors; they are carried as status values so that a
//! result is still produced.

use thiserror::Error;

/// Analyzer error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// Invalid or conflicting configuration option.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed dump or flow-fact input.
    #[error("parse error: {0}")]
    Parse(String),

    /// A precondition of the analysis does not hold (recursion, missing loop
    /// bound on a reachable loop, unmatched call/return contexts).
    #[error("analysis precondition violated: {0}")]
    Precondition(String),

    /// The concrete-state set of a brute-force DFA exceeded the configured cap.
    #[error("state explosion at node {node}: {count} concrete states exceed cap {cap}")]
    StateExplosion { node: u32, count: usize, cap: usize },

    /// The external ILP solver failed or reported an unbounded problem.
    #[error("solver error: {0}")]
    Solver(String),

    /// An internal invariant was violated.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

impl From<std::io::Error> for AnalysisError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        AnalysisError::Parse(format!("IO error: {}", err))
    }
}
