//! External `lp_solve` invocation.
//!
//! The serialized problem is written to a file and handed to the `lp_solve`
//! binary as a blocking child process; its textual output is parsed back
//! into (variable, value) pairs, the objective value and a solution tag.

use crate::analyzer::error::{AnalysisError, Result};
use log::{debug, error, warn};
use std::path::Path;
use std::process::Command;

/// Outcome tag of a solver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpSolutionType {
    OptimalSolution,
    SuboptimalSolution,
    ProblemUnbound,
    ErrorWhileSolving,
    SolutionNotCalculated,
}

/// One variable assignment from the solver output.
#[derive(Debug, Clone, PartialEq)]
pub struct LpResultEntry {
    pub variable: String,
    pub value: u64,
}

/// Parsed solver output.
#[derive(Debug, Clone)]
pub struct LpSolution {
    pub status: LpSolutionType,
    pub objective: u64,
    pub values: Vec<LpResultEntry>,
}

impl LpSolution {
    pub fn value_of(&self, variable: &str) -> Option<u64> {
        self.values.iter().find(|e| e.variable == variable).map(|e| e.value)
    }
}

/// Anything that can solve a serialized ILP. The production implementation
/// shells out to `lp_solve`; tests supply canned solutions.
pub trait IlpBackend {
    fn solve(&self, formulation: &str, ilp_path: &Path) -> Result<LpSolution>;
}

/// Runs the external solver.
pub struct LpSolver {
    /// Opaque parameter string forwarded to the binary.
    parameters: String,
}

impl IlpBackend for LpSolver {
    fn solve(&self, formulation: &str, ilp_path: &Path) -> Result<LpSolution> {
        LpSolver::solve(self, formulation, ilp_path)
    }
}

impl LpSolver {
    pub fn new(parameters: impl Into<String>) -> Self {
        LpSolver { parameters: parameters.into() }
    }

    /// Write `formulation` to `ilp_path`, run `lp_solve` on it and parse the
    /// output.
    pub fn solve(&self, formulation: &str, ilp_path: &Path) -> Result<LpSolution> {
        std::fs::write(ilp_path, formulation)
            .map_err(|e| AnalysisError::Solver(format!("cannot write ILP file: {}", e)))?;

        let binary = which::which("lp_solve")
            .map_err(|e| AnalysisError::Solver(format!("lp_solve binary not found: {}", e)))?;

        let mut command = Command::new(binary);
        for parameter in self.parameters.split_whitespace() {
            command.arg(parameter);
        }
        command.arg(ilp_path);
        debug!("invoking solver: {:?}", command);

        let output = command
            .output()
            .map_err(|e| AnalysisError::Solver(format!("cannot run lp_solve: {}", e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            error!("lp_solve exited with {}: {}", output.status, stdout);
        }
        Ok(parse_solver_output(&stdout))
    }
}

/// Parse the textual solver output.
///
/// Expected shape:
///
/// ```text
/// Value of objective function: 31
///
/// Actual values of the variables:
/// f0                              1
/// f1                              1
/// ```
pub fn parse_solver_output(text: &str) -> LpSolution {
    let lower = text.to_ascii_lowercase();
    if lower.contains("unbounded") {
        return LpSolution { status: LpSolutionType::ProblemUnbound, objective: 0, values: vec![] };
    }
    if lower.contains("infeasible") {
        return LpSolution {
            status: LpSolutionType::ErrorWhileSolving,
            objective: 0,
            values: vec![],
        };
    }

    let mut objective: Option<u64> = None;
    let mut values = Vec::new();
    let mut in_values = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("Value of objective function:") {
            objective = rest.trim().parse::<f64>().ok().map(|v| v.round() as u64);
            continue;
        }
        if line.starts_with("Actual values of the variables") {
            in_values = true;
            continue;
        }
        if in_values {
            let mut tokens = line.split_whitespace();
            if let (Some(variable), Some(value)) = (tokens.next(), tokens.next()) {
                match value.parse::<f64>() {
                    Ok(v) => values.push(LpResultEntry {
                        variable: variable.to_string(),
                        value: v.round() as u64,
                    }),
                    Err(_) => warn!("unparseable solver output line: '{}'", line),
                }
            }
        }
    }

    match objective {
        Some(objective) => {
            let status = if lower.contains("suboptimal") {
                LpSolutionType::SuboptimalSolution
            } else {
                LpSolutionType::OptimalSolution
            };
            LpSolution { status, objective, values }
        }
        None => LpSolution {
            status: LpSolutionType::SolutionNotCalculated,
            objective: 0,
            values,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_optimal_output() {
        let text = "\
Value of objective function: 31

Actual values of the variables:
f0                              1
f1                              1
f2                             10
";
        let solution = parse_solver_output(text);
        assert_eq!(solution.status, LpSolutionType::OptimalSolution);
        assert_eq!(solution.objective, 31);
        assert_eq!(solution.value_of("f2"), Some(10));
        assert_eq!(solution.values.len(), 3);
    }

    #[test]
    fn test_parse_unbounded() {
        let solution = parse_solver_output("This problem is unbounded\n");
        assert_eq!(solution.status, LpSolutionType::ProblemUnbound);
    }

    #[test]
    fn test_parse_infeasible() {
        let solution = parse_solver_output("This problem is infeasible\n");
        assert_eq!(solution.status, LpSolutionType::ErrorWhileSolving);
    }

    #[test]
    fn test_parse_empty_output() {
        let solution = parse_solver_output("");
        assert_eq!(solution.status, LpSolutionType::SolutionNotCalculated);
        assert!(solution.values.is_empty());
    }
}
