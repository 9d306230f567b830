//! Test Utilities
//!
//! Shared helpers for the integration tests: a canned ILP backend that
//! stands in for the external solver, and small dump programs.

use std::cell::RefCell;
use std::path::Path;
use wcetan_core::analyzer::error::Result;
use wcetan_core::analyzer::ilp::solver::{
    IlpBackend, LpResultEntry, LpSolution, LpSolutionType,
};

/// Backend that answers ILPs without an external process.
///
/// IPET formulations (recognized by the injection-flow section) get flow
/// value 1 on every variable, which is the unique feasible flow of a
/// loop-free program. Allocation formulations (recognized by their binary
/// `a<v>` domains) get every block assigned and `sp` set to the value
/// configured at construction.
pub struct CannedBackend {
    pub sp_value: u64,
    pub invocations: RefCell<usize>,
}

impl CannedBackend {
    pub fn new(sp_value: u64) -> Self {
        CannedBackend { sp_value, invocations: RefCell::new(0) }
    }
}

impl IlpBackend for CannedBackend {
    fn solve(&self, formulation: &str, _ilp_path: &Path) -> Result<LpSolution> {
        *self.invocations.borrow_mut() += 1;
        let mut values = Vec::new();
        if formulation.contains("injection flow from back edge") {
            for line in formulation.lines() {
                if let Some(variable) =
                    line.strip_prefix("int ").and_then(|l| l.strip_suffix(';'))
                {
                    values.push(LpResultEntry { variable: variable.to_string(), value: 1 });
                }
            }
        } else {
            for line in formulation.lines() {
                if let Some(variable) =
                    line.strip_prefix("bin ").and_then(|l| l.strip_suffix(';'))
                {
                    values.push(LpResultEntry { variable: variable.to_string(), value: 1 });
                }
            }
            values.push(LpResultEntry { variable: "sp".to_string(), value: self.sp_value });
        }
        Ok(LpSolution { status: LpSolutionType::OptimalSolution, objective: 0, values })
    }
}

/// Straight-line program: main with two 16-byte blocks of 4 instructions.
pub const STRAIGHT_LINE_DUMP: &str = "\
function main 0x100 32
bb 0x100 16 4
  100: 02f1 mov d15, d1
  104: 02f2 mov d15, d2
  108: 02f3 mov d15, d3
  10c: 02f4 mov d15, d4
bb 0x110 16 4
  110: 02f1 mov d15, d1
  114: 02f2 mov d15, d2
  118: 02f3 mov d15, d3
  11c: 9000 ret
edge 0x100 0x110 step
";

/// main calls helper once between its two blocks.
pub const CALL_DUMP: &str = "\
function main 0x100 32
function helper 0x200 16
bb 0x100 16 4
  100: 02f1 mov d15, d1
  10c: 6d00008f call 200
bb 0x110 16 4
  11c: 9000 ret
bb 0x200 16 4
  20c: 9000 ret
call 0x100 0x200 0x110
";
