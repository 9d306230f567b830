//! Static scratchpad allocation.
//!
//! Five allocation modes share this harness: Knapsack on basic blocks
//! (BBSISP), Knapsack with jump penalties (BBSISP_JP), the WCP-sensitive
//! formulations (BBSISP_WCP, BBSISP_JP_WCP) and the function-granular
//! variants (FSISP, FSISP_WCP, FSISP_OLD). Every optimizer emits its own
//! ILP over binary assignment variables `a<node>`; the solver's assignment
//! is mapped back to block addresses and cross-checked against the graph.

pub mod bbsisp;
pub mod bbsisp_jp;
pub mod bbsisp_jp_wcp;
pub mod bbsisp_wcp;
pub mod fsisp;

use crate::analyzer::config::AnalysisMetric;
use crate::analyzer::error::{AnalysisError, Result};
use crate::analyzer::graph::{ControlFlowGraph, NodeId, NodeKind};
use crate::analyzer::ilp::solver::{IlpBackend, LpSolution, LpSolutionType};
use crate::analyzer::ilp::{Constraint, ConstraintOp, LinearExpr};
use crate::analyzer::program::FunctionInfo;
use log::{debug, info};
use std::path::Path;

/// Outcome of one allocation run.
#[derive(Debug, Clone)]
pub struct SispResult {
    /// Byte sum of the assigned blocks, recomputed from the graph.
    pub used_size: u32,
    /// Used size as reported by the solver's `sp` variable.
    pub estimated_used_size: u32,
    pub assigned_bbs: Vec<u32>,
    pub solution_type: LpSolutionType,
    /// WCET estimate of the WCP-sensitive formulations (`u64::MAX` for the
    /// Knapsack ones).
    pub estimated_timing: u64,
    /// Jump-penalty sum of the JP formulations (`u32::MAX` otherwise).
    pub estimated_jump_penalty: u32,
}

/// Interface shared by all allocation optimizers.
pub trait SispOptimizer {
    /// Build the allocation ILP.
    fn build_formulation(&mut self) -> Result<String>;

    /// Consume the solver result.
    fn apply_solution(&mut self, solution: &LpSolution) -> Result<()>;

    fn block_assignment(&self) -> &[u32];
    fn used_sisp_size(&self) -> u32;
    fn solution_type(&self) -> LpSolutionType;
    fn results(&self) -> SispResult;

    /// Build, solve externally and apply in one step.
    fn calculate_block_assignment(
        &mut self,
        solver: &dyn IlpBackend,
        ilp_path: &Path,
    ) -> Result<()> {
        let formulation = self.build_formulation()?;
        let solution = solver.solve(&formulation, ilp_path)?;
        self.apply_solution(&solution)
    }
}

/// State and helpers common to all optimizers.
pub struct SispBase {
    pub cfg: ControlFlowGraph,
    pub entry: NodeId,
    pub exit: NodeId,
    pub metric: AnalysisMetric,
    pub sisp_size: u32,
    pub assigned_bbaddrs: Vec<u32>,
    pub solution_type: LpSolutionType,
    /// Value of the `sp` variable reported by the solver.
    pub ilp_used_size: u32,
    /// Value of the `wentry` variable (WCP formulations).
    pub ilp_wcet_estimate: u64,
    /// Value of the `jp` variable (JP formulations).
    pub ilp_jump_penalty: u32,
}

impl SispBase {
    pub fn new(
        cfg: ControlFlowGraph,
        entry: NodeId,
        exit: NodeId,
        metric: AnalysisMetric,
        sisp_size: u32,
    ) -> Self {
        SispBase {
            cfg,
            entry,
            exit,
            metric,
            sisp_size,
            assigned_bbaddrs: Vec::new(),
            solution_type: LpSolutionType::SolutionNotCalculated,
            ilp_used_size: 0,
            ilp_wcet_estimate: 0,
            ilp_jump_penalty: u32::MAX,
        }
    }

    /// Basic block node ids in iteration order.
    pub fn basic_blocks(&self) -> Vec<NodeId> {
        self.cfg
            .nodes()
            .filter(|n| n.kind == NodeKind::BasicBlock)
            .map(|n| n.id)
            .collect()
    }

    /// Benefit of keeping a block on-chip, per metric, weighted with the
    /// baseline worst-case-path activations.
    pub fn benefit_of_block(&self, v: NodeId) -> Result<u64> {
        let mut benefit = 0u64;
        for e in self.cfg.out_edges(v) {
            match self.metric {
                AnalysisMetric::Wcet | AnalysisMetric::WcetRatioFiles => {
                    let saving = e.cost_offchip - e.cost_onchip;
                    if e.mem_penalty != saving {
                        return Err(AnalysisError::Internal(format!(
                            "memory penalty {} of edge {} diverged from off/on-chip delta {}",
                            e.mem_penalty, e.label, saving
                        )));
                    }
                    benefit += saving * e.activation;
                }
                AnalysisMetric::Mdic => {
                    benefit += e.cost * e.activation;
                }
                AnalysisMetric::Mpl => {
                    // no activation information for the path-length metric
                    benefit += e.cost;
                }
            }
        }
        Ok(benefit)
    }

    /// Take the `a<node>` assignment variables out of the solver result.
    pub fn set_assignment(&mut self, solution: &LpSolution) {
        self.assigned_bbaddrs.clear();
        for entry in &solution.values {
            if entry.value != 1 {
                continue;
            }
            let Some(id) = entry
                .variable
                .strip_prefix('a')
                .and_then(|rest| rest.parse::<NodeId>().ok())
            else {
                continue;
            };
            if (id as usize) < self.cfg.node_count()
                && self.cfg.node(id).kind == NodeKind::BasicBlock
            {
                let addr = self.cfg.node(id).start_address;
                debug!("block 0x{:08X} assigned to the scratchpad", addr);
                self.assigned_bbaddrs.push(addr);
            }
        }
        self.assigned_bbaddrs.sort_unstable();
    }

    /// Pick up the global variables of the assignment ILP.
    pub fn set_variables(&mut self, solution: &LpSolution) {
        if let Some(sp) = solution.value_of("sp") {
            info!("used scratchpad size is: {}", sp);
            self.ilp_used_size = sp as u32;
        }
        if let Some(wentry) = solution.value_of("wentry") {
            info!("the assignment estimates the WCET with: {}", wentry);
            self.ilp_wcet_estimate = wentry;
        }
        if let Some(jp) = solution.value_of("jp") {
            info!("the assignment estimates the jump penalty with: {}", jp);
            self.ilp_jump_penalty = jp as u32;
        }
        self.solution_type = solution.status;
    }

    /// Byte sum of the assigned blocks, recomputed from the graph.
    pub fn used_size(&self) -> u32 {
        self.cfg
            .nodes()
            .filter(|n| {
                n.kind == NodeKind::BasicBlock
                    && self.assigned_bbaddrs.contains(&n.start_address)
            })
            .map(|n| n.size)
            .sum()
    }

    pub fn base_results(&self) -> SispResult {
        SispResult {
            used_size: self.used_size(),
            estimated_used_size: self.ilp_used_size,
            assigned_bbs: self.assigned_bbaddrs.clone(),
            solution_type: self.solution_type,
            estimated_timing: u64::MAX,
            estimated_jump_penalty: u32::MAX,
        }
    }
}

/// Alias every block indicator with the indicator of its owning function
/// (`a<v> = f<k>`), forcing whole-function assignment. Returns the
/// constraints and the used `f<k>` variables.
pub fn function_membership_constraints(
    cfg: &ControlFlowGraph,
    functions: &[FunctionInfo],
) -> (Vec<Constraint>, Vec<String>) {
    let mut constraints = Vec::new();
    let mut used: Vec<usize> = Vec::new();
    for node in cfg.nodes() {
        if node.kind != NodeKind::BasicBlock {
            continue;
        }
        for (k, f) in functions.iter().enumerate() {
            if node.start_address >= f.address && node.start_address < f.address + f.size.max(1) {
                constraints.push(Constraint::new(
                    LinearExpr::term(1, format!("a{}", node.id)),
                    ConstraintOp::Eq,
                    LinearExpr::term(1, format!("f{}", k)),
                ));
                if !used.contains(&k) {
                    used.push(k);
                }
                break;
            }
        }
    }
    used.sort_unstable();
    (constraints, used.into_iter().map(|k| format!("f{}", k)).collect())
}

/// Functions selected by the solver's `f<k>` indicators.
pub fn function_assignment_from(
    solution: &LpSolution,
    functions: &[FunctionInfo],
) -> Vec<FunctionInfo> {
    let mut assigned = Vec::new();
    for entry in &solution.values {
        if entry.value != 1 {
            continue;
        }
        let Some(k) = entry
            .variable
            .strip_prefix('f')
            .and_then(|rest| rest.parse::<usize>().ok())
        else {
            continue;
        };
        if let Some(f) = functions.get(k) {
            debug!("function {} (0x{:08X}) assigned to the scratchpad", f.label, f.address);
            assigned.push(f.clone());
        }
    }
    assigned
}

/// Verify an allocation result against the graph; mismatches are logged and
/// fatal unless the jump-penalty machinery legitimately shifted block sizes.
pub fn check_sisp_assignment(
    result: &SispResult,
    size_of_blocks_in_cfg: u32,
    sizes_may_shift: bool,
) -> Result<()> {
    if result.estimated_used_size != result.used_size {
        let message = format!(
            "scratchpad bytes from the assignment ILP do not match the assigned blocks: {} != {}",
            result.estimated_used_size, result.used_size
        );
        if sizes_may_shift {
            log::warn!("{}", message);
        } else {
            return Err(AnalysisError::Internal(message));
        }
    }
    if result.used_size != size_of_blocks_in_cfg {
        let message = format!(
            "scratchpad bytes of the optimizer do not match the updated graph: {} != {}",
            result.used_size, size_of_blocks_in_cfg
        );
        if sizes_may_shift {
            log::warn!("{}", message);
        } else {
            return Err(AnalysisError::Internal(message));
        }
    }
    Ok(())
}
