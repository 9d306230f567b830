//! WCP-sensitive allocation with jump penalties.
//!
//! The WCP formulation of [`BbsispWcpOptimizer`] plus the jump-penalty
//! machinery: call and return connections crossing the memory boundary
//! charge their penalty inside the per-context function constraints through
//! XOR variables.

use crate::analyzer::arch::ArchConfig;
use crate::analyzer::config::AnalysisMetric;
use crate::analyzer::error::Result;
use crate::analyzer::graph::{ControlFlowGraph, NodeId};
use crate::analyzer::ilp::solver::{LpSolution, LpSolutionType};
use crate::analyzer::isa::IsaHelper;
use crate::analyzer::sisp::bbsisp_wcp::BbsispWcpOptimizer;
use crate::analyzer::sisp::{SispOptimizer, SispResult};

pub struct BbsispJpWcpOptimizer<'a> {
    inner: BbsispWcpOptimizer<'a>,
}

impl<'a> BbsispJpWcpOptimizer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: ControlFlowGraph,
        entry: NodeId,
        exit: NodeId,
        metric: AnalysisMetric,
        sisp_size: u32,
        fill_isp_up: bool,
        shrink_formulation: bool,
        arch: &'a ArchConfig,
        isa: &'a dyn IsaHelper,
    ) -> Self {
        let inner =
            BbsispWcpOptimizer::new(cfg, entry, exit, metric, sisp_size, fill_isp_up, shrink_formulation)
                .with_jump_penalties(arch, isa);
        BbsispJpWcpOptimizer { inner }
    }

    pub fn estimated_wcet(&self) -> u64 {
        self.inner.estimated_wcet()
    }
}

impl SispOptimizer for BbsispJpWcpOptimizer<'_> {
    fn build_formulation(&mut self) -> Result<String> {
        self.inner.build_formulation()
    }

    fn apply_solution(&mut self, solution: &LpSolution) -> Result<()> {
        self.inner.apply_solution(solution)
    }

    fn block_assignment(&self) -> &[u32] {
        self.inner.block_assignment()
    }

    fn used_sisp_size(&self) -> u32 {
        self.inner.used_sisp_size()
    }

    fn solution_type(&self) -> LpSolutionType {
        self.inner.solution_type()
    }

    fn results(&self) -> SispResult {
        self.inner.results()
    }
}
