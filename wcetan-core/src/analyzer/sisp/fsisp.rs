//! Function-granular scratchpad allocation.
//!
//! FSISP reuses the block-level formulations but aliases every block
//! indicator with its function's indicator, so functions move on-chip as a
//! whole. FSISP_WCP does the same on top of the WCP-sensitive formulation.
//! FSISP_OLD is the legacy Knapsack directly over functions, with benefits
//! pre-summed from the baseline graph.

use crate::analyzer::config::AnalysisMetric;
use crate::analyzer::error::Result;
use crate::analyzer::graph::{ControlFlowGraph, NodeId, NodeKind};
use crate::analyzer::ilp::solver::{LpSolution, LpSolutionType};
use crate::analyzer::ilp::{Constraint, ConstraintOp, Direction, IlpProblem, LinearExpr};
use crate::analyzer::program::FunctionInfo;
use crate::analyzer::sisp::bbsisp_wcp::BbsispWcpOptimizer;
use crate::analyzer::sisp::{
    function_assignment_from, function_membership_constraints, SispBase, SispOptimizer,
    SispResult,
};
use log::info;

/// Knapsack FSISP: block-granular knapsack plus membership equalities.
pub struct FsispOptimizer {
    base: SispBase,
    functions: Vec<FunctionInfo>,
    assigned_functions: Vec<FunctionInfo>,
}

impl FsispOptimizer {
    pub fn new(
        cfg: ControlFlowGraph,
        entry: NodeId,
        exit: NodeId,
        metric: AnalysisMetric,
        sisp_size: u32,
        functions: Vec<FunctionInfo>,
    ) -> Self {
        FsispOptimizer {
            base: SispBase::new(cfg, entry, exit, metric, sisp_size),
            functions,
            assigned_functions: Vec::new(),
        }
    }

    pub fn function_assignment(&self) -> &[FunctionInfo] {
        &self.assigned_functions
    }
}

impl SispOptimizer for FsispOptimizer {
    fn build_formulation(&mut self) -> Result<String> {
        let mut objective = LinearExpr::new();
        let mut size_expr = LinearExpr::new();
        let mut bins = Vec::new();
        for v in self.base.basic_blocks() {
            let variable = format!("a{}", v);
            objective.add_term(self.base.benefit_of_block(v)? as i64, variable.clone());
            size_expr.add_term(self.base.cfg.node(v).size as i64, variable.clone());
            bins.push(variable);
        }
        let mut problem = IlpProblem::new(Direction::Maximize, objective);
        size_expr.add_term(-1, "sp");
        problem.add_section(
            "size constraints",
            vec![
                Constraint::new(size_expr, ConstraintOp::Eq, LinearExpr::constant(0)),
                Constraint::new(
                    LinearExpr::term(1, "sp"),
                    ConstraintOp::Le,
                    LinearExpr::constant(self.base.sisp_size as i64),
                ),
            ],
        );
        let (membership, function_bins) =
            function_membership_constraints(&self.base.cfg, &self.functions);
        problem.add_section("function membership constraints", membership);
        for b in bins {
            problem.declare_bin(b);
        }
        for f in function_bins {
            problem.declare_bin(f);
        }
        problem.declare_int("sp");
        let formulation = problem.serialize();
        info!("FSISP knapsack formulation:\n{}", formulation);
        Ok(formulation)
    }

    fn apply_solution(&mut self, solution: &LpSolution) -> Result<()> {
        self.base.set_assignment(solution);
        self.base.set_variables(solution);
        self.assigned_functions = function_assignment_from(solution, &self.functions);
        Ok(())
    }

    fn block_assignment(&self) -> &[u32] {
        &self.base.assigned_bbaddrs
    }

    fn used_sisp_size(&self) -> u32 {
        self.base.used_size()
    }

    fn solution_type(&self) -> LpSolutionType {
        self.base.solution_type
    }

    fn results(&self) -> SispResult {
        self.base.base_results()
    }
}

/// WCP-sensitive FSISP: the WCP formulation with membership equalities.
pub struct FsispWcpOptimizer<'a> {
    inner: BbsispWcpOptimizer<'a>,
    functions: Vec<FunctionInfo>,
    assigned_functions: Vec<FunctionInfo>,
}

impl<'a> FsispWcpOptimizer<'a> {
    pub fn new(
        cfg: ControlFlowGraph,
        entry: NodeId,
        exit: NodeId,
        metric: AnalysisMetric,
        sisp_size: u32,
        fill_isp_up: bool,
        shrink_formulation: bool,
        functions: Vec<FunctionInfo>,
    ) -> Self {
        let inner = BbsispWcpOptimizer::new(
            cfg,
            entry,
            exit,
            metric,
            sisp_size,
            fill_isp_up,
            shrink_formulation,
        )
        .with_function_membership(functions.clone());
        FsispWcpOptimizer { inner, functions, assigned_functions: Vec::new() }
    }

    pub fn function_assignment(&self) -> &[FunctionInfo] {
        &self.assigned_functions
    }

    pub fn estimated_wcet(&self) -> u64 {
        self.inner.estimated_wcet()
    }
}

impl SispOptimizer for FsispWcpOptimizer<'_> {
    fn build_formulation(&mut self) -> Result<String> {
        self.inner.build_formulation()
    }

    fn apply_solution(&mut self, solution: &LpSolution) -> Result<()> {
        self.inner.apply_solution(solution)?;
        self.assigned_functions = function_assignment_from(solution, &self.functions);
        Ok(())
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
        let mut results = self.inner.results();
        results.estimated_timing = self.inner.estimated_wcet();
        results
    }
}

/// Legacy function-granular Knapsack over pre-summed benefits.
pub struct FsispOldOptimizer {
    base: SispBase,
    functions: Vec<FunctionInfo>,
    assigned_functions: Vec<FunctionInfo>,
}

impl FsispOldOptimizer {
    pub fn new(
        cfg: ControlFlowGraph,
        entry: NodeId,
        exit: NodeId,
        metric: AnalysisMetric,
        sisp_size: u32,
        functions: Vec<FunctionInfo>,
    ) -> Self {
        FsispOldOptimizer {
            base: SispBase::new(cfg, entry, exit, metric, sisp_size),
            functions,
            assigned_functions: Vec::new(),
        }
    }

    /// Benefit of a function: summed block benefits on the baseline graph.
    fn function_benefit(&self, f: &FunctionInfo) -> Result<u64> {
        let mut benefit = 0u64;
        for node in self.base.cfg.nodes() {
            if node.kind == NodeKind::BasicBlock
                && node.start_address >= f.address
                && node.start_address < f.address + f.size.max(1)
            {
                benefit += self.base.benefit_of_block(node.id)?;
            }
        }
        Ok(benefit)
    }

    pub fn function_assignment(&self) -> &[FunctionInfo] {
        &self.assigned_functions
    }
}

impl SispOptimizer for FsispOldOptimizer {
    fn build_formulation(&mut self) -> Result<String> {
        let mut objective = LinearExpr::new();
        let mut size_expr = LinearExpr::new();
        let mut used_any = false;
        for (k, f) in self.functions.iter().enumerate() {
            let benefit = self.function_benefit(f)?;
            if benefit == 0 {
                // a function never executed on the worst-case path cannot
                // justify scratchpad space
                continue;
            }
            used_any = true;
            objective.add_term(benefit as i64, format!("f{}", k));
            size_expr.add_term(f.size as i64, format!("f{}", k));
        }
        let mut problem = IlpProblem::new(Direction::Maximize, objective);
        if used_any {
            size_expr.add_term(-1, "sp");
            problem.add_section(
                "size constraints",
                vec![
                    Constraint::new(size_expr, ConstraintOp::Eq, LinearExpr::constant(0)),
                    Constraint::new(
                        LinearExpr::term(1, "sp"),
                        ConstraintOp::Le,
                        LinearExpr::constant(self.base.sisp_size as i64),
                    ),
                ],
            );
        }
        for (k, _) in self.functions.iter().enumerate() {
            problem.declare_bin(format!("f{}", k));
        }
        problem.declare_int("sp");
        let formulation = problem.serialize();
        info!("FSISP_OLD knapsack formulation:\n{}", formulation);
        Ok(formulation)
    }

    fn apply_solution(&mut self, solution: &LpSolution) -> Result<()> {
        self.assigned_functions = function_assignment_from(solution, &self.functions);
        // block assignment: every block of every selected function
        self.base.assigned_bbaddrs = self
            .base
            .cfg
            .nodes()
            .filter(|n| {
                n.kind == NodeKind::BasicBlock
                    && self.assigned_functions.iter().any(|f| {
                        n.start_address >= f.address
                            && n.start_address < f.address + f.size.max(1)
                    })
            })
            .map(|n| n.start_address)
            .collect();
        self.base.assigned_bbaddrs.sort_unstable();
        self.base.set_variables(solution);
        Ok(())
    }

    fn block_assignment(&self) -> &[u32] {
        &self.base.assigned_bbaddrs
    }

    fn used_sisp_size(&self) -> u32 {
        self.base.used_size()
    }

    fn solution_type(&self) -> LpSolutionType {
        self.base.solution_type
    }

    fn results(&self) -> SispResult {
        self.base.base_results()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::graph::EdgeKind;
    use crate::analyzer::ilp::solver::LpResultEntry;

    /// Two functions of two blocks each; all blocks of a function share one
    /// indicator.
    fn fsisp_cfg() -> (ControlFlowGraph, NodeId, NodeId, Vec<NodeId>) {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.add_node(NodeKind::Meta, "entry");
        let exit = cfg.add_node(NodeKind::Meta, "exit");
        let mut blocks = Vec::new();
        let addrs = [0x100u32, 0x110, 0x200, 0x210];
        let mut previous = entry;
        for addr in addrs {
            let v = cfg.add_node(NodeKind::BasicBlock, format!("0x{:X}", addr));
            {
                let n = cfg.node_mut(v);
                n.start_address = addr;
                n.size = 16;
            }
            let e = cfg.add_edge(previous, v, EdgeKind::ForwardStep);
            let edge = cfg.edge_mut(e);
            edge.activation = 1;
            blocks.push(v);
            previous = v;
        }
        let e = cfg.add_edge(previous, exit, EdgeKind::Meta);
        cfg.edge_mut(e).activation = 1;
        for &v in &blocks {
            let out = cfg.out_edge_ids(v)[0];
            let edge = cfg.edge_mut(out);
            edge.cost_onchip = 1;
            edge.cost_offchip = 6;
            edge.mem_penalty = 5;
        }
        (cfg, entry, exit, blocks)
    }

    fn functions() -> Vec<FunctionInfo> {
        vec![
            FunctionInfo { address: 0x100, label: "main".into(), size: 32 },
            FunctionInfo { address: 0x200, label: "helper".into(), size: 32 },
        ]
    }

    #[test]
    fn test_membership_constraints_alias_blocks() {
        let (cfg, entry, exit, blocks) = fsisp_cfg();
        let mut optimizer =
            FsispOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32, functions());
        let text = optimizer.build_formulation().unwrap();
        assert!(text.contains(&format!("a{} = f0;", blocks[0])));
        assert!(text.contains(&format!("a{} = f0;", blocks[1])));
        assert!(text.contains(&format!("a{} = f1;", blocks[2])));
        assert!(text.contains("bin f0;"));
        assert!(text.contains("bin f1;"));
    }

    #[test]
    fn test_function_assignment_extracted() {
        let (cfg, entry, exit, blocks) = fsisp_cfg();
        let mut optimizer =
            FsispOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32, functions());
        optimizer.build_formulation().unwrap();
        let solution = LpSolution {
            status: LpSolutionType::OptimalSolution,
            objective: 10,
            values: vec![
                LpResultEntry { variable: "f1".into(), value: 1 },
                LpResultEntry { variable: format!("a{}", blocks[2]), value: 1 },
                LpResultEntry { variable: format!("a{}", blocks[3]), value: 1 },
                LpResultEntry { variable: "sp".into(), value: 32 },
            ],
        };
        optimizer.apply_solution(&solution).unwrap();
        assert_eq!(optimizer.function_assignment().len(), 1);
        assert_eq!(optimizer.function_assignment()[0].label, "helper");
        assert_eq!(optimizer.block_assignment(), &[0x200, 0x210]);
    }

    #[test]
    fn test_fsisp_old_benefits_and_uncalled_functions() {
        let (mut cfg, entry, exit, blocks) = fsisp_cfg();
        // make helper's blocks unexecuted: no benefit, no knapsack entry
        for &v in &blocks[2..] {
            let out = cfg.out_edge_ids(v)[0];
            cfg.edge_mut(out).activation = 0;
        }
        let mut optimizer =
            FsispOldOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32, functions());
        let text = optimizer.build_formulation().unwrap();
        // main: two blocks of benefit 5 each
        assert!(text.contains("10 f0"), "{}", text);
        assert!(!text.contains("f1;\nf1") && !text.contains("+ 0 f1"), "{}", text);

        let solution = LpSolution {
            status: LpSolutionType::OptimalSolution,
            objective: 10,
            values: vec![LpResultEntry { variable: "f0".into(), value: 1 }],
        };
        optimizer.apply_solution(&solution).unwrap();
        assert_eq!(optimizer.block_assignment(), &[0x100, 0x110]);
        assert_eq!(optimizer.used_sisp_size(), 32);
    }

    #[test]
    fn test_fsisp_wcp_contains_membership() {
        let (cfg, entry, exit, blocks) = fsisp_cfg();
        let mut optimizer = FsispWcpOptimizer::new(
            cfg,
            entry,
            exit,
            AnalysisMetric::Wcet,
            32,
            false,
            false,
            functions(),
        );
        let text = optimizer.build_formulation().unwrap();
        assert!(text.contains("min: wentry;"));
        assert!(text.contains(&format!("a{} = f0;", blocks[0])));
    }
}
