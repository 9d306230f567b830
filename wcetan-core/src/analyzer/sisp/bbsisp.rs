//! Knapsack-based basic-block scratchpad allocation.
//!
//! Maximizes the summed benefit of the selected blocks under the size
//! budget. The benefit of a block is the cycles it saves on the baseline
//! worst-case path when moved on-chip; jump costs for entering and leaving
//! the scratchpad are not considered here.

use crate::analyzer::config::AnalysisMetric;
use crate::analyzer::error::Result;
use crate::analyzer::graph::{ControlFlowGraph, NodeId};
use crate::analyzer::ilp::solver::{LpSolution, LpSolutionType};
use crate::analyzer::ilp::{Constraint, ConstraintOp, Direction, IlpProblem, LinearExpr};
use crate::analyzer::sisp::{SispBase, SispOptimizer, SispResult};
use log::info;

pub struct BbsispOptimizer {
    base: SispBase,
}

impl BbsispOptimizer {
    pub fn new(
        cfg: ControlFlowGraph,
        entry: NodeId,
        exit: NodeId,
        metric: AnalysisMetric,
        sisp_size: u32,
    ) -> Self {
        BbsispOptimizer { base: SispBase::new(cfg, entry, exit, metric, sisp_size) }
    }

    fn knapsack_problem(&self) -> Result<IlpProblem> {
        let mut objective = LinearExpr::new();
        let mut size_expr = LinearExpr::new();
        let mut problem_bins = Vec::new();
        for v in self.base.basic_blocks() {
            let variable = format!("a{}", v);
            objective.add_term(self.base.benefit_of_block(v)? as i64, variable.clone());
            size_expr.add_term(self.base.cfg.node(v).size as i64, variable.clone());
            problem_bins.push(variable);
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
        for variable in problem_bins {
            problem.declare_bin(variable);
        }
        problem.declare_int("sp");
        Ok(problem)
    }
}

impl SispOptimizer for BbsispOptimizer {
    fn build_formulation(&mut self) -> Result<String> {
        let formulation = self.knapsack_problem()?.serialize();
        info!("BBSISP knapsack formulation:\n{}", formulation);
        Ok(formulation)
    }

    fn apply_solution(&mut self, solution: &LpSolution) -> Result<()> {
        self.base.set_assignment(solution);
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
    use crate::analyzer::graph::{EdgeKind, NodeKind};
    use crate::analyzer::ilp::solver::LpResultEntry;

    /// Three 16-byte blocks with benefits 10, 8 and 7; a 32-byte scratchpad
    /// selects the first two.
    fn knapsack_cfg() -> (ControlFlowGraph, NodeId, NodeId, Vec<NodeId>) {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.add_node(NodeKind::Meta, "entry");
        let exit = cfg.add_node(NodeKind::Meta, "exit");
        let mut blocks = Vec::new();
        let benefits = [10u64, 8, 7];
        let mut previous = entry;
        for (i, benefit) in benefits.iter().enumerate() {
            let v = cfg.add_node(NodeKind::BasicBlock, format!("bb{}", i));
            {
                let n = cfg.node_mut(v);
                n.start_address = 0x100 + (i as u32) * 16;
                n.size = 16;
            }
            let e = cfg.add_edge(previous, v, EdgeKind::ForwardStep);
            cfg.edge_mut(e).activation = 1;
            blocks.push(v);
            previous = v;
        }
        let last = cfg.add_edge(previous, exit, EdgeKind::Meta);
        cfg.edge_mut(last).activation = 1;
        // the out-edge of each block carries its benefit as off/on delta
        for (i, &v) in blocks.iter().enumerate() {
            let out = cfg.out_edge_ids(v)[0];
            let edge = cfg.edge_mut(out);
            edge.cost_onchip = 1;
            edge.cost_offchip = 1 + benefits[i];
            edge.mem_penalty = benefits[i];
        }
        (cfg, entry, exit, blocks)
    }

    #[test]
    fn test_knapsack_formulation() {
        let (cfg, entry, exit, blocks) = knapsack_cfg();
        let mut optimizer =
            BbsispOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32);
        let text = optimizer.build_formulation().unwrap();
        assert!(text.contains(&format!("10 a{}", blocks[0])));
        assert!(text.contains(&format!("8 a{}", blocks[1])));
        assert!(text.contains("sp <= 32;"));
        assert!(text.contains(&format!("bin a{};", blocks[0])));
    }

    #[test]
    fn test_knapsack_assignment_applied() {
        let (cfg, entry, exit, blocks) = knapsack_cfg();
        let mut optimizer =
            BbsispOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32);
        optimizer.build_formulation().unwrap();
        let solution = LpSolution {
            status: LpSolutionType::OptimalSolution,
            objective: 18,
            values: vec![
                LpResultEntry { variable: format!("a{}", blocks[0]), value: 1 },
                LpResultEntry { variable: format!("a{}", blocks[1]), value: 1 },
                LpResultEntry { variable: format!("a{}", blocks[2]), value: 0 },
                LpResultEntry { variable: "sp".to_string(), value: 32 },
            ],
        };
        optimizer.apply_solution(&solution).unwrap();
        assert_eq!(optimizer.block_assignment(), &[0x100, 0x110]);
        assert_eq!(optimizer.used_sisp_size(), 32);
        let results = optimizer.results();
        assert_eq!(results.estimated_used_size, 32);
        assert_eq!(results.solution_type, LpSolutionType::OptimalSolution);
    }
}
