//! Knapsack allocation with jump penalties.
//!
//! Extends the plain Knapsack by the cost of control flow crossing the
//! on-chip boundary. Every connection between two blocks on the worst-case
//! path gets an XOR variable that is one iff exactly one endpoint is
//! assigned; the penalty of adapting that connection (weighted with its
//! activation count) is charged against the objective through the `jp`
//! variable. Continuous-addressing connections that must be turned into
//! explicit jumps additionally enlarge the assigned block, modeled with
//! ANDN variables in the size constraint.
//!
//! XOR is linearized as the four-inequality box, ANDN as the three-
//! inequality box.

use crate::analyzer::arch::{ArchConfig, ConnectionType, DisplacementType};
use crate::analyzer::config::AnalysisMetric;
use crate::analyzer::cost::classify_connection;
use crate::analyzer::error::Result;
use crate::analyzer::graph::{ControlFlowGraph, NodeId};
use crate::analyzer::ilp::solver::{LpSolution, LpSolutionType};
use crate::analyzer::ilp::{Constraint, ConstraintOp, Direction, IlpProblem, LinearExpr};
use crate::analyzer::isa::IsaHelper;
use crate::analyzer::sisp::{SispBase, SispOptimizer, SispResult};
use log::info;

/// One basic-block connection on the worst-case path.
#[derive(Debug, Clone)]
struct BlockConnection {
    source: NodeId,
    target: NodeId,
    kind: ConnectionType,
    displacement: DisplacementType,
    activation_count: u64,
}

pub struct BbsispJpOptimizer<'a> {
    base: SispBase,
    arch: &'a ArchConfig,
    isa: &'a dyn IsaHelper,
    connections: Vec<BlockConnection>,
}

impl<'a> BbsispJpOptimizer<'a> {
    pub fn new(
        cfg: ControlFlowGraph,
        entry: NodeId,
        exit: NodeId,
        metric: AnalysisMetric,
        sisp_size: u32,
        arch: &'a ArchConfig,
        isa: &'a dyn IsaHelper,
    ) -> Self {
        BbsispJpOptimizer {
            base: SispBase::new(cfg, entry, exit, metric, sisp_size),
            arch,
            isa,
            connections: Vec::new(),
        }
    }

    /// Collect the block connections with a non-zero activation count.
    fn collect_connections(&mut self) {
        self.connections.clear();
        let cfg = &self.base.cfg;
        for e in cfg.edges() {
            if e.activation == 0 {
                continue;
            }
            let Some((kind, source, target)) = classify_connection(cfg, e) else { continue };
            let displacement = match kind {
                ConnectionType::ContinuousAdressing => DisplacementType::NoDisplacement,
                ConnectionType::Return => DisplacementType::Indirect,
                _ => self.isa.displacement_type(&cfg.node(source).code),
            };
            self.connections.push(BlockConnection {
                source,
                target,
                kind,
                displacement,
                activation_count: e.activation,
            });
        }
    }

    fn xor_var(c: &BlockConnection) -> String {
        format!("xor{}00{}", c.source, c.target)
    }

    fn andn_var(c: &BlockConnection) -> String {
        format!("andn{}00{}", c.source, c.target)
    }

    fn jp_problem(&self) -> Result<IlpProblem> {
        // objective: block benefits minus the jump-penalty sum
        let mut objective = LinearExpr::new();
        for v in self.base.basic_blocks() {
            objective.add_term(self.base.benefit_of_block(v)? as i64, format!("a{}", v));
        }
        objective.add_term(-1, "jp");
        let mut problem = IlpProblem::new(Direction::Maximize, objective);

        // jp aggregates the activation-weighted penalty of every crossing
        // connection
        let mut jp_expr = LinearExpr::term(-1, "jp");
        for c in &self.connections {
            let penalty = self.arch.jump_penalty(c.kind, c.displacement) as i64;
            if penalty != 0 {
                jp_expr.add_term(penalty * c.activation_count as i64, Self::xor_var(c));
            }
        }
        problem.add_section(
            "jump penalty sum",
            vec![Constraint::new(jp_expr, ConstraintOp::Eq, LinearExpr::constant(0))],
        );

        // XOR boxes: xor = a_src XOR a_tgt
        let mut xor_constraints = Vec::new();
        for c in &self.connections {
            let x = Self::xor_var(c);
            let s = format!("a{}", c.source);
            let t = format!("a{}", c.target);
            let mut le_sum = LinearExpr::term(1, x.clone());
            le_sum.add_term(-1, s.clone()).add_term(-1, t.clone());
            xor_constraints.push(Constraint::new(
                le_sum,
                ConstraintOp::Le,
                LinearExpr::constant(0),
            ));
            let mut ge_diff = LinearExpr::term(1, x.clone());
            ge_diff.add_term(-1, s.clone()).add_term(1, t.clone());
            xor_constraints.push(Constraint::new(
                ge_diff,
                ConstraintOp::Ge,
                LinearExpr::constant(0),
            ));
            let mut ge_diff2 = LinearExpr::term(1, x.clone());
            ge_diff2.add_term(1, s.clone()).add_term(-1, t.clone());
            xor_constraints.push(Constraint::new(
                ge_diff2,
                ConstraintOp::Ge,
                LinearExpr::constant(0),
            ));
            let mut le_two = LinearExpr::term(1, x.clone());
            le_two.add_term(1, s).add_term(1, t);
            xor_constraints.push(Constraint::new(
                le_two,
                ConstraintOp::Le,
                LinearExpr::constant(2),
            ));
        }
        problem.add_section("xor linearization", xor_constraints);

        // ANDN boxes for size penalties: andn = a_src AND NOT a_tgt
        let mut andn_constraints = Vec::new();
        let mut size_expr = LinearExpr::new();
        for v in self.base.basic_blocks() {
            size_expr.add_term(self.base.cfg.node(v).size as i64, format!("a{}", v));
        }
        for c in &self.connections {
            let size_penalty = self.arch.jump_size_penalty(c.kind, c.displacement) as i64;
            if size_penalty == 0 {
                continue;
            }
            let n = Self::andn_var(c);
            let s = format!("a{}", c.source);
            let t = format!("a{}", c.target);
            size_expr.add_term(size_penalty, n.clone());
            let mut le_src = LinearExpr::term(1, n.clone());
            le_src.add_term(-1, s.clone());
            andn_constraints.push(Constraint::new(
                le_src,
                ConstraintOp::Le,
                LinearExpr::constant(0),
            ));
            let mut le_not_tgt = LinearExpr::term(1, n.clone());
            le_not_tgt.add_term(1, t.clone());
            andn_constraints.push(Constraint::new(
                le_not_tgt,
                ConstraintOp::Le,
                LinearExpr::constant(1),
            ));
            let mut ge_and = LinearExpr::term(1, n);
            ge_and.add_term(-1, s).add_term(1, t);
            andn_constraints.push(Constraint::new(
                ge_and,
                ConstraintOp::Ge,
                LinearExpr::constant(0),
            ));
        }
        problem.add_section("andn linearization", andn_constraints);

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

        for v in self.base.basic_blocks() {
            problem.declare_bin(format!("a{}", v));
        }
        problem.declare_int("sp");
        problem.declare_int("jp");
        Ok(problem)
    }

    pub fn estimated_jump_penalty(&self) -> u32 {
        self.base.ilp_jump_penalty
    }
}

impl SispOptimizer for BbsispJpOptimizer<'_> {
    fn build_formulation(&mut self) -> Result<String> {
        self.collect_connections();
        let formulation = self.jp_problem()?.serialize();
        info!(
            "BBSISP jump-penalty formulation over {} connections:\n{}",
            self.connections.len(),
            formulation
        );
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
        let mut results = self.base.base_results();
        results.estimated_jump_penalty = self.base.ilp_jump_penalty;
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::arch::Architecture;
    use crate::analyzer::graph::{EdgeKind, NodeKind};
    use crate::analyzer::isa::CarCoreIsa;

    fn jp_cfg() -> (ControlFlowGraph, NodeId, NodeId, NodeId, NodeId) {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.add_node(NodeKind::Meta, "entry");
        let exit = cfg.add_node(NodeKind::Meta, "exit");
        let a = cfg.add_node(NodeKind::BasicBlock, "a");
        let b = cfg.add_node(NodeKind::BasicBlock, "b");
        {
            let n = cfg.node_mut(a);
            n.start_address = 0x100;
            n.size = 16;
            n.code = "100: 02f1 mov d15, d1".to_string();
        }
        {
            let n = cfg.node_mut(b);
            n.start_address = 0x110;
            n.size = 16;
        }
        let e0 = cfg.add_edge(entry, a, EdgeKind::Meta);
        let e1 = cfg.add_edge(a, b, EdgeKind::ForwardStep);
        let e2 = cfg.add_edge(b, exit, EdgeKind::Meta);
        for e in [e0, e1, e2] {
            cfg.edge_mut(e).activation = 5;
        }
        {
            let edge = cfg.edge_mut(e1);
            edge.cost_onchip = 2;
            edge.cost_offchip = 10;
            edge.mem_penalty = 8;
        }
        (cfg, entry, exit, a, b)
    }

    #[test]
    fn test_jp_formulation_has_xor_box_and_jp() {
        let (cfg, entry, exit, a, b) = jp_cfg();
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        let isa = CarCoreIsa;
        let mut optimizer =
            BbsispJpOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32, &arch, &isa);
        let text = optimizer.build_formulation().unwrap();
        let xor = format!("xor{}00{}", a, b);
        // 4-inequality xor box
        assert_eq!(text.matches(&xor).count() >= 4, true, "formulation:\n{}", text);
        // continuous addressing crossing: penalty 2 cycles x activation 5
        assert!(text.contains(&format!("10 {}", xor)), "formulation:\n{}", text);
        assert!(text.contains("- jp"));
        // size penalty of 4 bytes through the andn variable
        assert!(text.contains(&format!("4 andn{}00{}", a, b)));
        assert!(text.contains("sp <= 32;"));
    }

    #[test]
    fn test_jp_variable_reported() {
        let (cfg, entry, exit, a, _b) = jp_cfg();
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        let isa = CarCoreIsa;
        let mut optimizer =
            BbsispJpOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32, &arch, &isa);
        optimizer.build_formulation().unwrap();
        let solution = LpSolution {
            status: LpSolutionType::OptimalSolution,
            objective: 30,
            values: vec![
                crate::analyzer::ilp::solver::LpResultEntry {
                    variable: format!("a{}", a),
                    value: 1,
                },
                crate::analyzer::ilp::solver::LpResultEntry {
                    variable: "jp".to_string(),
                    value: 10,
                },
                crate::analyzer::ilp::solver::LpResultEntry {
                    variable: "sp".to_string(),
                    value: 20,
                },
            ],
        };
        optimizer.apply_solution(&solution).unwrap();
        assert_eq!(optimizer.estimated_jump_penalty(), 10);
        assert_eq!(optimizer.results().estimated_jump_penalty, 10);
        assert_eq!(optimizer.block_assignment(), &[0x100]);
    }
}
