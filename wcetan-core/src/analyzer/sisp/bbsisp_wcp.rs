//! WCP-sensitive basic-block allocation.
//!
//! Instead of rewarding blocks for the baseline worst-case path, this
//! formulation embeds a per-node WCET computation into the allocation ILP
//! itself, so the assignment directly alters the worst-case path:
//!
//! - `w<v>` bounds the cost from node `v` to the end of its region,
//! - `ce<s>t<t>` is the edge cost `off_chip − benefit · a<s>`,
//! - `cl<i>` accumulates a loop's cost from its bound and head,
//! - `cf<i>` the cost of a function body, connected per call context
//!   through `wf<i>c<addr>`,
//! - the objective minimizes `wentry` (optionally `1e10·wentry − sp` to
//!   fill the scratchpad at equal timing).
//!
//! Loops and called functions are processed recursively along the CFG, as
//! nested regions between a start and an end node.

use crate::analyzer::arch::{ArchConfig, ConnectionType, DisplacementType};
use crate::analyzer::config::AnalysisMetric;
use crate::analyzer::cost::{first_block_of_callee, last_block_of_callee};
use crate::analyzer::error::{AnalysisError, Result};
use crate::analyzer::graph::loop_helper::LoopHelper;
use crate::analyzer::graph::{CfgEdge, ControlFlowGraph, EdgeId, EdgeKind, NodeId, NodeKind};
use crate::analyzer::ilp::solver::{LpSolution, LpSolutionType};
use crate::analyzer::ilp::{Constraint, ConstraintOp, Direction, IlpProblem, LinearExpr};
use crate::analyzer::isa::IsaHelper;
use crate::analyzer::program::FunctionInfo;
use crate::analyzer::sisp::{function_membership_constraints, SispBase, SispOptimizer, SispResult};
use log::{debug, info};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct LoopData {
    back_edge: EdgeId,
    start_node: NodeId,
    exit_node: NodeId,
    bound: i64,
}

/// Jump-penalty extension state for the JP-WCP variant.
pub(crate) struct JumpPenalties<'a> {
    pub arch: &'a ArchConfig,
    pub isa: &'a dyn IsaHelper,
    /// (source block, target block) pairs that received an XOR variable.
    xor_pairs: Vec<(NodeId, NodeId)>,
}

pub struct BbsispWcpOptimizer<'a> {
    base: SispBase,
    fill_isp_up: bool,
    shrink_formulation: bool,
    jump_penalties: Option<JumpPenalties<'a>>,
    /// Whole-function granularity: alias the block indicators per function.
    membership_functions: Option<Vec<FunctionInfo>>,
    loop_map: HashMap<NodeId, LoopData>,
    function_map: HashMap<NodeId, u32>,
    cfg_constraints: Vec<Constraint>,
    ce_vars: Vec<(EdgeId, String)>,
}

impl<'a> BbsispWcpOptimizer<'a> {
    pub fn new(
        cfg: ControlFlowGraph,
        entry: NodeId,
        exit: NodeId,
        metric: AnalysisMetric,
        sisp_size: u32,
        fill_isp_up: bool,
        shrink_formulation: bool,
    ) -> Self {
        BbsispWcpOptimizer {
            base: SispBase::new(cfg, entry, exit, metric, sisp_size),
            fill_isp_up,
            shrink_formulation,
            jump_penalties: None,
            membership_functions: None,
            loop_map: HashMap::new(),
            function_map: HashMap::new(),
            cfg_constraints: Vec::new(),
            ce_vars: Vec::new(),
        }
    }

    /// Enable the jump-penalty terms (JP-WCP variant).
    pub(crate) fn with_jump_penalties(mut self, arch: &'a ArchConfig, isa: &'a dyn IsaHelper) -> Self {
        self.jump_penalties = Some(JumpPenalties { arch, isa, xor_pairs: Vec::new() });
        self
    }

    /// Force whole-function assignment (FSISP_WCP variant).
    pub(crate) fn with_function_membership(mut self, functions: Vec<FunctionInfo>) -> Self {
        self.membership_functions = Some(functions);
        self
    }

    pub fn estimated_wcet(&self) -> u64 {
        self.base.ilp_wcet_estimate
    }

    fn benefit_of_edge(e: &CfgEdge) -> i64 {
        (e.cost_offchip - e.cost_onchip) as i64
    }

    fn ce_var(e: &CfgEdge) -> String {
        format!("ce{}t{}", e.source, e.target)
    }

    /// Cost contribution of traversing `e`, `multiplier` times.
    fn edge_cost_expr(&mut self, e: &CfgEdge, multiplier: i64) -> LinearExpr {
        if self.shrink_formulation {
            let mut expr = LinearExpr::constant(multiplier * e.cost_offchip as i64);
            let benefit = Self::benefit_of_edge(e);
            if benefit != 0 {
                expr.add_term(-multiplier * benefit, format!("a{}", e.source));
            }
            expr
        } else {
            let variable = Self::ce_var(e);
            if !self.ce_vars.iter().any(|(id, _)| *id == e.id) {
                self.ce_vars.push((e.id, variable.clone()));
            }
            LinearExpr::term(multiplier, variable)
        }
    }

    fn register_loop_heads(&mut self) {
        let helper = LoopHelper::new(&self.base.cfg, self.base.entry);
        for lp in helper.find_loops() {
            let Some(bound) = helper.loop_bound_of_head(lp.start_node) else { continue };
            if bound <= 0 {
                continue;
            }
            debug!(
                "registered loop: head {} exit {} bound {}",
                self.base.cfg.node(lp.start_node).name,
                self.base.cfg.node(lp.exit_node).name,
                bound
            );
            self.loop_map.insert(
                lp.start_node,
                LoopData {
                    back_edge: lp.back_edge,
                    start_node: lp.start_node,
                    exit_node: lp.exit_node,
                    bound,
                },
            );
        }
    }

    /// Extra cost of entering a function whose first block may live in the
    /// other memory than the calling block.
    fn function_entry_penalty(&mut self, call_point: NodeId) -> LinearExpr {
        let Some(jp) = self.jump_penalties.as_mut() else { return LinearExpr::new() };
        let cfg = &self.base.cfg;
        let Some(caller_edge) = cfg.in_edges(call_point).next() else {
            return LinearExpr::new();
        };
        let caller_bb = caller_edge.source;
        if cfg.node(caller_bb).kind != NodeKind::BasicBlock {
            return LinearExpr::new();
        }
        let Some(callee_first) = first_block_of_callee(cfg, call_point) else {
            return LinearExpr::new();
        };
        let displacement = jp.isa.displacement_type(&cfg.node(caller_bb).code);
        let penalty = jp.arch.jump_penalty(ConnectionType::Call, displacement) as i64;
        if penalty == 0 {
            return LinearExpr::new();
        }
        jp.xor_pairs.push((caller_bb, callee_first));
        LinearExpr::term(penalty, format!("xor{}00{}", caller_bb, callee_first))
    }

    /// Extra cost of returning across the memory boundary.
    fn function_exit_penalty(&mut self, return_point: NodeId) -> LinearExpr {
        let Some(jp) = self.jump_penalties.as_mut() else { return LinearExpr::new() };
        let cfg = &self.base.cfg;
        let Some(callee_last) = last_block_of_callee(cfg, return_point) else {
            return LinearExpr::new();
        };
        let Some(return_edge) = cfg.out_edges(return_point).next() else {
            return LinearExpr::new();
        };
        let return_bb = return_edge.target;
        if cfg.node(return_bb).kind != NodeKind::BasicBlock {
            return LinearExpr::new();
        }
        let penalty =
            jp.arch.jump_penalty(ConnectionType::Return, DisplacementType::Indirect) as i64;
        if penalty == 0 {
            return LinearExpr::new();
        }
        jp.xor_pairs.push((callee_last, return_bb));
        LinearExpr::term(penalty, format!("xor{}00{}", callee_last, return_bb))
    }

    /// Emit the `w`/`wl`/`cl`/`cf` constraints for the region from `start`
    /// to `end`; returns the next free running id.
    fn emit_region(
        &mut self,
        start: NodeId,
        end: NodeId,
        mut running_id: u32,
        leaving_edges: &mut Vec<EdgeId>,
    ) -> Result<u32> {
        let mut processing = vec![start];
        let mut processed: Vec<NodeId> = Vec::new();

        debug!(
            "processing region from {} to {}",
            self.base.cfg.node(start).name,
            self.base.cfg.node(end).name
        );

        while let Some(actual) = processing.pop() {
            if processed.contains(&actual) {
                continue;
            }
            processed.push(actual);

            if actual == end {
                self.cfg_constraints.push(Constraint::new(
                    LinearExpr::term(1, format!("w{}", actual)),
                    ConstraintOp::Eq,
                    LinearExpr::constant(0),
                ));
                continue;
            }

            if self.base.cfg.node(actual).kind == NodeKind::CallPoint {
                running_id = self.emit_call(actual, running_id, &mut processing)?;
                continue;
            }

            for e in self.base.cfg.out_edge_ids(actual) {
                let (kind, target) = {
                    let edge = self.base.cfg.edge(e);
                    (edge.kind, edge.target)
                };
                if !matches!(
                    kind,
                    EdgeKind::ForwardStep | EdgeKind::ForwardJump | EdgeKind::Meta
                ) {
                    continue;
                }

                let loop_data = self
                    .loop_map
                    .get(&target)
                    .copied()
                    .filter(|ld| target != start && ld.exit_node != end);

                if let Some(ld) = loop_data {
                    running_id =
                        self.emit_loop(actual, e, ld, running_id, &mut processing, leaving_edges)?;
                } else {
                    let helper = LoopHelper::new(&self.base.cfg, self.base.entry);
                    let on_path = helper.is_node_on_path(target, start, end);
                    drop(helper);
                    let lhs = LinearExpr::term(1, format!("w{}", actual));
                    let mut rhs = LinearExpr::new();
                    if on_path {
                        rhs.add_term(1, format!("w{}", target));
                    }
                    if self.base.cfg.node(actual).kind == NodeKind::BasicBlock {
                        let edge = self.base.cfg.edge(e).clone();
                        let cost = self.edge_cost_expr(&edge, 1);
                        rhs.terms.extend(cost.terms);
                        rhs.constant += cost.constant;
                    }
                    self.cfg_constraints.push(Constraint::new(lhs, ConstraintOp::Ge, rhs));
                    if on_path {
                        processing.push(target);
                    } else {
                        debug!(
                            "edge {} leaves the region, delegating to the outer level",
                            self.base.cfg.edge(e).label
                        );
                        leaving_edges.push(e);
                    }
                }
            }
        }
        Ok(running_id)
    }

    fn emit_call(
        &mut self,
        call_point: NodeId,
        mut running_id: u32,
        processing: &mut Vec<NodeId>,
    ) -> Result<u32> {
        let return_point = self.base.cfg.paired_return_point(call_point).ok_or_else(|| {
            AnalysisError::Precondition(format!(
                "call point {} has no matching return point",
                self.base.cfg.node(call_point).name
            ))
        })?;
        let context_addr = self.base.cfg.node(call_point).end_address;
        let function_entry = self.base.cfg.single_successor(call_point).ok_or_else(|| {
            AnalysisError::Precondition("call point without callee entry".into())
        })?;
        let function_exit = self.base.cfg.single_predecessor(return_point).ok_or_else(|| {
            AnalysisError::Precondition("return point without callee exit".into())
        })?;

        let function_id = match self.function_map.get(&function_entry) {
            Some(&id) => id,
            None => {
                let id = running_id;
                running_id += 1;
                let mut function_leaving = Vec::new();
                running_id =
                    self.emit_region(function_entry, function_exit, running_id, &mut function_leaving)?;
                if !function_leaving.is_empty() {
                    return Err(AnalysisError::Precondition(
                        "control flow leaves a function body irregularly".into(),
                    ));
                }
                self.function_map.insert(function_entry, id);
                self.cfg_constraints.push(Constraint::new(
                    LinearExpr::term(1, format!("cf{}", id)),
                    ConstraintOp::Eq,
                    LinearExpr::term(1, format!("w{}", function_entry)),
                ));
                id
            }
        };

        // connect the call point to the per-context function node and that
        // to the return point, charging the function cost once
        let wf = format!("wf{}c{:x}", function_id, context_addr);
        let entry_penalty = self.function_entry_penalty(call_point);
        let mut rhs = LinearExpr::term(1, wf.clone());
        rhs.terms.extend(entry_penalty.terms);
        self.cfg_constraints.push(Constraint::new(
            LinearExpr::term(1, format!("w{}", call_point)),
            ConstraintOp::Ge,
            rhs,
        ));

        let exit_penalty = self.function_exit_penalty(return_point);
        let mut rhs = LinearExpr::term(1, format!("w{}", return_point));
        rhs.add_term(1, format!("cf{}", function_id));
        rhs.terms.extend(exit_penalty.terms);
        self.cfg_constraints.push(Constraint::new(
            LinearExpr::term(1, wf),
            ConstraintOp::Ge,
            rhs,
        ));

        processing.push(return_point);
        Ok(running_id)
    }

    fn emit_loop(
        &mut self,
        actual: NodeId,
        entering_edge: EdgeId,
        ld: LoopData,
        mut running_id: u32,
        processing: &mut Vec<NodeId>,
        leaving_edges: &mut Vec<EdgeId>,
    ) -> Result<u32> {
        let loop_id = running_id;
        running_id += 1;

        // loop cost: the body runs bound+1 times, the loop-conserving edge
        // bound times (the last iteration leaves through an exit edge)
        let back_edge = self.base.cfg.edge(ld.back_edge).clone();
        if self.base.cfg.node(back_edge.source).kind != NodeKind::BasicBlock {
            return Err(AnalysisError::Precondition(format!(
                "loop conserving edge {} does not leave a basic block",
                back_edge.label
            )));
        }
        let mut cl_rhs = LinearExpr::term(ld.bound + 1, format!("w{}", ld.start_node));
        let back_cost = self.edge_cost_expr(&back_edge, ld.bound);
        cl_rhs.terms.extend(back_cost.terms);
        cl_rhs.constant += back_cost.constant;
        self.cfg_constraints.push(Constraint::new(
            LinearExpr::term(1, format!("cl{}", loop_id)),
            ConstraintOp::Eq,
            cl_rhs,
        ));

        // the loop body is its own region
        let mut irregular_exits = Vec::new();
        running_id = self.emit_region(ld.start_node, ld.exit_node, running_id, &mut irregular_exits)?;

        // connect the predecessor to the virtual loop node
        let mut rhs = LinearExpr::term(1, format!("wl{}", loop_id));
        if self.base.cfg.node(actual).kind == NodeKind::BasicBlock {
            let edge = self.base.cfg.edge(entering_edge).clone();
            let cost = self.edge_cost_expr(&edge, 1);
            rhs.terms.extend(cost.terms);
            rhs.constant += cost.constant;
        }
        self.cfg_constraints.push(Constraint::new(
            LinearExpr::term(1, format!("w{}", actual)),
            ConstraintOp::Ge,
            rhs,
        ));

        // the loop is left over the exit node's forward successors
        for e in self.base.cfg.out_edge_ids(ld.exit_node) {
            let edge = self.base.cfg.edge(e).clone();
            if !matches!(edge.kind, EdgeKind::ForwardStep | EdgeKind::ForwardJump | EdgeKind::Meta)
            {
                continue;
            }
            let post_loop = edge.target;
            let mut rhs = LinearExpr::term(1, format!("w{}", post_loop));
            rhs.add_term(1, format!("cl{}", loop_id));
            let cost = self.edge_cost_expr(&edge, 1);
            rhs.terms.extend(cost.terms);
            rhs.constant += cost.constant;
            self.cfg_constraints.push(Constraint::new(
                LinearExpr::term(1, format!("wl{}", loop_id)),
                ConstraintOp::Ge,
                rhs,
            ));
            processing.push(post_loop);
        }

        // irregular exits bypass the loop structure: their target is still
        // bounded by the loop cost
        for e in irregular_exits {
            let target = self.base.cfg.edge(e).target;
            let helper = LoopHelper::new(&self.base.cfg, self.base.entry);
            let inside = helper.is_node_on_path(target, self.base.entry, self.base.exit);
            drop(helper);
            if !inside {
                leaving_edges.push(e);
                return Err(AnalysisError::Precondition(
                    "irregular loop exit leaves multiple loop levels".into(),
                ));
            }
            let mut rhs = LinearExpr::term(1, format!("w{}", target));
            rhs.add_term(1, format!("cl{}", loop_id));
            self.cfg_constraints.push(Constraint::new(
                LinearExpr::term(1, format!("wl{}", loop_id)),
                ConstraintOp::Ge,
                rhs,
            ));
            processing.push(target);
        }

        Ok(running_id)
    }

    fn wcp_problem(&mut self) -> Result<IlpProblem> {
        self.loop_map.clear();
        self.function_map.clear();
        self.cfg_constraints.clear();
        self.ce_vars.clear();
        if let Some(jp) = self.jump_penalties.as_mut() {
            jp.xor_pairs.clear();
        }

        self.register_loop_heads();

        // wentry bounds the whole program
        self.cfg_constraints.push(Constraint::new(
            LinearExpr::term(1, "wentry"),
            ConstraintOp::Ge,
            LinearExpr::term(1, "cl0"),
        ));
        self.cfg_constraints.push(Constraint::new(
            LinearExpr::term(1, "cl0"),
            ConstraintOp::Eq,
            LinearExpr::term(1, format!("w{}", self.base.entry)),
        ));

        let mut leaving = Vec::new();
        self.emit_region(self.base.entry, self.base.exit, 1, &mut leaving)?;
        if !leaving.is_empty() {
            return Err(AnalysisError::Precondition(
                "control flow leaves the outermost region".into(),
            ));
        }

        let objective = if self.fill_isp_up {
            let mut o = LinearExpr::term(10_000_000_000, "wentry");
            o.add_term(-1, "sp");
            o
        } else {
            LinearExpr::term(1, "wentry")
        };
        let mut problem = IlpProblem::new(Direction::Minimize, objective);
        problem.add_section("flow constraints", std::mem::take(&mut self.cfg_constraints));

        // edge cost definitions (unless inlined by the shrink toggle)
        if !self.shrink_formulation {
            let mut block_costs = Vec::new();
            for (edge_id, variable) in &self.ce_vars {
                let e = self.base.cfg.edge(*edge_id);
                let mut rhs = LinearExpr::constant(e.cost_offchip as i64);
                let benefit = Self::benefit_of_edge(e);
                if benefit != 0 {
                    rhs.add_term(-benefit, format!("a{}", e.source));
                }
                block_costs.push(Constraint::new(
                    LinearExpr::term(1, variable.clone()),
                    ConstraintOp::Eq,
                    rhs,
                ));
            }
            problem.add_section("basic block cost constraints", block_costs);
        }

        // xor boxes of the jump-penalty variant
        if let Some(jp) = &self.jump_penalties {
            let mut xor_constraints = Vec::new();
            for &(s, t) in &jp.xor_pairs {
                let x = format!("xor{}00{}", s, t);
                let sa = format!("a{}", s);
                let ta = format!("a{}", t);
                let mut c1 = LinearExpr::term(1, x.clone());
                c1.add_term(-1, sa.clone()).add_term(-1, ta.clone());
                xor_constraints
                    .push(Constraint::new(c1, ConstraintOp::Le, LinearExpr::constant(0)));
                let mut c2 = LinearExpr::term(1, x.clone());
                c2.add_term(-1, sa.clone()).add_term(1, ta.clone());
                xor_constraints
                    .push(Constraint::new(c2, ConstraintOp::Ge, LinearExpr::constant(0)));
                let mut c3 = LinearExpr::term(1, x.clone());
                c3.add_term(1, sa.clone()).add_term(-1, ta.clone());
                xor_constraints
                    .push(Constraint::new(c3, ConstraintOp::Ge, LinearExpr::constant(0)));
                let mut c4 = LinearExpr::term(1, x);
                c4.add_term(1, sa).add_term(1, ta);
                xor_constraints
                    .push(Constraint::new(c4, ConstraintOp::Le, LinearExpr::constant(2)));
            }
            problem.add_section("xor linearization", xor_constraints);
        }

        // whole-function aliasing of the block indicators
        if let Some(functions) = &self.membership_functions {
            let (constraints, function_bins) =
                function_membership_constraints(&self.base.cfg, functions);
            problem.add_section("function membership constraints", constraints);
            for f in function_bins {
                problem.declare_bin(f);
            }
        }

        // size constraint and binary domains
        let mut size_expr = LinearExpr::new();
        for v in self.base.basic_blocks() {
            size_expr.add_term(self.base.cfg.node(v).size as i64, format!("a{}", v));
            problem.declare_bin(format!("a{}", v));
        }
        size_expr.add_term(-1, "sp");
        problem.add_section(
            "basic block size constraints",
            vec![
                Constraint::new(size_expr, ConstraintOp::Eq, LinearExpr::constant(0)),
                Constraint::new(
                    LinearExpr::term(1, "sp"),
                    ConstraintOp::Le,
                    LinearExpr::constant(self.base.sisp_size as i64),
                ),
            ],
        );
        problem.declare_int("sp");
        Ok(problem)
    }
}

impl SispOptimizer for BbsispWcpOptimizer<'_> {
    fn build_formulation(&mut self) -> Result<String> {
        let formulation = self.wcp_problem()?.serialize();
        info!("WCP-sensitive BBSISP formulation:\n{}", formulation);
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
        results.estimated_timing = self.base.ilp_wcet_estimate;
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::graph::NodeKind;
    use crate::analyzer::ilp::solver::LpResultEntry;

    /// entry -> a -> head -> body -> head (bound 3), body -> b -> exit
    fn wcp_cfg() -> (ControlFlowGraph, NodeId, NodeId) {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.add_node(NodeKind::Meta, "entry");
        let a = cfg.add_node(NodeKind::BasicBlock, "a");
        let head = cfg.add_node(NodeKind::BasicBlock, "head");
        let body = cfg.add_node(NodeKind::BasicBlock, "body");
        let b = cfg.add_node(NodeKind::BasicBlock, "b");
        let exit = cfg.add_node(NodeKind::Meta, "exit");
        for (n, addr) in [(a, 0x100u32), (head, 0x110), (body, 0x120), (b, 0x130)] {
            let node = cfg.node_mut(n);
            node.start_address = addr;
            node.size = 16;
        }
        cfg.add_edge(entry, a, EdgeKind::Meta);
        let inject = cfg.add_edge(a, head, EdgeKind::ForwardStep);
        cfg.edge_mut(inject).circulation = 3;
        cfg.add_edge(head, body, EdgeKind::ForwardStep);
        cfg.add_edge(body, head, EdgeKind::BackwardJump);
        cfg.add_edge(body, b, EdgeKind::ForwardJump);
        cfg.add_edge(b, exit, EdgeKind::Meta);
        for e in cfg.edge_ids() {
            let edge = cfg.edge_mut(e);
            edge.cost_onchip = 1;
            edge.cost_offchip = 5;
            edge.mem_penalty = 4;
        }
        (cfg, entry, exit)
    }

    #[test]
    fn test_wcp_formulation_structure() {
        let (cfg, entry, exit) = wcp_cfg();
        let mut optimizer =
            BbsispWcpOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32, false, false);
        let text = optimizer.build_formulation().unwrap();
        assert!(text.starts_with("// Objective function:\nmin: wentry;"), "{}", text);
        assert!(text.contains("wentry >= cl0;"));
        assert!(text.contains(&format!("cl0 = w{};", entry)));
        // the loop cost runs the head bound+1 times and the back edge bound
        // times
        assert!(text.contains("cl1 = 4 w2 + 3 ce3t2;"), "{}", text);
        // edge cost definition of the back edge
        assert!(text.contains("ce3t2 = -4 a3 + 5;"), "{}", text);
        // the end of the outer region is pinned to zero
        assert!(text.contains(&format!("w{} = 0;", exit)));
        assert!(text.contains("sp <= 32;"));
    }

    #[test]
    fn test_wcp_shrink_inlines_edge_costs() {
        let (cfg, entry, exit) = wcp_cfg();
        let mut optimizer =
            BbsispWcpOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32, false, true);
        let text = optimizer.build_formulation().unwrap();
        assert!(!text.contains("ce3t2 ="));
        // the inlined back-edge cost appears scaled by the bound
        assert!(text.contains("cl1 = 4 w2 - 12 a3 + 15;"), "{}", text);
    }

    #[test]
    fn test_fill_isp_objective() {
        let (cfg, entry, exit) = wcp_cfg();
        let mut optimizer =
            BbsispWcpOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32, true, false);
        let text = optimizer.build_formulation().unwrap();
        assert!(text.contains("min: 10000000000 wentry - sp;"));
    }

    #[test]
    fn test_wcp_estimate_reported() {
        let (cfg, entry, exit) = wcp_cfg();
        let mut optimizer =
            BbsispWcpOptimizer::new(cfg, entry, exit, AnalysisMetric::Wcet, 32, false, false);
        optimizer.build_formulation().unwrap();
        let solution = LpSolution {
            status: LpSolutionType::OptimalSolution,
            objective: 40,
            values: vec![
                LpResultEntry { variable: "wentry".into(), value: 40 },
                LpResultEntry { variable: "sp".into(), value: 16 },
                LpResultEntry { variable: "a2".into(), value: 1 },
            ],
        };
        optimizer.apply_solution(&solution).unwrap();
        assert_eq!(optimizer.estimated_wcet(), 40);
        assert_eq!(optimizer.results().estimated_timing, 40);
        assert_eq!(optimizer.block_assignment(), &[0x110]);
    }
}
