//! Virtual Inlining / Virtual Unrolling (VIVU)
//!
//! Turns the context-sensitive CFG into the memory state graph the data-flow
//! analyses operate on:
//!
//! 1. **Virtual inlining** copies every callee body once per call context, so
//!    the context stack of any MSG node is fully determined. Recursion is
//!    rejected.
//! 2. **Virtual unrolling** peels the first iteration of every loop: the
//!    original body becomes the first iteration, a copy becomes the steady
//!    state. Only the steady copy keeps its BackwardJump edge, which the
//!    memory analyses ignore, so the forward subgraph is acyclic.
//!
//! The MSG→CFG converter folds the DFA-computed dynamic penalties back into a
//! fresh CFG for the path analysis. The input CFG is never mutated.

use crate::analyzer::error::{AnalysisError, Result};
use crate::analyzer::graph::msg::{MemoryStateGraph, MsgEdgeId, MsgNodeId};
use crate::analyzer::graph::{
    CfgEdge, ContextStack, ControlFlowGraph, EdgeKind, NodeId, NodeKind,
};
use bitvec::prelude::*;
use log::debug;
use std::collections::HashMap;

/// The analyzed CFG together with its memory state graph.
#[derive(Debug, Clone)]
pub struct VivuGraph {
    pub cfg: ControlFlowGraph,
    pub msg: MemoryStateGraph,
}

/// Builds the MSG for a cost-annotated CFG.
pub struct VivuGraphCreator<'a> {
    cfg: &'a ControlFlowGraph,
    entry: NodeId,
    exit: NodeId,
    msg: MemoryStateGraph,
    next_context_id: u32,
}

impl<'a> VivuGraphCreator<'a> {
    pub fn new(cfg: &'a ControlFlowGraph, entry: NodeId, exit: NodeId) -> Self {
        VivuGraphCreator { cfg, entry, exit, msg: MemoryStateGraph::new(), next_context_id: 0 }
    }

    /// Run inlining and unrolling; returns the MSG paired with a copy of the
    /// input CFG.
    pub fn create_vivu_graph(mut self) -> Result<VivuGraph> {
        let super_entry = self.msg.add_node(self.entry, ContextStack::new());
        let super_exit = self.msg.add_node(self.exit, ContextStack::new());
        self.msg.entry = super_entry;
        self.msg.exit = super_exit;

        // the super entry leads to the root function's Entry node
        let root_edge = self
            .cfg
            .out_edges(self.entry)
            .next()
            .ok_or_else(|| AnalysisError::Precondition("super entry has no successor".into()))?;
        let root_entry_cfg = root_edge.target;
        if self.cfg.node(root_entry_cfg).kind != NodeKind::Entry {
            return Err(AnalysisError::Precondition(
                "super entry does not lead to a function entry".into(),
            ));
        }
        let (root_msg_entry, root_msg_exit) =
            self.inline_function(root_entry_cfg, &ContextStack::new())?;
        let e = self.msg.add_edge(super_entry, root_msg_entry, root_edge.kind);
        copy_edge_attrs(self.msg.edge_mut(e), root_edge);

        let exit_edge = self
            .cfg
            .in_edges(self.exit)
            .next()
            .ok_or_else(|| AnalysisError::Precondition("super exit has no predecessor".into()))?;
        let e = self.msg.add_edge(root_msg_exit, super_exit, exit_edge.kind);
        copy_edge_attrs(self.msg.edge_mut(e), exit_edge);

        peel_loops(self.cfg, &mut self.msg, &mut self.next_context_id);

        debug!(
            "VIVU produced {} nodes and {} edges from {} CFG nodes",
            self.msg.node_count(),
            self.msg.edge_count(),
            self.cfg.node_count()
        );
        Ok(VivuGraph { cfg: self.cfg.clone(), msg: self.msg })
    }

    /// Inline one function instance. `caller_context` is the context outside
    /// the call; the body nodes carry the context with the callee pushed.
    /// Returns the MSG copies of the function's Entry and Exit nodes.
    fn inline_function(
        &mut self,
        fentry: NodeId,
        caller_context: &ContextStack,
    ) -> Result<(MsgNodeId, MsgNodeId)> {
        let function_addr = self.cfg.node(fentry).start_address;
        if caller_context.contains(function_addr) {
            return Err(AnalysisError::Precondition(format!(
                "recursion detected: function 0x{:08X} reaches itself (context {})",
                function_addr, caller_context
            )));
        }
        let mut body_context = caller_context.clone();
        body_context.push(function_addr);

        // collect the function-local nodes: follow edges from the entry but
        // step over call sites via their paired return points
        let mut local: Vec<NodeId> = Vec::new();
        let mut seen: BitVec<u32> = bitvec![u32, Lsb0; 0; self.cfg.node_count()];
        let mut stack = vec![fentry];
        seen.set(fentry as usize, true);
        let mut fexit: Option<NodeId> = None;
        while let Some(n) = stack.pop() {
            local.push(n);
            let node = self.cfg.node(n);
            match node.kind {
                NodeKind::CallPoint => {
                    let rp = self.cfg.paired_return_point(n).ok_or_else(|| {
                        AnalysisError::Precondition(format!(
                            "call point {} has no matching return point",
                            node.name
                        ))
                    })?;
                    if !seen[rp as usize] {
                        seen.set(rp as usize, true);
                        stack.push(rp);
                    }
                }
                NodeKind::Exit => {
                    fexit = Some(n);
                    // the exit's successors belong to the caller
                }
                _ => {
                    for e in self.cfg.out_edges(n) {
                        if !seen[e.target as usize] {
                            seen.set(e.target as usize, true);
                            stack.push(e.target);
                        }
                    }
                }
            }
        }
        let fexit = fexit.ok_or_else(|| {
            AnalysisError::Precondition(format!(
                "function 0x{:08X} has no reachable exit",
                function_addr
            ))
        })?;

        // one MSG copy per local node; the Entry copy keeps the caller context
        let mut copy: HashMap<NodeId, MsgNodeId> = HashMap::new();
        for &n in &local {
            let context =
                if n == fentry { caller_context.clone() } else { body_context.clone() };
            let m = self.msg.add_node(n, context);
            copy.insert(n, m);
        }

        // fresh context ids so call/return pairs stay unique per instance
        for &n in &local {
            if self.cfg.node(n).kind == NodeKind::CallPoint {
                let rp = self.cfg.paired_return_point(n).expect("pair checked above");
                let id = self.next_context_id;
                self.next_context_id += 1;
                self.msg.node_mut(copy[&n]).context_id = id;
                self.msg.node_mut(copy[&rp]).context_id = id;
            }
        }

        // copy the intra-function edges; call plumbing is rebuilt below
        for &n in &local {
            if self.cfg.node(n).kind == NodeKind::CallPoint || n == fexit {
                continue;
            }
            for e in self.cfg.out_edges(n) {
                if let Some(&target_copy) = copy.get(&e.target) {
                    let me = self.msg.add_edge(copy[&n], target_copy, e.kind);
                    copy_edge_attrs(self.msg.edge_mut(me), e);
                }
            }
        }

        // inline every callee and connect it to its call/return points
        for &n in &local {
            if self.cfg.node(n).kind != NodeKind::CallPoint {
                continue;
            }
            let call_edge = self.cfg.out_edges(n).next().ok_or_else(|| {
                AnalysisError::Precondition(format!(
                    "call point {} has no out edge",
                    self.cfg.node(n).name
                ))
            })?;
            let callee_entry = call_edge.target;
            let rp = self.cfg.paired_return_point(n).expect("pair checked above");
            let return_edge = self
                .cfg
                .in_edges(rp)
                .next()
                .ok_or_else(|| {
                    AnalysisError::Precondition(format!(
                        "return point {} has no in edge",
                        self.cfg.node(rp).name
                    ))
                })?
                .clone();
            let call_edge = call_edge.clone();

            let (callee_msg_entry, callee_msg_exit) =
                self.inline_function(callee_entry, &body_context)?;
            let me = self.msg.add_edge(copy[&n], callee_msg_entry, call_edge.kind);
            copy_edge_attrs(self.msg.edge_mut(me), &call_edge);
            let me = self.msg.add_edge(callee_msg_exit, copy[&rp], return_edge.kind);
            copy_edge_attrs(self.msg.edge_mut(me), &return_edge);
        }

        Ok((copy[&fentry], copy[&fexit]))
    }
}

fn copy_edge_attrs(msg_edge: &mut crate::analyzer::graph::msg::MsgEdge, cfg_edge: &CfgEdge) {
    msg_edge.cost = cfg_edge.cost;
    msg_edge.cost_onchip = cfg_edge.cost_onchip;
    msg_edge.cost_offchip = cfg_edge.cost_offchip;
    msg_edge.mem_penalty = cfg_edge.mem_penalty;
    msg_edge.circulation = cfg_edge.circulation;
    msg_edge.static_flow = cfg_edge.static_flow;
}

/// Peel the first iteration of every loop present after inlining.
///
/// Loops are processed innermost first. For each loop head the original body
/// becomes the first iteration; a copy becomes the steady state. The back
/// edges are redirected to the steady head as forward edges carrying the
/// remaining iteration count (`bound − 1`), and only the steady copy keeps a
/// BackwardJump edge.
fn peel_loops(cfg: &ControlFlowGraph, msg: &mut MemoryStateGraph, next_context_id: &mut u32) {
    // group the back edges by loop head
    let mut heads: Vec<MsgNodeId> = Vec::new();
    for e in msg.edges() {
        if e.kind == EdgeKind::BackwardJump && !heads.contains(&e.target) {
            heads.push(e.target);
        }
    }
    // innermost loops have the smallest bodies
    heads.sort_by_key(|&h| loop_body_of_head(msg, h).count_ones());

    for head in heads {
        peel_one_loop(cfg, msg, head, next_context_id);
    }
}

fn loop_body_of_head(msg: &MemoryStateGraph, head: MsgNodeId) -> BitVec<u32> {
    let mut body: BitVec<u32> = bitvec![u32, Lsb0; 0; msg.node_count()];
    body.set(head as usize, true);
    let tails: Vec<MsgNodeId> = msg
        .in_edges(head)
        .filter(|e| e.kind == EdgeKind::BackwardJump)
        .map(|e| e.source)
        .collect();
    let mut stack = Vec::new();
    for t in tails {
        if !body[t as usize] {
            body.set(t as usize, true);
            stack.push(t);
        }
    }
    while let Some(n) = stack.pop() {
        for e in msg.in_edges(n) {
            if e.kind == EdgeKind::BackwardJump {
                continue;
            }
            if !body[e.source as usize] {
                body.set(e.source as usize, true);
                stack.push(e.source);
            }
        }
    }
    body
}

fn peel_one_loop(
    cfg: &ControlFlowGraph,
    msg: &mut MemoryStateGraph,
    head: MsgNodeId,
    next_context_id: &mut u32,
) {
    let body = loop_body_of_head(msg, head);

    // remaining iterations once the first one is peeled off
    let bound = msg
        .in_edges(head)
        .filter(|e| e.kind != EdgeKind::BackwardJump && e.circulation >= 0)
        .map(|e| e.circulation)
        .max();
    let steady_circulation = match bound {
        Some(b) => (b - 1).max(0),
        None => -1,
    };

    // duplicate the body
    let body_nodes: Vec<MsgNodeId> =
        (0..msg.node_count() as MsgNodeId).filter(|&n| body[n as usize]).collect();
    let mut copy: HashMap<MsgNodeId, MsgNodeId> = HashMap::new();
    for &n in &body_nodes {
        let node = msg.node(n).clone();
        let m = msg.add_node(node.cfg_node, node.context);
        msg.node_mut(m).context_id = node.context_id;
        copy.insert(n, m);
    }

    // remap duplicated call/return context ids pairwise so the copies form
    // their own matched pairs
    let mut id_map: HashMap<u32, u32> = HashMap::new();
    for &n in &body_nodes {
        let kind = cfg.node(msg.node(n).cfg_node).kind;
        if kind != NodeKind::CallPoint && kind != NodeKind::ReturnPoint {
            continue;
        }
        let old = msg.node(copy[&n]).context_id;
        let fresh = *id_map.entry(old).or_insert_with(|| {
            let id = *next_context_id;
            *next_context_id += 1;
            id
        });
        msg.node_mut(copy[&n]).context_id = fresh;
    }

    // copy the edges: intra-body edges (including inner back edges and this
    // loop's back edges) and the exit edges leaving the body
    let edge_snapshot: Vec<MsgEdgeId> = (0..msg.edge_count() as MsgEdgeId).collect();
    let mut back_edges: Vec<MsgEdgeId> = Vec::new();
    for e in edge_snapshot {
        let (source, target, kind) = {
            let edge = msg.edge(e);
            (edge.source, edge.target, edge.kind)
        };
        let src_in = body.get(source as usize).map(|b| *b).unwrap_or(false);
        let tgt_in = body.get(target as usize).map(|b| *b).unwrap_or(false);
        if src_in && tgt_in {
            let attrs = msg.edge(e).clone();
            let me = msg.add_edge(copy[&source], copy[&target], kind);
            let new_edge = msg.edge_mut(me);
            new_edge.cost = attrs.cost;
            new_edge.cost_onchip = attrs.cost_onchip;
            new_edge.cost_offchip = attrs.cost_offchip;
            new_edge.mem_penalty = attrs.mem_penalty;
            new_edge.circulation = attrs.circulation;
            new_edge.static_flow = attrs.static_flow;
            if kind == EdgeKind::BackwardJump && target == head {
                back_edges.push(e);
            }
        } else if src_in && !tgt_in {
            // loop exit: the steady copy can leave to the same successor
            let attrs = msg.edge(e).clone();
            let me = msg.add_edge(copy[&source], target, kind);
            let new_edge = msg.edge_mut(me);
            new_edge.cost = attrs.cost;
            new_edge.cost_onchip = attrs.cost_onchip;
            new_edge.cost_offchip = attrs.cost_offchip;
            new_edge.mem_penalty = attrs.mem_penalty;
            new_edge.circulation = attrs.circulation;
            new_edge.static_flow = attrs.static_flow;
        }
    }

    // redirect the original back edges into the steady head as forward edges
    let steady_head = copy[&head];
    for e in back_edges {
        msg.retarget_edge(e, steady_head);
        let edge = msg.edge_mut(e);
        edge.kind = EdgeKind::ForwardJump;
        edge.circulation = steady_circulation;
    }
}

/// Folds an analyzed MSG back into a fresh CFG.
///
/// Every MSG node becomes one CFG node inheriting the attributes of the
/// mapped CFG node; every MSG edge becomes one CFG edge whose memory penalty
/// is the DFA-computed dynamic penalty, summed into the off-chip cost.
pub struct MsgToCfgConverter<'a> {
    vivu: &'a VivuGraph,
}

impl<'a> MsgToCfgConverter<'a> {
    pub fn new(vivu: &'a VivuGraph) -> Self {
        MsgToCfgConverter { vivu }
    }

    pub fn convert(&self) -> (ControlFlowGraph, NodeId, NodeId) {
        let msg = &self.vivu.msg;
        let src_cfg = &self.vivu.cfg;
        let mut cfg = ControlFlowGraph::new();

        for m in msg.nodes() {
            let orig = src_cfg.node(m.cfg_node);
            let name = if m.context.is_empty() {
                orig.name.clone()
            } else {
                format!("{} [{}]", orig.name, m.context)
            };
            let id = cfg.add_node(orig.kind, name);
            let node = cfg.node_mut(id);
            node.start_address = orig.start_address;
            node.end_address = orig.end_address;
            node.size = orig.size;
            node.instruction_count = orig.instruction_count;
            node.code = orig.code.clone();
            node.call_target = orig.call_target;
            node.context_id = m.context_id;
            node.cache_hits = m.cache_hits;
            node.cache_misses = m.cache_misses;
            node.cache_ncs = m.cache_ncs;
        }
        for e in msg.edges() {
            let id = cfg.add_edge(e.source, e.target, e.kind);
            let edge = cfg.edge_mut(id);
            edge.cost = e.cost;
            edge.cost_onchip = e.cost_onchip;
            edge.cost_offchip = e.cost_offchip + e.dynamic_penalty;
            edge.mem_penalty = e.mem_penalty + e.dynamic_penalty;
            edge.circulation = e.circulation;
            edge.static_flow = e.static_flow;
        }
        (cfg, msg.entry, msg.exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::graph::NodeKind;

    /// main: entry -> bb1 -> call f -> bb2 -> exit, f: entry -> fb -> exit
    fn call_cfg() -> (ControlFlowGraph, NodeId, NodeId) {
        let mut cfg = ControlFlowGraph::new();
        let super_entry = cfg.add_node(NodeKind::Meta, "super_entry");
        let super_exit = cfg.add_node(NodeKind::Meta, "super_exit");
        let m_entry = cfg.add_node(NodeKind::Entry, "main_entry");
        let m_exit = cfg.add_node(NodeKind::Exit, "main_exit");
        let bb1 = cfg.add_node(NodeKind::BasicBlock, "0x100");
        let bb2 = cfg.add_node(NodeKind::BasicBlock, "0x108");
        let f_entry = cfg.add_node(NodeKind::Entry, "f_entry");
        let f_exit = cfg.add_node(NodeKind::Exit, "f_exit");
        let fb = cfg.add_node(NodeKind::BasicBlock, "0x200");
        let cp = cfg.add_node(NodeKind::CallPoint, "call_f");
        let rp = cfg.add_node(NodeKind::ReturnPoint, "ret_f");
        cfg.node_mut(m_entry).start_address = 0x100;
        cfg.node_mut(f_entry).start_address = 0x200;
        cfg.node_mut(fb).start_address = 0x200;
        for id in [cp, rp] {
            let n = cfg.node_mut(id);
            n.end_address = 0x104;
            n.context_id = 0;
            n.call_target = 0x200;
        }
        cfg.add_edge(super_entry, m_entry, EdgeKind::Meta);
        cfg.add_edge(m_entry, bb1, EdgeKind::Meta);
        cfg.add_edge(bb1, cp, EdgeKind::Meta);
        cfg.add_edge(cp, f_entry, EdgeKind::Meta);
        cfg.add_edge(f_entry, fb, EdgeKind::Meta);
        cfg.add_edge(fb, f_exit, EdgeKind::Meta);
        cfg.add_edge(f_exit, rp, EdgeKind::Meta);
        cfg.add_edge(rp, bb2, EdgeKind::Meta);
        cfg.add_edge(bb2, m_exit, EdgeKind::Meta);
        cfg.add_edge(m_exit, super_exit, EdgeKind::Meta);
        (cfg, super_entry, super_exit)
    }

    #[test]
    fn test_inlining_copies_callee_per_context() {
        let (cfg, entry, exit) = call_cfg();
        let vivu = VivuGraphCreator::new(&cfg, entry, exit).create_vivu_graph().unwrap();
        // one copy per CFG node here (single call site)
        assert_eq!(vivu.msg.node_count(), cfg.node_count());
        assert!(vivu.msg.is_forward_acyclic());
        // the callee body node carries the main>f context
        let fb_copy = vivu
            .msg
            .nodes()
            .find(|m| vivu.cfg.node(m.cfg_node).name == "0x200")
            .unwrap();
        assert_eq!(fb_copy.context.depth(), 2);
        assert_eq!(fb_copy.context.top(), Some(0x200));
    }

    #[test]
    fn test_recursion_rejected() {
        let (mut cfg, entry, exit) = call_cfg();
        // make f call itself: add a call site inside f's body
        let cp2 = cfg.add_node(NodeKind::CallPoint, "call_f_rec");
        let rp2 = cfg.add_node(NodeKind::ReturnPoint, "ret_f_rec");
        for id in [cp2, rp2] {
            let n = cfg.node_mut(id);
            n.end_address = 0x204;
            n.context_id = 1;
            n.call_target = 0x200;
        }
        let fb = cfg.nodes().find(|n| n.name == "0x200").unwrap().id;
        let f_entry = cfg.nodes().find(|n| n.name == "f_entry").unwrap().id;
        let f_exit = cfg.nodes().find(|n| n.name == "f_exit").unwrap().id;
        cfg.add_edge(fb, cp2, EdgeKind::Meta);
        cfg.add_edge(cp2, f_entry, EdgeKind::Meta);
        cfg.add_edge(f_exit, rp2, EdgeKind::Meta);
        cfg.add_edge(rp2, f_exit, EdgeKind::Meta);

        let result = VivuGraphCreator::new(&cfg, entry, exit).create_vivu_graph();
        assert!(matches!(result, Err(AnalysisError::Precondition(_))));
    }

    /// entry -> head -> body -> head (back, bound 3 on inject), body -> exit
    fn loop_msg() -> VivuGraph {
        let mut cfg = ControlFlowGraph::new();
        let super_entry = cfg.add_node(NodeKind::Meta, "super_entry");
        let super_exit = cfg.add_node(NodeKind::Meta, "super_exit");
        let m_entry = cfg.add_node(NodeKind::Entry, "main_entry");
        let m_exit = cfg.add_node(NodeKind::Exit, "main_exit");
        let head = cfg.add_node(NodeKind::BasicBlock, "head");
        let body = cfg.add_node(NodeKind::BasicBlock, "body");
        cfg.node_mut(m_entry).start_address = 0x100;
        cfg.add_edge(super_entry, m_entry, EdgeKind::Meta);
        let inject = cfg.add_edge(m_entry, head, EdgeKind::Meta);
        cfg.edge_mut(inject).circulation = 3;
        cfg.add_edge(head, body, EdgeKind::ForwardStep);
        cfg.add_edge(body, head, EdgeKind::BackwardJump);
        cfg.add_edge(body, m_exit, EdgeKind::ForwardJump);
        cfg.add_edge(m_exit, super_exit, EdgeKind::Meta);
        VivuGraphCreator::new(&cfg, super_entry, super_exit).create_vivu_graph().unwrap()
    }

    #[test]
    fn test_peeling_duplicates_loop_body() {
        let vivu = loop_msg();
        let msg = &vivu.msg;
        // head and body are duplicated: 6 original copies + 2 peel copies
        assert_eq!(msg.node_count(), 8);
        assert!(msg.is_forward_acyclic());
        // exactly one BackwardJump remains, in the steady copy
        let backs: Vec<_> = msg.edges().filter(|e| e.kind == EdgeKind::BackwardJump).collect();
        assert_eq!(backs.len(), 1);
        // the redirected edge into the steady head carries bound-1
        let steady_head = backs[0].target;
        let inject: Vec<_> = msg
            .in_edges(steady_head)
            .filter(|e| e.kind != EdgeKind::BackwardJump)
            .collect();
        assert_eq!(inject.len(), 1);
        assert_eq!(inject[0].circulation, 2);
    }

    #[test]
    fn test_converter_preserves_structure_and_adds_penalty() {
        let mut vivu = loop_msg();
        // pretend the DFA charged 7 cycles on the first-iteration head edge
        let head_edge = vivu
            .msg
            .edges()
            .find(|e| e.kind == EdgeKind::ForwardStep)
            .map(|e| e.id)
            .unwrap();
        vivu.msg.edge_mut(head_edge).dynamic_penalty = 7;

        let (cfg, entry, exit) = MsgToCfgConverter::new(&vivu).convert();
        assert_eq!(cfg.node_count(), vivu.msg.node_count());
        assert_eq!(cfg.edge_count(), vivu.msg.edge_count());
        assert_eq!(cfg.node(entry).kind, NodeKind::Meta);
        assert_eq!(cfg.node(exit).kind, NodeKind::Meta);
        let converted = cfg
            .edges()
            .find(|e| e.mem_penalty == 7)
            .expect("dynamic penalty folded into the converted edge");
        assert_eq!(converted.cost_offchip, 7);
    }
}
