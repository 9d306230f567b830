//! Control Flow Graph Data Model
//!
//! This module provides the typed control-flow graph that every analysis
//! phase operates on. Instead of untyped per-attribute property maps the
//! graph stores one record per node and per edge with named fields, so the
//! attributes each phase reads and writes are visible in the type.
//!
//! # Graph Properties
//! - Directed, may contain cycles (loops)
//! - Node and edge ids are `u32` indices into dense vectors
//! - Adjacency lists use `SmallVec<[u32; 2]>` (most nodes have ≤2 edges)
//! - Edges are never reordered; removal marks the edge dead and unlinks it
//!   from the adjacency lists so ids held by other tables stay stable

pub mod loop_helper;
pub mod msg;

use smallvec::SmallVec;

/// Node identifier, unique within one graph.
pub type NodeId = u32;
/// Edge identifier, unique within one graph.
pub type EdgeId = u32;

/// Capacity value used for edges without an upper flow bound.
pub const UNBOUNDED_CAPACITY: i64 = i64::MAX;

/// Kind of a control-flow graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    /// Basic block of machine code.
    BasicBlock = 0,
    /// Call site, paired with exactly one `ReturnPoint`.
    CallPoint = 1,
    /// Return site, paired with exactly one `CallPoint`.
    ReturnPoint = 2,
    /// Entry of a function body.
    Entry = 3,
    /// Exit of a function body.
    Exit = 4,
    /// Super-entry/exit framing the whole graph.
    Meta = 5,
}

/// Kind of a control-flow graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EdgeKind {
    /// Fall-through to the physically adjacent basic block.
    ForwardStep = 0,
    /// Taken jump with a higher target address.
    ForwardJump = 1,
    /// Taken jump with a lower target address (loop inducing).
    BackwardJump = 2,
    /// Edge into or out of Entry/Exit/CallPoint/ReturnPoint nodes.
    Meta = 3,
    /// Synthetic exit-to-entry edge closing the graph for the ILP.
    InductingBackEdge = 4,
}

/// Comparison kind of a statically given flow constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FlowRestriction {
    Exact = 0,
    Max = 1,
    Min = 2,
}

/// Statically given flow fact attached to an edge.
///
/// Edges sharing the same `id` are combined into a single ILP constraint,
/// which is required after VIVU duplicates a constrained edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticFlowFact {
    pub id: u32,
    pub restriction: FlowRestriction,
    pub bound: u32,
}

/// Node record of the control-flow graph.
#[derive(Debug, Clone)]
pub struct CfgNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Display name: the start address string for basic blocks, a symbolic
    /// name for meta nodes. Used by the graph exporters.
    pub name: String,
    /// Start address of the basic block (or of the owning function for
    /// Entry/Exit nodes).
    pub start_address: u32,
    /// End address; for Call/ReturnPoint nodes this is the context address
    /// identifying the call site.
    pub end_address: u32,
    /// Basic block size in bytes.
    pub size: u32,
    /// Number of instructions in the basic block.
    pub instruction_count: u32,
    /// Disassembled code of the block, one instruction per line. The last
    /// line is the terminating instruction and is consulted to decode the
    /// displacement type of jumps.
    pub code: String,
    /// Context id distinguishing multiple call sites of the same callee.
    pub context_id: u32,
    /// Callee address for Call/ReturnPoint nodes.
    pub call_target: u32,
    /// Cache classification counters, filled by the cache DFA.
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub cache_ncs: u32,
    successors: SmallVec<[EdgeId; 2]>,
    predecessors: SmallVec<[EdgeId; 2]>,
}

impl CfgNode {
    fn new(id: NodeId, kind: NodeKind, name: String) -> Self {
        CfgNode {
            id,
            kind,
            name,
            start_address: 0,
            end_address: 0,
            size: 0,
            instruction_count: 0,
            code: String::new(),
            context_id: 0,
            call_target: 0,
            cache_hits: 0,
            cache_misses: 0,
            cache_ncs: 0,
            successors: SmallVec::new(),
            predecessors: SmallVec::new(),
        }
    }
}

/// Edge record of the control-flow graph.
///
/// The cost fields are written by the cost calculator, `mem_penalty` by the
/// cost calculator (static memories) or the memory DFAs (dynamic memories),
/// and `activation` by the ILP generator after solving.
#[derive(Debug, Clone)]
pub struct CfgEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    /// Execution cost in cycles (or instructions/bytes for the MDIC/MPL
    /// metrics) charged per traversal of this edge.
    pub cost: u64,
    /// Cost when the source block resides in on-chip memory.
    pub cost_onchip: u64,
    /// Cost when the source block resides in off-chip memory.
    pub cost_offchip: u64,
    /// Additional cycles when the block is not on-chip; DFA-computed for
    /// dynamic memories.
    pub mem_penalty: u64,
    pub capacity_lo: i64,
    pub capacity_hi: i64,
    /// Loop bound if ≥ 0 (the edge injects flow into a loop head), −1
    /// otherwise.
    pub circulation: i64,
    /// Flow value after solving the ILP.
    pub activation: u64,
    pub static_flow: Option<StaticFlowFact>,
    /// Pretty name shown in exported graphs, e.g. `f3 (2+10;0/inf) 1`.
    pub label: String,
    removed: bool,
}

/// Control flow graph with typed node and edge records.
#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    nodes: Vec<CfgNode>,
    edges: Vec<CfgEdge>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        ControlFlowGraph { nodes: Vec::new(), edges: Vec::new() }
    }

    /// Add a node of the given kind and return its id.
    pub fn add_node(&mut self, kind: NodeKind, name: impl Into<String>) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(CfgNode::new(id, kind, name.into()));
        id
    }

    /// Add an edge and return its id.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, kind: EdgeKind) -> EdgeId {
        let id = self.edges.len() as EdgeId;
        self.edges.push(CfgEdge {
            id,
            source,
            target,
            kind,
            cost: 0,
            cost_onchip: 0,
            cost_offchip: 0,
            mem_penalty: 0,
            capacity_lo: 0,
            capacity_hi: UNBOUNDED_CAPACITY,
            circulation: -1,
            activation: 0,
            static_flow: None,
            label: String::new(),
            removed: false,
        });
        self.nodes[source as usize].successors.push(id);
        self.nodes[target as usize].predecessors.push(id);
        id
    }

    /// Remove the first edge connecting `source` to `target`, if any.
    ///
    /// The edge record stays in place (ids remain stable) but is unlinked
    /// from the adjacency lists and skipped by all iterators.
    pub fn remove_edge_between(&mut self, source: NodeId, target: NodeId) -> bool {
        let found = self
            .edges
            .iter()
            .find(|e| !e.removed && e.source == source && e.target == target)
            .map(|e| e.id);
        if let Some(id) = found {
            self.edges[id as usize].removed = true;
            self.nodes[source as usize].successors.retain(|e| *e != id);
            self.nodes[target as usize].predecessors.retain(|e| *e != id);
            true
        } else {
            false
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|e| !e.removed).count()
    }

    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut CfgNode {
        &mut self.nodes[id as usize]
    }

    pub fn edge(&self, id: EdgeId) -> &CfgEdge {
        &self.edges[id as usize]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut CfgEdge {
        &mut self.edges[id as usize]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CfgNode> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len() as NodeId
    }

    pub fn edges(&self) -> impl Iterator<Item = &CfgEdge> {
        self.edges.iter().filter(|e| !e.removed)
    }

    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.edges.iter().filter(|e| !e.removed).map(|e| e.id).collect()
    }

    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = &CfgEdge> {
        self.nodes[node as usize].successors.iter().map(move |&e| &self.edges[e as usize])
    }

    pub fn in_edges(&self, node: NodeId) -> impl Iterator<Item = &CfgEdge> {
        self.nodes[node as usize].predecessors.iter().map(move |&e| &self.edges[e as usize])
    }

    pub fn out_edge_ids(&self, node: NodeId) -> SmallVec<[EdgeId; 2]> {
        self.nodes[node as usize].successors.clone()
    }

    pub fn in_edge_ids(&self, node: NodeId) -> SmallVec<[EdgeId; 2]> {
        self.nodes[node as usize].predecessors.clone()
    }

    pub fn out_degree(&self, node: NodeId) -> usize {
        self.nodes[node as usize].successors.len()
    }

    pub fn in_degree(&self, node: NodeId) -> usize {
        self.nodes[node as usize].predecessors.len()
    }

    /// The unique successor node over the single out-edge of `node`.
    ///
    /// Used for CallPoint nodes, which have exactly one out-edge by
    /// construction.
    pub fn single_successor(&self, node: NodeId) -> Option<NodeId> {
        let succs = &self.nodes[node as usize].successors;
        if succs.len() == 1 {
            Some(self.edges[succs[0] as usize].target)
        } else {
            None
        }
    }

    /// The unique predecessor node over the single in-edge of `node`.
    pub fn single_predecessor(&self, node: NodeId) -> Option<NodeId> {
        let preds = &self.nodes[node as usize].predecessors;
        if preds.len() == 1 {
            Some(self.edges[preds[0] as usize].source)
        } else {
            None
        }
    }

    /// Find the ReturnPoint paired with the given CallPoint.
    ///
    /// The pair shares the (context address, context id, callee address)
    /// triple.
    pub fn paired_return_point(&self, call_point: NodeId) -> Option<NodeId> {
        let cp = self.node(call_point);
        debug_assert_eq!(cp.kind, NodeKind::CallPoint);
        self.nodes
            .iter()
            .find(|n| {
                n.kind == NodeKind::ReturnPoint
                    && n.end_address == cp.end_address
                    && n.context_id == cp.context_id
                    && n.call_target == cp.call_target
            })
            .map(|n| n.id)
    }

    /// Total activation-weighted cost over all edges, using the given
    /// per-edge weight function.
    pub fn weighted_cost(&self, weight: impl Fn(&CfgEdge) -> u64) -> u64 {
        self.edges().map(|e| e.activation * weight(e)).sum()
    }
}

/// LIFO of callee function addresses describing a call context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ContextStack {
    stack: Vec<u32>,
}

impl ContextStack {
    pub fn new() -> Self {
        ContextStack { stack: Vec::new() }
    }

    pub fn push(&mut self, function_addr: u32) {
        self.stack.push(function_addr);
    }

    pub fn pop(&mut self) -> Option<u32> {
        self.stack.pop()
    }

    pub fn top(&self) -> Option<u32> {
        self.stack.last().copied()
    }

    pub fn contains(&self, function_addr: u32) -> bool {
        self.stack.contains(&function_addr)
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

impl std::fmt::Display for ContextStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.stack.is_empty() {
            return write!(f, "<root>");
        }
        for (i, addr) in self.stack.iter().enumerate() {
            if i > 0 {
                write!(f, ">")?;
            }
            write!(f, "0x{:08X}", addr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_nodes_and_edges() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_node(NodeKind::BasicBlock, "0x100");
        let b = cfg.add_node(NodeKind::BasicBlock, "0x108");
        let e = cfg.add_edge(a, b, EdgeKind::ForwardStep);

        assert_eq!(cfg.node_count(), 2);
        assert_eq!(cfg.edge_count(), 1);
        assert_eq!(cfg.edge(e).source, a);
        assert_eq!(cfg.edge(e).target, b);
        assert_eq!(cfg.out_degree(a), 1);
        assert_eq!(cfg.in_degree(b), 1);
    }

    #[test]
    fn test_remove_edge_keeps_ids_stable() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_node(NodeKind::BasicBlock, "a");
        let b = cfg.add_node(NodeKind::BasicBlock, "b");
        let c = cfg.add_node(NodeKind::BasicBlock, "c");
        cfg.add_edge(a, b, EdgeKind::ForwardStep);
        let e2 = cfg.add_edge(b, c, EdgeKind::ForwardJump);

        assert!(cfg.remove_edge_between(a, b));
        assert!(!cfg.remove_edge_between(a, b));
        assert_eq!(cfg.edge_count(), 1);
        assert_eq!(cfg.out_degree(a), 0);
        assert_eq!(cfg.in_degree(b), 0);
        // the surviving edge keeps its id
        assert_eq!(cfg.edge(e2).target, c);
    }

    #[test]
    fn test_call_return_pairing() {
        let mut cfg = ControlFlowGraph::new();
        let cp = cfg.add_node(NodeKind::CallPoint, "call 0x200");
        let rp = cfg.add_node(NodeKind::ReturnPoint, "ret 0x200");
        for id in [cp, rp] {
            let n = cfg.node_mut(id);
            n.end_address = 0x104;
            n.context_id = 7;
            n.call_target = 0x200;
        }
        assert_eq!(cfg.paired_return_point(cp), Some(rp));
    }

    #[test]
    fn test_context_stack() {
        let mut ctx = ContextStack::new();
        assert!(ctx.is_empty());
        ctx.push(0x100);
        ctx.push(0x200);
        assert_eq!(ctx.top(), Some(0x200));
        assert!(ctx.contains(0x100));
        assert_eq!(ctx.pop(), Some(0x200));
        assert_eq!(ctx.depth(), 1);
    }
}
