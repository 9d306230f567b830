//! Memory State Graph
//!
//! The MSG is the per-context, first-iteration-peeled copy of the CFG that
//! the memory data-flow analyses run on. Every MSG node references exactly
//! one CFG node (the inverse relation is one-to-many) and carries the call
//! context it was inlined for. MSG edges inherit the cost fields of the CFG
//! edge they were copied from and accumulate the dynamic memory penalty the
//! DFAs compute.

use super::{ContextStack, EdgeKind, NodeId, StaticFlowFact};
use bitvec::prelude::*;
use smallvec::SmallVec;

pub type MsgNodeId = u32;
pub type MsgEdgeId = u32;

/// Node of the memory state graph: a (CFG node, context stack) pair.
#[derive(Debug, Clone)]
pub struct MsgNode {
    pub id: MsgNodeId,
    /// The CFG node this MSG node is a copy of.
    pub cfg_node: NodeId,
    /// Call context of this copy (stack of callee addresses).
    pub context: ContextStack,
    /// Context id distinguishing Call/ReturnPoint copies; rewritten for
    /// every copy so pairs stay unique after inlining and peeling.
    pub context_id: u32,
    /// Whether the abstract memory state before this node is known.
    pub state_valid: bool,
    /// Cache classification counters for the block behind this node.
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub cache_ncs: u32,
    successors: SmallVec<[MsgEdgeId; 2]>,
    predecessors: SmallVec<[MsgEdgeId; 2]>,
}

/// Edge of the memory state graph.
#[derive(Debug, Clone)]
pub struct MsgEdge {
    pub id: MsgEdgeId,
    pub source: MsgNodeId,
    pub target: MsgNodeId,
    pub kind: EdgeKind,
    pub cost: u64,
    pub cost_onchip: u64,
    pub cost_offchip: u64,
    pub mem_penalty: u64,
    pub circulation: i64,
    pub static_flow: Option<StaticFlowFact>,
    /// Penalty in cycles computed by the memory DFA for traversing this edge.
    pub dynamic_penalty: u64,
}

/// The memory state graph produced by the VIVU transformation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateGraph {
    nodes: Vec<MsgNode>,
    edges: Vec<MsgEdge>,
    pub entry: MsgNodeId,
    pub exit: MsgNodeId,
}

impl MemoryStateGraph {
    pub fn new() -> Self {
        MemoryStateGraph::default()
    }

    pub fn add_node(&mut self, cfg_node: NodeId, context: ContextStack) -> MsgNodeId {
        let id = self.nodes.len() as MsgNodeId;
        self.nodes.push(MsgNode {
            id,
            cfg_node,
            context,
            context_id: 0,
            state_valid: false,
            cache_hits: 0,
            cache_misses: 0,
            cache_ncs: 0,
            successors: SmallVec::new(),
            predecessors: SmallVec::new(),
        });
        id
    }

    pub fn add_edge(&mut self, source: MsgNodeId, target: MsgNodeId, kind: EdgeKind) -> MsgEdgeId {
        let id = self.edges.len() as MsgEdgeId;
        self.edges.push(MsgEdge {
            id,
            source,
            target,
            kind,
            cost: 0,
            cost_onchip: 0,
            cost_offchip: 0,
            mem_penalty: 0,
            circulation: -1,
            static_flow: None,
            dynamic_penalty: 0,
        });
        self.nodes[source as usize].successors.push(id);
        self.nodes[target as usize].predecessors.push(id);
        id
    }

    /// Move an existing edge to a new target node, keeping its id and
    /// attributes. Used by the loop peeling to redirect back edges into the
    /// steady-state copy.
    pub fn retarget_edge(&mut self, edge: MsgEdgeId, new_target: MsgNodeId) {
        let old_target = self.edges[edge as usize].target;
        self.nodes[old_target as usize].predecessors.retain(|e| *e != edge);
        self.edges[edge as usize].target = new_target;
        self.nodes[new_target as usize].predecessors.push(edge);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: MsgNodeId) -> &MsgNode {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: MsgNodeId) -> &mut MsgNode {
        &mut self.nodes[id as usize]
    }

    pub fn edge(&self, id: MsgEdgeId) -> &MsgEdge {
        &self.edges[id as usize]
    }

    pub fn edge_mut(&mut self, id: MsgEdgeId) -> &mut MsgEdge {
        &mut self.edges[id as usize]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &MsgNode> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &MsgEdge> {
        self.edges.iter()
    }

    pub fn out_edges(&self, node: MsgNodeId) -> impl Iterator<Item = &MsgEdge> {
        self.nodes[node as usize].successors.iter().map(move |&e| &self.edges[e as usize])
    }

    pub fn in_edges(&self, node: MsgNodeId) -> impl Iterator<Item = &MsgEdge> {
        self.nodes[node as usize].predecessors.iter().map(move |&e| &self.edges[e as usize])
    }

    pub fn out_edge_ids(&self, node: MsgNodeId) -> SmallVec<[MsgEdgeId; 2]> {
        self.nodes[node as usize].successors.clone()
    }

    pub fn in_edge_ids(&self, node: MsgNodeId) -> SmallVec<[MsgEdgeId; 2]> {
        self.nodes[node as usize].predecessors.clone()
    }

    pub fn in_degree(&self, node: MsgNodeId) -> usize {
        self.nodes[node as usize].predecessors.len()
    }

    pub fn out_degree(&self, node: MsgNodeId) -> usize {
        self.nodes[node as usize].successors.len()
    }

    /// Number of non-BackwardJump in-edges of a node. Memory states propagate
    /// over forward edges only.
    pub fn forward_in_degree(&self, node: MsgNodeId) -> usize {
        self.in_edges(node).filter(|e| e.kind != EdgeKind::BackwardJump).count()
    }

    /// Checks that the graph is acyclic once BackwardJump edges are removed.
    /// Holds for every graph the VIVU transformation produces.
    pub fn is_forward_acyclic(&self) -> bool {
        // iterative three-color DFS over the forward subgraph
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;
        let mut color = vec![WHITE; self.nodes.len()];
        for start in 0..self.nodes.len() as MsgNodeId {
            if color[start as usize] != WHITE {
                continue;
            }
            let mut stack: Vec<(MsgNodeId, bool)> = vec![(start, false)];
            while let Some((n, expanded)) = stack.pop() {
                if expanded {
                    color[n as usize] = BLACK;
                    continue;
                }
                if color[n as usize] == BLACK {
                    continue;
                }
                color[n as usize] = GRAY;
                stack.push((n, true));
                for e in self.out_edges(n) {
                    if e.kind == EdgeKind::BackwardJump {
                        continue;
                    }
                    match color[e.target as usize] {
                        GRAY => return false,
                        WHITE => stack.push((e.target, false)),
                        _ => {}
                    }
                }
            }
        }
        true
    }

    /// Topological order of the forward subgraph, starting at `entry`.
    pub fn forward_topological_order(&self) -> Vec<MsgNodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut pending: Vec<usize> =
            (0..self.nodes.len()).map(|n| self.forward_in_degree(n as MsgNodeId)).collect();
        let mut ready: Vec<MsgNodeId> = (0..self.nodes.len() as MsgNodeId)
            .filter(|&n| pending[n as usize] == 0)
            .collect();
        let mut seen: BitVec<u32> = bitvec![u32, Lsb0; 0; self.nodes.len()];
        while let Some(n) = ready.pop() {
            if seen[n as usize] {
                continue;
            }
            seen.set(n as usize, true);
            order.push(n);
            for e in self.out_edges(n) {
                if e.kind == EdgeKind::BackwardJump {
                    continue;
                }
                let t = e.target as usize;
                pending[t] = pending[t].saturating_sub(1);
                if pending[t] == 0 {
                    ready.push(e.target);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_acyclic_ignores_back_edges() {
        let mut msg = MemoryStateGraph::new();
        let a = msg.add_node(0, ContextStack::new());
        let b = msg.add_node(1, ContextStack::new());
        msg.add_edge(a, b, EdgeKind::ForwardStep);
        msg.add_edge(b, a, EdgeKind::BackwardJump);
        assert!(msg.is_forward_acyclic());
    }

    #[test]
    fn test_forward_cycle_detected() {
        let mut msg = MemoryStateGraph::new();
        let a = msg.add_node(0, ContextStack::new());
        let b = msg.add_node(1, ContextStack::new());
        msg.add_edge(a, b, EdgeKind::ForwardStep);
        msg.add_edge(b, a, EdgeKind::ForwardJump);
        assert!(!msg.is_forward_acyclic());
    }

    #[test]
    fn test_topological_order() {
        let mut msg = MemoryStateGraph::new();
        let a = msg.add_node(0, ContextStack::new());
        let b = msg.add_node(1, ContextStack::new());
        let c = msg.add_node(2, ContextStack::new());
        msg.add_edge(a, b, EdgeKind::ForwardStep);
        msg.add_edge(b, c, EdgeKind::ForwardStep);
        msg.add_edge(c, b, EdgeKind::BackwardJump);
        let order = msg.forward_topological_order();
        assert_eq!(order, vec![a, b, c]);
    }
}
