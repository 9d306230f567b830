// Loop classification helpers for the CFG.
use super::{CfgEdge, ControlFlowGraph, EdgeId, EdgeKind, NodeId};
use bitvec::prelude::*;
use log::warn;

/// Loop described by its back edge.
///
/// The *start node* is the loop head (target of the back edge), the *exit
/// node* is the source of the back edge, and the *entry node* is the target
/// of the edge injecting flow into the loop. For head-decision loops entry
/// and start coincide.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub back_edge: EdgeId,
    pub start_node: NodeId,
    pub exit_node: NodeId,
    pub entry_node: NodeId,
    /// Membership set of the loop body, indexed by node id.
    pub body: BitVec<u32>,
}

/// Helper answering structural loop queries on a CFG.
///
/// All queries operate on the *forward subgraph*: BackwardJump and the
/// synthetic InductingBackEdge are ignored.
pub struct LoopHelper<'a> {
    cfg: &'a ControlFlowGraph,
    entry: NodeId,
}

fn is_forward(e: &CfgEdge) -> bool {
    e.kind != EdgeKind::BackwardJump && e.kind != EdgeKind::InductingBackEdge
}

impl<'a> LoopHelper<'a> {
    pub fn new(cfg: &'a ControlFlowGraph, entry: NodeId) -> Self {
        LoopHelper { cfg, entry }
    }

    /// Checks whether `dominator` dominates `node` in the forward subgraph,
    /// i.e. whether every forward path from the graph entry to `node` passes
    /// through `dominator`.
    pub fn dominates(&self, dominator: NodeId, node: NodeId) -> bool {
        if dominator == node {
            return true;
        }
        // node must not be reachable once the dominator is removed
        !self.reachable_avoiding(self.entry, node, Some(dominator))
    }

    /// Checks whether a BackwardJump edge actually causes a loop: its target
    /// must dominate its source in the forward subgraph.
    pub fn is_loop_causing_back_edge(&self, edge: EdgeId) -> bool {
        let e = self.cfg.edge(edge);
        if e.kind != EdgeKind::BackwardJump {
            return false;
        }
        self.dominates(e.target, e.source)
    }

    /// Locates the unique edge injecting flow into the given loop head: the
    /// single in-edge whose circulation field is ≥ 0. Returns `None` (with a
    /// warning) if no or more than one such edge exists.
    pub fn injecting_edge_of_head(&self, head: NodeId) -> Option<EdgeId> {
        let mut injecting: Option<EdgeId> = None;
        for e in self.cfg.in_edges(head) {
            if e.circulation >= 0 {
                if injecting.is_some() {
                    warn!(
                        "loop head {} has multiple injecting edges, cannot decide",
                        self.cfg.node(head).name
                    );
                    return None;
                }
                injecting = Some(e.id);
            }
        }
        injecting
    }

    /// Loop bound of the head, taken from the circulation of its injecting
    /// edge. Returns `None` when the loop has no bound.
    pub fn loop_bound_of_head(&self, head: NodeId) -> Option<i64> {
        self.injecting_edge_of_head(head).map(|e| self.cfg.edge(e).circulation)
    }

    /// Checks whether `node` lies on a forward path from `from` to `to`:
    /// it is reachable from `from` and `to` is reachable from it.
    pub fn is_node_on_path(&self, node: NodeId, from: NodeId, to: NodeId) -> bool {
        if node == from || node == to {
            return true;
        }
        self.reachable_avoiding(from, node, None) && self.reachable_avoiding(node, to, None)
    }

    /// Collects all loops of the graph: one `LoopInfo` per loop-causing
    /// BackwardJump edge.
    pub fn find_loops(&self) -> Vec<LoopInfo> {
        let mut loops = Vec::new();
        for e in self.cfg.edges() {
            if e.kind == EdgeKind::BackwardJump && self.is_loop_causing_back_edge(e.id) {
                let entry_node = self
                    .injecting_edge_of_head(e.target)
                    .map(|ie| self.cfg.edge(ie).target)
                    .unwrap_or(e.target);
                loops.push(LoopInfo {
                    back_edge: e.id,
                    start_node: e.target,
                    exit_node: e.source,
                    entry_node,
                    body: self.natural_loop_body(e.id),
                });
            }
        }
        loops
    }

    /// Natural loop body of a back edge: the head, the tail, and every node
    /// from which the tail is reachable without passing through the head.
    pub fn natural_loop_body(&self, back_edge: EdgeId) -> BitVec<u32> {
        let e = self.cfg.edge(back_edge);
        let head = e.target;
        let tail = e.source;
        let mut body: BitVec<u32> = bitvec![u32, Lsb0; 0; self.cfg.node_count()];
        body.set(head as usize, true);
        if head == tail {
            return body;
        }
        let mut stack = vec![tail];
        body.set(tail as usize, true);
        while let Some(n) = stack.pop() {
            for ie in self.cfg.in_edges(n) {
                if !is_forward(ie) {
                    continue;
                }
                let p = ie.source as usize;
                if !body[p] {
                    body.set(p, true);
                    stack.push(ie.source);
                }
            }
        }
        body
    }

    fn reachable_avoiding(&self, from: NodeId, to: NodeId, avoid: Option<NodeId>) -> bool {
        if from == to {
            return true;
        }
        if Some(from) == avoid {
            return false;
        }
        let mut visited: BitVec<u32> = bitvec![u32, Lsb0; 0; self.cfg.node_count()];
        let mut stack = vec![from];
        visited.set(from as usize, true);
        while let Some(n) = stack.pop() {
            for oe in self.cfg.out_edges(n) {
                if !is_forward(oe) {
                    continue;
                }
                let t = oe.target;
                if Some(t) == avoid {
                    continue;
                }
                if t == to {
                    return true;
                }
                if !visited[t as usize] {
                    visited.set(t as usize, true);
                    stack.push(t);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::graph::NodeKind;

    /// entry -> head -> body -> head (back), body -> exit
    fn simple_loop_cfg() -> (ControlFlowGraph, NodeId, NodeId, NodeId, EdgeId) {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.add_node(NodeKind::BasicBlock, "entry");
        let head = cfg.add_node(NodeKind::BasicBlock, "head");
        let body = cfg.add_node(NodeKind::BasicBlock, "body");
        let exit = cfg.add_node(NodeKind::BasicBlock, "exit");
        let inject = cfg.add_edge(entry, head, EdgeKind::ForwardStep);
        cfg.add_edge(head, body, EdgeKind::ForwardStep);
        let back = cfg.add_edge(body, head, EdgeKind::BackwardJump);
        cfg.add_edge(body, exit, EdgeKind::ForwardJump);
        cfg.edge_mut(inject).circulation = 10;
        (cfg, entry, head, back, inject)
    }

    #[test]
    fn test_loop_causing_back_edge() {
        let (cfg, entry, _head, back, _) = simple_loop_cfg();
        let helper = LoopHelper::new(&cfg, entry);
        assert!(helper.is_loop_causing_back_edge(back));
    }

    #[test]
    fn test_injecting_edge_lookup() {
        let (cfg, entry, head, _back, inject) = simple_loop_cfg();
        let helper = LoopHelper::new(&cfg, entry);
        assert_eq!(helper.injecting_edge_of_head(head), Some(inject));
        assert_eq!(helper.loop_bound_of_head(head), Some(10));
    }

    #[test]
    fn test_ambiguous_injecting_edge_fails() {
        let (mut cfg, entry, head, _back, _) = simple_loop_cfg();
        let extra = cfg.add_node(NodeKind::BasicBlock, "extra");
        let second = cfg.add_edge(extra, head, EdgeKind::ForwardJump);
        cfg.edge_mut(second).circulation = 5;
        let helper = LoopHelper::new(&cfg, entry);
        assert_eq!(helper.injecting_edge_of_head(head), None);
    }

    #[test]
    fn test_natural_loop_body() {
        let (cfg, entry, head, back, _) = simple_loop_cfg();
        let helper = LoopHelper::new(&cfg, entry);
        let body = helper.natural_loop_body(back);
        assert!(body[head as usize]);
        assert!(body[2]); // body node
        assert!(!body[entry as usize]);
        assert!(!body[3]); // exit node
    }

    #[test]
    fn test_node_on_path() {
        let (cfg, entry, head, _back, _) = simple_loop_cfg();
        let helper = LoopHelper::new(&cfg, entry);
        assert!(helper.is_node_on_path(head, entry, 3));
        assert!(!helper.is_node_on_path(3, entry, head));
    }
}
