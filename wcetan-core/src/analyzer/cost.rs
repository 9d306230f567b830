//! Cost Calculator
//!
//! Writes the baseline timing of every CFG edge: the cost charged per
//! traversal, the on-chip and off-chip execution costs of the source block,
//! and the memory penalty. What lands in the `cost` field depends on the
//! metric and the memory architecture:
//!
//! - `NO_MEM`: everything executes off-chip, `cost` is the off-chip time.
//! - static scratchpads: `cost` is the on-chip time and `mem_penalty` the
//!   off-chip surcharge, so `cost + penalty` prices an unassigned block and
//!   clearing the penalty prices an assigned one.
//! - dynamic memories (`ICACHE`/`DISP`): `cost` is the on-chip time; the
//!   data-flow analyses later contribute the penalty.
//! - `MDIC`/`MPL` metrics: `cost` is the instruction count resp. block size.

use crate::analyzer::arch::{ActivationType, ArchConfig, ConnectionType, DisplacementType};
use crate::analyzer::config::{AnalysisMetric, MemoryType};
use crate::analyzer::graph::{CfgEdge, ControlFlowGraph, EdgeId, EdgeKind, NodeId, NodeKind};
use crate::analyzer::isa::IsaHelper;
use log::debug;

/// Calculates and rewrites the per-edge cost attributes of a CFG.
pub struct CostCalculator<'a> {
    arch: &'a ArchConfig,
    metric: AnalysisMetric,
    memory_type: MemoryType,
}

impl<'a> CostCalculator<'a> {
    pub fn new(arch: &'a ArchConfig, metric: AnalysisMetric, memory_type: MemoryType) -> Self {
        CostCalculator { arch, metric, memory_type }
    }

    /// On-chip execution cycles of a basic block.
    fn onchip_cycles(&self, instruction_count: u32) -> u64 {
        instruction_count as u64
    }

    /// Off-chip execution cycles: on-chip time plus one stall per fetch.
    fn offchip_cycles(&self, instruction_count: u32, size: u32) -> u64 {
        let fetches = size.div_ceil(self.arch.fetch_width) as u64;
        self.onchip_cycles(instruction_count) + fetches * self.arch.offchip_fetch_stall as u64
    }

    /// Assign cost, on-chip cost, off-chip cost and memory penalty to every
    /// edge of the graph.
    pub fn calculate_cost(&self, cfg: &mut ControlFlowGraph) {
        for e in cfg.edge_ids() {
            let (source, target) = {
                let edge = cfg.edge(e);
                (edge.source, edge.target)
            };
            let src = cfg.node(source);
            if src.kind != NodeKind::BasicBlock {
                continue;
            }
            let (mut onchip, mut offchip) = match self.metric {
                AnalysisMetric::Wcet | AnalysisMetric::WcetRatioFiles => (
                    self.onchip_cycles(src.instruction_count),
                    self.offchip_cycles(src.instruction_count, src.size),
                ),
                AnalysisMetric::Mdic => {
                    let c = src.instruction_count as u64;
                    (c, c)
                }
                AnalysisMetric::Mpl => {
                    let c = src.size as u64;
                    (c, c)
                }
            };
            if matches!(self.metric, AnalysisMetric::Wcet | AnalysisMetric::WcetRatioFiles) {
                // call and return handling occupies the pipeline regardless
                // of the instruction memory
                match cfg.node(target).kind {
                    NodeKind::CallPoint => {
                        let lat = self.arch.call_return_latency(ActivationType::Call) as u64;
                        onchip += lat;
                        offchip += lat;
                    }
                    NodeKind::Exit => {
                        let lat = self.arch.call_return_latency(ActivationType::Return) as u64;
                        onchip += lat;
                        offchip += lat;
                    }
                    _ => {}
                }
            }
            let edge = cfg.edge_mut(e);
            edge.cost_onchip = onchip;
            edge.cost_offchip = offchip;
            match self.metric {
                AnalysisMetric::Wcet | AnalysisMetric::WcetRatioFiles => {
                    if self.memory_type.is_static() || self.memory_type.is_dynamic() {
                        edge.cost = onchip;
                        edge.mem_penalty =
                            if self.memory_type.is_static() { offchip - onchip } else { 0 };
                    } else {
                        edge.cost = offchip;
                        edge.mem_penalty = 0;
                    }
                }
                AnalysisMetric::Mdic | AnalysisMetric::Mpl => {
                    edge.cost = onchip;
                    edge.mem_penalty = 0;
                }
            }
        }
        debug!("cost calculation done for {} edges", cfg.edge_count());
    }

    /// Apply a scratchpad assignment: the memory penalty of every out-edge of
    /// an assigned block is cleared. With `recompute_penalties` the jump
    /// penalties of connections crossing the on-chip boundary are added to
    /// the edge costs (jump-penalty allocation modes).
    pub fn consider_memory_assignment(
        &self,
        cfg: &mut ControlFlowGraph,
        assigned_blocks: &[u32],
        recompute_penalties: bool,
        isa: &dyn IsaHelper,
    ) {
        let assigned = |cfg: &ControlFlowGraph, node: NodeId| -> bool {
            let n = cfg.node(node);
            n.kind == NodeKind::BasicBlock && assigned_blocks.contains(&n.start_address)
        };

        for node in cfg.node_ids() {
            if !assigned(cfg, node) {
                continue;
            }
            let name = format!("X {}", cfg.node(node).name);
            cfg.node_mut(node).name = name;
            for e in cfg.out_edge_ids(node) {
                cfg.edge_mut(e).mem_penalty = 0;
            }
        }

        if !recompute_penalties {
            return;
        }

        // connections whose endpoints end up in different memories need an
        // adapted jump; charge its penalty on the connecting edge
        let mut adjustments: Vec<(EdgeId, u64)> = Vec::new();
        for e in cfg.edges() {
            let Some((connection, src_bb, tgt_bb)) = classify_connection(cfg, e) else {
                continue;
            };
            if assigned(cfg, src_bb) == assigned(cfg, tgt_bb) {
                continue;
            }
            let displacement = match connection {
                ConnectionType::ContinuousAdressing => DisplacementType::NoDisplacement,
                ConnectionType::Return => DisplacementType::Indirect,
                _ => isa.displacement_type(&cfg.node(src_bb).code),
            };
            let penalty = self.arch.jump_penalty(connection, displacement) as u64;
            if penalty != 0 {
                adjustments.push((e.id, penalty));
            }
        }
        for (e, penalty) in adjustments {
            let edge = cfg.edge_mut(e);
            edge.cost += penalty;
            edge.cost_offchip += penalty;
        }
    }

}

/// Connection type of an edge together with the basic blocks it connects,
/// resolving call/return plumbing to the blocks behind it.
pub fn classify_connection(
    cfg: &ControlFlowGraph,
    e: &CfgEdge,
) -> Option<(ConnectionType, NodeId, NodeId)> {
    let src = cfg.node(e.source);
    let tgt = cfg.node(e.target);
    match (src.kind, tgt.kind) {
        (NodeKind::BasicBlock, NodeKind::BasicBlock) => {
            let connection = match e.kind {
                EdgeKind::ForwardStep => ConnectionType::ContinuousAdressing,
                EdgeKind::ForwardJump | EdgeKind::BackwardJump => ConnectionType::Jump,
                _ => return None,
            };
            Some((connection, src.id, tgt.id))
        }
        (NodeKind::BasicBlock, NodeKind::CallPoint) => {
            let callee_first = first_block_of_callee(cfg, tgt.id)?;
            Some((ConnectionType::Call, src.id, callee_first))
        }
        (NodeKind::ReturnPoint, NodeKind::BasicBlock) => {
            let callee_last = last_block_of_callee(cfg, src.id)?;
            Some((ConnectionType::Return, callee_last, tgt.id))
        }
        _ => None,
    }
}

/// First basic block of the function a CallPoint enters.
pub fn first_block_of_callee(cfg: &ControlFlowGraph, call_point: NodeId) -> Option<NodeId> {
    let entry = cfg.single_successor(call_point)?;
    cfg.out_edges(entry).map(|e| e.target).find(|&n| cfg.node(n).kind == NodeKind::BasicBlock)
}

/// Last basic block of the function a ReturnPoint leaves.
pub fn last_block_of_callee(cfg: &ControlFlowGraph, return_point: NodeId) -> Option<NodeId> {
    let exit = cfg.single_predecessor(return_point)?;
    cfg.in_edges(exit).map(|e| e.source).find(|&n| cfg.node(n).kind == NodeKind::BasicBlock)
}
