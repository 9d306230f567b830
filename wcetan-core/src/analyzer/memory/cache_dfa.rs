//! Instruction Cache Data-Flow Analysis
//!
//! Computes for every MSG node the abstract cache state *before* the node
//! executes, then classifies each cache line the node touches and charges
//! the resulting penalty on the node's outgoing edges.
//!
//! # Scheduling
//! A LIFO work list is seeded with the entry node; a node is processed once
//! all its forward predecessors carry a valid state. Back edges are ignored:
//! the VIVU transformation already peeled the first loop iteration, so the
//! forward subgraph is acyclic and one sweep reaches the fixed point.
//!
//! # Intra-block updates
//! The lines of one block are classified in order and the state is updated
//! *between* them; without this a line spanning the block start could be
//! misclassified. The unsound historical behavior is kept selectable for
//! comparison via `fix_intra_block_state_update`.

use crate::analyzer::arch::ArchConfig;
use crate::analyzer::error::Result;
use crate::analyzer::graph::msg::MsgNodeId;
use crate::analyzer::graph::{EdgeKind, NodeKind};
use crate::analyzer::memory::cache_state::{
    CacheClassification, CacheState, CacheStateMaintainer,
};
use crate::analyzer::vivu::VivuGraph;
use log::{debug, info};
use std::collections::HashMap;

/// Size statistics of the abstract states a DFA maintained.
#[derive(Debug, Clone, Copy, Default)]
pub struct DfaStatistics {
    /// Concrete states represented across all nodes.
    pub memory_state_count: u64,
    /// Stored state objects (1 per node for Must/May).
    pub representation_state_count: u64,
    /// Maintained line/function references.
    pub reference_count: u64,
}

/// Aggregated access classification counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheAccessCounts {
    pub hits: u32,
    pub misses: u32,
    pub ncs: u32,
}

/// The instruction cache DFA over a VIVU graph.
pub struct ICacheDfa<'a> {
    vivu: &'a mut VivuGraph,
    maintainer: CacheStateMaintainer,
    arch: &'a ArchConfig,
    fix_intra_block_state_update: bool,
    states: HashMap<MsgNodeId, CacheState>,
    statistics: DfaStatistics,
}

impl<'a> ICacheDfa<'a> {
    pub fn new(
        vivu: &'a mut VivuGraph,
        maintainer: CacheStateMaintainer,
        arch: &'a ArchConfig,
        fix_intra_block_state_update: bool,
    ) -> Self {
        ICacheDfa {
            vivu,
            maintainer,
            arch,
            fix_intra_block_state_update,
            states: HashMap::new(),
            statistics: DfaStatistics::default(),
        }
    }

    /// Run the data-flow analysis and write the per-edge penalties.
    pub fn analyze_cache(&mut self) -> Result<()> {
        let entry = self.vivu.msg.entry;
        let exit = self.vivu.msg.exit;
        let mut processing: Vec<MsgNodeId> = vec![entry];

        while let Some(actual) = processing.pop() {
            if self.vivu.msg.node(actual).state_valid {
                continue;
            }
            if !self.predecessor_states_known(actual) || actual == exit {
                continue;
            }
            let state = if actual == entry {
                self.maintainer.blank_state()
            } else {
                self.join_predecessor_states(actual)?
            };
            self.maintainer.check_state_cap(&state, actual)?;
            self.account(&state);
            self.states.insert(actual, state);
            self.vivu.msg.node_mut(actual).state_valid = true;

            for e in self.vivu.msg.out_edge_ids(actual) {
                let edge = self.vivu.msg.edge(e);
                if edge.kind != EdgeKind::BackwardJump {
                    processing.push(edge.target);
                }
            }
        }

        self.calculate_cache_penalty()
    }

    fn predecessor_states_known(&self, node: MsgNodeId) -> bool {
        if node == self.vivu.msg.entry {
            return true;
        }
        self.vivu
            .msg
            .in_edges(node)
            .filter(|e| e.kind != EdgeKind::BackwardJump)
            .all(|e| self.vivu.msg.node(e.source).state_valid)
    }

    /// Initial state of a node: the predecessors' states after executing the
    /// predecessor blocks, joined at the merge.
    fn join_predecessor_states(&self, node: MsgNodeId) -> Result<CacheState> {
        let mut post_states = Vec::new();
        for e in self.vivu.msg.in_edges(node) {
            if e.kind == EdgeKind::BackwardJump {
                continue;
            }
            let pred = e.source;
            let pred_state = self.states.get(&pred).expect("predecessor state checked");
            let lines = self.cache_lines_of(pred);
            post_states.push(self.maintainer.update(pred_state, &lines)?);
        }
        self.maintainer.join(&post_states)
    }

    /// Cache line addresses a node touches: one per line-sized slice of the
    /// block's address range, or one per block in the approximation mode.
    fn cache_lines_of(&self, node: MsgNodeId) -> Vec<u32> {
        let cfg_node = self.vivu.cfg.node(self.vivu.msg.node(node).cfg_node);
        if cfg_node.kind != NodeKind::BasicBlock {
            return Vec::new();
        }
        if self.maintainer.params().use_bbs_instead_of_lines {
            return vec![cfg_node.start_address];
        }
        let mut lines = Vec::new();
        let end = cfg_node.start_address + cfg_node.size;
        let mut line = self.maintainer.line_of(cfg_node.start_address);
        while line < end {
            lines.push(line);
            line += self.maintainer.params().line_size;
        }
        lines
    }

    /// Classify the lines of every block and charge miss costs on its
    /// outgoing edges.
    fn calculate_cache_penalty(&mut self) -> Result<()> {
        let miss_cost = self.arch.cache_miss_cost() as u64;
        for node in 0..self.vivu.msg.node_count() as MsgNodeId {
            let Some(state) = self.states.get(&node) else { continue };
            let lines = self.cache_lines_of(node);
            if lines.is_empty() {
                continue;
            }
            let mut hits = 0u32;
            let mut misses = 0u32;
            let mut ncs = 0u32;
            let mut current = state.clone();
            for &line in &lines {
                match self.maintainer.classify(&current, line) {
                    CacheClassification::AlwaysHit => hits += 1,
                    CacheClassification::AlwaysMiss => misses += 1,
                    CacheClassification::NotClassified => ncs += 1,
                }
                if self.fix_intra_block_state_update {
                    // account the access before looking at the next line
                    current = self.maintainer.update_single(&current, line)?;
                }
            }
            let penalty = miss_cost * (misses as u64 + ncs as u64);
            for e in self.vivu.msg.out_edge_ids(node) {
                self.vivu.msg.edge_mut(e).dynamic_penalty = penalty;
            }
            {
                let n = self.vivu.msg.node_mut(node);
                n.cache_hits = hits;
                n.cache_misses = misses;
                n.cache_ncs = ncs;
            }
            debug!(
                "cache penalty for node {} is {} (H:{}|M:{}|N:{})",
                node, penalty, hits, misses, ncs
            );
        }
        Ok(())
    }

    /// Classification counts over all blocks (unweighted).
    pub fn categorize_cache_accesses(&self) -> CacheAccessCounts {
        let mut counts = CacheAccessCounts::default();
        for n in self.vivu.msg.nodes() {
            counts.hits += n.cache_hits;
            counts.misses += n.cache_misses;
            counts.ncs += n.cache_ncs;
        }
        info!(
            "classified cache accesses: always hit: {} always miss: {} NC: {}",
            counts.hits, counts.misses, counts.ncs
        );
        counts
    }

    pub fn statistics(&self) -> DfaStatistics {
        self.statistics
    }

    fn account(&mut self, state: &CacheState) {
        self.statistics.memory_state_count += state.concrete_count() as u64;
        self.statistics.representation_state_count += 1;
        self.statistics.reference_count += state.reference_count() as u64;
    }
}
