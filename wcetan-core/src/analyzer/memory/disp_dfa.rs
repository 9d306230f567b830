//! DISP Data-Flow Analysis
//!
//! The dynamic instruction scratchpad changes content only on call and
//! return events, so the analysis walks the MSG and applies its transfer
//! function at Entry and Exit nodes. States are sets of concrete DISP
//! contents (brute force, as for the FIFO cache); classification per event:
//! resident in every state → HIT, in some → NC, in none → MISS.

use crate::analyzer::arch::{ActivationType, ArchConfig};
use crate::analyzer::config::ReplacementPolicy;
use crate::analyzer::error::{AnalysisError, Result};
use crate::analyzer::graph::msg::MsgNodeId;
use crate::analyzer::graph::{EdgeKind, NodeKind};
use crate::analyzer::memory::cache_dfa::DfaStatistics;
use crate::analyzer::memory::disp_state::{FifoDispState, StackDispState};
use crate::analyzer::memory::params::DispParams;
use crate::analyzer::program::FunctionCallGraph;
use crate::analyzer::vivu::VivuGraph;
use log::{debug, info};
use std::collections::HashMap;

/// One concrete DISP content, tagged by replacement policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispConcreteState {
    Stack(StackDispState),
    Fifo(FifoDispState),
}

impl DispConcreteState {
    fn is_in_state(&self, function_addr: u32) -> bool {
        match self {
            DispConcreteState::Stack(s) => s.is_in_state(function_addr),
            DispConcreteState::Fifo(s) => s.is_in_state(function_addr),
        }
    }

    fn reference_count(&self) -> usize {
        match self {
            DispConcreteState::Stack(s) => s.content.len(),
            DispConcreteState::Fifo(s) => s.content.len(),
        }
    }
}

/// Set of concrete DISP states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbsDispState {
    pub states: Vec<DispConcreteState>,
}

/// Update, join and classification over abstract DISP states.
pub struct DispStateMaintainer<'a> {
    params: DispParams,
    functions: &'a FunctionCallGraph,
    pub state_cap: usize,
}

impl<'a> DispStateMaintainer<'a> {
    pub fn new(params: DispParams, functions: &'a FunctionCallGraph, state_cap: usize) -> Self {
        DispStateMaintainer { params, functions, state_cap }
    }

    pub fn params(&self) -> &DispParams {
        &self.params
    }

    /// Function size padded to whole DISP blocks.
    pub fn function_mem_size(&self, function_addr: u32) -> u32 {
        let size = self.functions.function_size(function_addr);
        size.div_ceil(self.params.block_size) * self.params.block_size
    }

    pub fn blank_state(&self) -> AbsDispState {
        AbsDispState::default()
    }

    fn fresh_concrete(&self) -> DispConcreteState {
        match self.params.replacement {
            ReplacementPolicy::Stack => DispConcreteState::Stack(StackDispState::default()),
            ReplacementPolicy::Fifo => DispConcreteState::Fifo(FifoDispState::default()),
            _ => unreachable!("validated DISP policy"),
        }
    }

    /// Apply a call/return event to every represented state.
    pub fn update(
        &self,
        state: &AbsDispState,
        function_addr: u32,
        activation: ActivationType,
        previous_function: u32,
    ) -> Result<AbsDispState> {
        let mem_size = self.function_mem_size(function_addr);
        if mem_size > self.params.size {
            if self.params.ignore_outsized_functions {
                info!(
                    "function 0x{:08X} ({} bytes) exceeds the DISP ({} bytes), ignoring it",
                    function_addr, mem_size, self.params.size
                );
                return Ok(state.clone());
            }
            return Err(AnalysisError::Precondition(format!(
                "function 0x{:08X} needs {} bytes but the DISP holds {} bytes",
                function_addr, mem_size, self.params.size
            )));
        }

        let mut next = state.clone();
        if next.states.is_empty() {
            next.states.push(self.fresh_concrete());
        }
        for concrete in next.states.iter_mut() {
            match concrete {
                DispConcreteState::Stack(s) => s.activate_function(
                    function_addr,
                    activation,
                    previous_function,
                    self.params.size,
                    mem_size,
                )?,
                DispConcreteState::Fifo(s) => s.activate_function(
                    function_addr,
                    self.params.size,
                    self.params.mapping_table_size,
                    |a| self.function_mem_size(a),
                ),
            }
        }
        self.normalize_and_dedup(&mut next);
        Ok(next)
    }

    /// Join at a control-flow merge: set union plus duplicate removal.
    pub fn join(&self, states: &[&AbsDispState]) -> AbsDispState {
        let mut joined = AbsDispState::default();
        for s in states {
            joined.states.extend(s.states.iter().cloned());
        }
        self.normalize_and_dedup(&mut joined);
        joined
    }

    fn normalize_and_dedup(&self, state: &mut AbsDispState) {
        for concrete in state.states.iter_mut() {
            if let DispConcreteState::Stack(s) = concrete {
                s.normalize(self.params.size);
            }
        }
        let mut unique: Vec<DispConcreteState> = Vec::with_capacity(state.states.len());
        for s in state.states.drain(..) {
            if !unique.contains(&s) {
                unique.push(s);
            }
        }
        state.states = unique;
    }

    pub fn check_state_cap(&self, state: &AbsDispState, node: u32) -> Result<()> {
        if state.states.len() > self.state_cap {
            return Err(AnalysisError::StateExplosion {
                node,
                count: state.states.len(),
                cap: self.state_cap,
            });
        }
        Ok(())
    }

    pub fn is_in_must(&self, state: &AbsDispState, function_addr: u32) -> bool {
        !state.states.is_empty() && state.states.iter().all(|s| s.is_in_state(function_addr))
    }

    pub fn is_in_may(&self, state: &AbsDispState, function_addr: u32) -> bool {
        state.states.iter().any(|s| s.is_in_state(function_addr))
    }
}

/// Classification counts of the DISP events.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispAccessCounts {
    pub call_hits: u32,
    pub call_ncs: u32,
    pub call_misses: u32,
    pub return_hits: u32,
    pub return_ncs: u32,
    pub return_misses: u32,
}

/// The DISP DFA over a VIVU graph.
pub struct DispDfa<'a> {
    vivu: &'a mut VivuGraph,
    maintainer: DispStateMaintainer<'a>,
    arch: &'a ArchConfig,
    states: HashMap<MsgNodeId, AbsDispState>,
    statistics: DfaStatistics,
}

impl<'a> DispDfa<'a> {
    pub fn new(
        vivu: &'a mut VivuGraph,
        maintainer: DispStateMaintainer<'a>,
        arch: &'a ArchConfig,
    ) -> Self {
        DispDfa { vivu, maintainer, arch, states: HashMap::new(), statistics: DfaStatistics::default() }
    }

    /// Run the data-flow analysis and charge the per-event penalties.
    pub fn analyze_disp(&mut self) -> Result<()> {
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
            } else if self.forward_in_degree(actual) > 1 {
                self.join_predecessor_states(actual)?
            } else {
                self.transferred_predecessor_state(actual)?
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

        self.calculate_mem_penalty()
    }

    fn forward_in_degree(&self, node: MsgNodeId) -> usize {
        self.vivu.msg.forward_in_degree(node)
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

    /// Merge states: only possible between plain nodes, since inlining keeps
    /// every Entry/Exit on a single-successor path.
    fn join_predecessor_states(&self, node: MsgNodeId) -> Result<AbsDispState> {
        let mut preds = Vec::new();
        for e in self.vivu.msg.in_edges(node) {
            if e.kind == EdgeKind::BackwardJump {
                continue;
            }
            let pred_kind = self.cfg_kind(e.source);
            if pred_kind == NodeKind::Entry || pred_kind == NodeKind::Exit {
                return Err(AnalysisError::Internal(format!(
                    "join at node {} with inlined {:?} predecessor",
                    node, pred_kind
                )));
            }
            preds.push(self.states.get(&e.source).expect("predecessor state checked"));
        }
        Ok(self.maintainer.join(&preds))
    }

    /// Single-predecessor transfer, applying the call/return events.
    fn transferred_predecessor_state(&self, node: MsgNodeId) -> Result<AbsDispState> {
        let pred_edge = self
            .vivu
            .msg
            .in_edges(node)
            .find(|e| e.kind != EdgeKind::BackwardJump)
            .expect("forward in-edge exists");
        let pred = pred_edge.source;
        let pred_state = self.states.get(&pred).expect("predecessor state checked");
        match self.cfg_kind(pred) {
            NodeKind::Entry => {
                let function = self.function_of_entry(pred);
                let caller = self.vivu.msg.node(pred).context.top().unwrap_or(0);
                debug!("DISP call event: 0x{:08X} from 0x{:08X}", function, caller);
                self.maintainer.update(pred_state, function, ActivationType::Call, caller)
            }
            NodeKind::Exit => {
                let mut ctx = self.vivu.msg.node(pred).context.clone();
                let callee = ctx.pop().unwrap_or(0);
                match ctx.top() {
                    Some(caller) => {
                        debug!("DISP return event: to 0x{:08X} from 0x{:08X}", caller, callee);
                        self.maintainer.update(
                            pred_state,
                            caller,
                            ActivationType::Return,
                            callee,
                        )
                    }
                    None => {
                        // leaving the root function changes nothing
                        Ok(pred_state.clone())
                    }
                }
            }
            _ => Ok(pred_state.clone()),
        }
    }

    fn cfg_kind(&self, node: MsgNodeId) -> NodeKind {
        self.vivu.cfg.node(self.vivu.msg.node(node).cfg_node).kind
    }

    /// Function a MSG Entry node belongs to.
    fn function_of_entry(&self, node: MsgNodeId) -> u32 {
        self.vivu.cfg.node(self.vivu.msg.node(node).cfg_node).start_address
    }

    /// Classify every Entry/Exit event and charge its penalty: calls on the
    /// out-edge of the Entry node, returns on the in-edges of the Exit node.
    fn calculate_mem_penalty(&mut self) -> Result<()> {
        for node in 0..self.vivu.msg.node_count() as MsgNodeId {
            match self.cfg_kind(node) {
                NodeKind::Entry => {
                    let Some(state) = self.states.get(&node) else { continue };
                    let function = self.function_of_entry(node);
                    let penalty = self.event_penalty(state, function, ActivationType::Call);
                    for e in self.vivu.msg.out_edge_ids(node) {
                        self.vivu.msg.edge_mut(e).dynamic_penalty = penalty;
                    }
                    debug!(
                        "DISP penalty for entry node {} (function 0x{:08X}) is {}",
                        node, function, penalty
                    );
                }
                NodeKind::Exit => {
                    let Some(state) = self.states.get(&node) else { continue };
                    let mut ctx = self.vivu.msg.node(node).context.clone();
                    ctx.pop();
                    let Some(caller) = ctx.top() else {
                        debug!("no DISP penalty for exit node {}: leaves the root", node);
                        continue;
                    };
                    let penalty = self.event_penalty(state, caller, ActivationType::Return);
                    for e in self.vivu.msg.in_edge_ids(node) {
                        self.vivu.msg.edge_mut(e).dynamic_penalty = penalty;
                    }
                    debug!(
                        "DISP penalty for exit node {} (returning to 0x{:08X}) is {}",
                        node, caller, penalty
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn event_penalty(
        &self,
        state: &AbsDispState,
        function: u32,
        activation: ActivationType,
    ) -> u64 {
        if self.maintainer.is_in_must(state, function) {
            self.hit_penalty(activation)
        } else {
            // NC pays the full miss cost as well
            self.miss_penalty(self.maintainer.function_mem_size(function), activation)
        }
    }

    /// Controller cycles of a hit that the call/return pipeline latency does
    /// not hide.
    fn hit_penalty(&self, activation: ActivationType) -> u64 {
        let pipeline = self.arch.call_return_latency(activation);
        self.arch.disp_ctrl_hit_cycles.saturating_sub(pipeline) as u64
    }

    /// Load cycles of a miss; with an independent fetch path the pipeline
    /// latency hides part of it.
    fn miss_penalty(&self, function_mem_size: u32, activation: ActivationType) -> u64 {
        let load =
            (function_mem_size / self.maintainer.params().block_size) as u64
                * self.arch.disp_block_load_cost() as u64;
        let ctrl = self.arch.disp_ctrl_miss_cycles as u64;
        if self.arch.fetch_mem_independent {
            (load + ctrl).saturating_sub(self.arch.call_return_latency(activation) as u64)
        } else {
            load + ctrl
        }
    }

    /// Classification counts over all Entry/Exit events.
    pub fn categorize_mem_accesses(&self) -> DispAccessCounts {
        let mut counts = DispAccessCounts::default();
        for node in 0..self.vivu.msg.node_count() as MsgNodeId {
            let Some(state) = self.states.get(&node) else { continue };
            match self.cfg_kind(node) {
                NodeKind::Entry => {
                    let function = self.function_of_entry(node);
                    if self.maintainer.is_in_must(state, function) {
                        counts.call_hits += 1;
                    } else if self.maintainer.is_in_may(state, function) {
                        counts.call_ncs += 1;
                    } else {
                        counts.call_misses += 1;
                    }
                }
                NodeKind::Exit => {
                    let mut ctx = self.vivu.msg.node(node).context.clone();
                    ctx.pop();
                    let Some(caller) = ctx.top() else { continue };
                    if self.maintainer.is_in_must(state, caller) {
                        counts.return_hits += 1;
                    } else if self.maintainer.is_in_may(state, caller) {
                        counts.return_ncs += 1;
                    } else {
                        counts.return_misses += 1;
                    }
                }
                _ => {}
            }
        }
        info!(
            "classified DISP accesses: hit: {} (call: {} ret: {}) miss: {} (call: {} ret: {}) NC: {} (call: {} ret: {})",
            counts.call_hits + counts.return_hits,
            counts.call_hits,
            counts.return_hits,
            counts.call_misses + counts.return_misses,
            counts.call_misses,
            counts.return_misses,
            counts.call_ncs + counts.return_ncs,
            counts.call_ncs,
            counts.return_ncs,
        );
        counts
    }

    pub fn statistics(&self) -> DfaStatistics {
        self.statistics
    }

    fn account(&mut self, state: &AbsDispState) {
        self.statistics.memory_state_count += state.states.len() as u64;
        self.statistics.representation_state_count += 1;
        self.statistics.reference_count +=
            state.states.iter().map(|s| s.reference_count() as u64).sum::<u64>();
    }
}
