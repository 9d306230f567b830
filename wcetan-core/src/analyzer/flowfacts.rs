//! Flow-Fact Enrichment
//!
//! Loop bounds and static flow constraints come from an external flow-fact
//! source keyed by (function label, source address, target address). The
//! enricher attaches them to the CFG in place: loop bounds become the
//! circulation of the edges injecting flow into the loop head, static
//! constraints become per-edge records that the ILP generator later groups
//! by id.
//!
//! A missing bound for a reachable loop is not fatal here: the loop is left
//! unbounded, the ILP turns out unbounded, and the solver's status tag
//! reports it.

use crate::analyzer::error::{AnalysisError, Result};
use crate::analyzer::graph::loop_helper::LoopHelper;
use crate::analyzer::graph::{
    ControlFlowGraph, EdgeId, EdgeKind, FlowRestriction, NodeId, StaticFlowFact,
};
use crate::analyzer::program::FunctionInfo;
use log::{debug, warn};

/// One static flow constraint from the flow-fact file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFlowEntry {
    pub id: u32,
    pub restriction: FlowRestriction,
    pub bound: u32,
    pub function: String,
    pub source_address: u32,
    pub target_address: u32,
}

/// External source of loop bounds and static flow constraints.
pub trait FlowFactSource {
    /// Loop bound for the loop whose back edge runs from the block at
    /// `tail_address` to the head block at `head_address`.
    fn loop_bound(&self, function: &str, tail_address: u32, head_address: u32) -> Option<u32>;

    fn static_flows(&self) -> &[StaticFlowEntry];
}

/// Flow-fact file reader.
///
/// Format, one fact per line:
///
/// ```text
/// loop <function> <tail_hex> <head_hex> <bound>
/// flow <id> exact|max|min <bound> <function> <src_hex> <tgt_hex>
/// ```
#[derive(Debug, Default)]
pub struct FlowFactFile {
    loops: Vec<(String, u32, u32, u32)>,
    flows: Vec<StaticFlowEntry>,
}

impl FlowFactFile {
    pub fn parse(text: &str) -> Result<Self> {
        let mut facts = FlowFactFile::default();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens[0] {
                "loop" if tokens.len() == 5 => {
                    facts.loops.push((
                        tokens[1].to_string(),
                        hex(tokens[2], line_no)?,
                        hex(tokens[3], line_no)?,
                        num(tokens[4], line_no)?,
                    ));
                }
                "flow" if tokens.len() == 7 => {
                    let restriction = match tokens[2] {
                        "exact" => FlowRestriction::Exact,
                        "max" => FlowRestriction::Max,
                        "min" => FlowRestriction::Min,
                        other => {
                            return Err(AnalysisError::Parse(format!(
                                "flow fact line {}: unknown restriction '{}'",
                                line_no, other
                            )))
                        }
                    };
                    facts.flows.push(StaticFlowEntry {
                        id: num(tokens[1], line_no)?,
                        restriction,
                        bound: num(tokens[3], line_no)?,
                        function: tokens[4].to_string(),
                        source_address: hex(tokens[5], line_no)?,
                        target_address: hex(tokens[6], line_no)?,
                    });
                }
                _ => {
                    return Err(AnalysisError::Parse(format!(
                        "flow fact line {}: unrecognized record",
                        line_no
                    )))
                }
            }
        }
        Ok(facts)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::Parse(format!("cannot read {}: {}", path.display(), e)))?;
        FlowFactFile::parse(&text)
    }
}

fn hex(token: &str, line_no: usize) -> Result<u32> {
    u32::from_str_radix(token.trim_start_matches("0x"), 16)
        .map_err(|_| AnalysisError::Parse(format!("flow fact line {}: bad address", line_no)))
}

fn num(token: &str, line_no: usize) -> Result<u32> {
    token
        .parse()
        .map_err(|_| AnalysisError::Parse(format!("flow fact line {}: bad number", line_no)))
}

impl FlowFactSource for FlowFactFile {
    fn loop_bound(&self, function: &str, tail_address: u32, head_address: u32) -> Option<u32> {
        self.loops
            .iter()
            .find(|(f, tail, head, _)| {
                f == function && *tail == tail_address && *head == head_address
            })
            .map(|(_, _, _, bound)| *bound)
    }

    fn static_flows(&self) -> &[StaticFlowEntry] {
        &self.flows
    }
}

/// Attaches the flow facts of a source to a CFG.
pub struct FlowFactEnricher<'a> {
    functions: &'a [FunctionInfo],
}

impl<'a> FlowFactEnricher<'a> {
    pub fn new(functions: &'a [FunctionInfo]) -> Self {
        FlowFactEnricher { functions }
    }

    fn owning_function(&self, address: u32) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| address >= f.address && address < f.address + f.size.max(1))
    }

    /// Write loop bounds and static flow records into `cfg`.
    pub fn enrich(
        &self,
        cfg: &mut ControlFlowGraph,
        entry: NodeId,
        source: &dyn FlowFactSource,
    ) -> Result<()> {
        self.enrich_loop_bounds(cfg, entry, source)?;
        self.enrich_static_flows(cfg, source);
        Ok(())
    }

    fn enrich_loop_bounds(
        &self,
        cfg: &mut ControlFlowGraph,
        entry: NodeId,
        source: &dyn FlowFactSource,
    ) -> Result<()> {
        // collect (injecting edges, bound) pairs before mutating the graph
        let mut pending: Vec<(Vec<EdgeId>, u32)> = Vec::new();
        {
            let helper = LoopHelper::new(cfg, entry);
            for lp in helper.find_loops() {
                let head = cfg.node(lp.start_node);
                let tail = cfg.node(lp.exit_node);
                let function = match self.owning_function(head.start_address) {
                    Some(f) => f.label.clone(),
                    None => {
                        return Err(AnalysisError::Precondition(format!(
                            "loop head {} belongs to no detected function",
                            head.name
                        )))
                    }
                };
                // the injecting edges are the forward in-edges of the head
                // arriving from outside the loop body
                let injecting: Vec<EdgeId> = cfg
                    .in_edges(lp.start_node)
                    .filter(|e| {
                        e.kind != EdgeKind::BackwardJump && !lp.body[e.source as usize]
                    })
                    .map(|e| e.id)
                    .collect();
                match source.loop_bound(&function, tail.start_address, head.start_address) {
                    Some(bound) => {
                        debug!(
                            "loop bound {} for head {} (tail {}) in {}",
                            bound, head.name, tail.name, function
                        );
                        pending.push((injecting, bound));
                    }
                    None => {
                        warn!(
                            "no loop bound for head {} (tail {}) in {}, loop stays unbounded",
                            head.name, tail.name, function
                        );
                    }
                }
            }
        }
        for (injecting, bound) in pending {
            for e in injecting {
                cfg.edge_mut(e).circulation = bound as i64;
            }
        }
        Ok(())
    }

    fn enrich_static_flows(&self, cfg: &mut ControlFlowGraph, source: &dyn FlowFactSource) {
        for entry in source.static_flows() {
            let mut matched = false;
            for e in cfg.edge_ids() {
                let (src, tgt) = {
                    let edge = cfg.edge(e);
                    (cfg.node(edge.source).start_address, cfg.node(edge.target).start_address)
                };
                if src == entry.source_address && tgt == entry.target_address {
                    cfg.edge_mut(e).static_flow = Some(StaticFlowFact {
                        id: entry.id,
                        restriction: entry.restriction,
                        bound: entry.bound,
                    });
                    matched = true;
                }
            }
            if !matched {
                warn!(
                    "static flow fact {} matches no edge (0x{:08X} -> 0x{:08X} in {})",
                    entry.id, entry.source_address, entry.target_address, entry.function
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::graph::NodeKind;

    fn loop_cfg() -> (ControlFlowGraph, NodeId) {
        // entry bb 0x100 -> head 0x108 -> body 0x110 -> head (back), body -> 0x118
        let mut cfg = ControlFlowGraph::new();
        let addrs = [0x100u32, 0x108, 0x110, 0x118];
        let nodes: Vec<NodeId> = addrs
            .iter()
            .map(|a| {
                let n = cfg.add_node(NodeKind::BasicBlock, format!("0x{:08X}", a));
                cfg.node_mut(n).start_address = *a;
                cfg.node_mut(n).size = 8;
                n
            })
            .collect();
        cfg.add_edge(nodes[0], nodes[1], EdgeKind::ForwardStep);
        cfg.add_edge(nodes[1], nodes[2], EdgeKind::ForwardStep);
        cfg.add_edge(nodes[2], nodes[1], EdgeKind::BackwardJump);
        cfg.add_edge(nodes[2], nodes[3], EdgeKind::ForwardJump);
        (cfg, nodes[0])
    }

    fn functions() -> Vec<FunctionInfo> {
        vec![FunctionInfo { address: 0x100, label: "main".to_string(), size: 0x20 }]
    }

    #[test]
    fn test_loop_bound_attached_to_injecting_edge() {
        let (mut cfg, entry) = loop_cfg();
        let facts = FlowFactFile::parse("loop main 0x110 0x108 10\n").unwrap();
        let functions = functions();
        FlowFactEnricher::new(&functions).enrich(&mut cfg, entry, &facts).unwrap();

        // injecting edge 0x100 -> 0x108 carries the bound, back edge does not
        let inject = cfg.edges().find(|e| e.source == 0 && e.target == 1).unwrap();
        assert_eq!(inject.circulation, 10);
        let back = cfg.edges().find(|e| e.kind == EdgeKind::BackwardJump).unwrap();
        assert_eq!(back.circulation, -1);
    }

    #[test]
    fn test_missing_bound_leaves_loop_unbounded() {
        let (mut cfg, entry) = loop_cfg();
        let facts = FlowFactFile::default();
        let functions = functions();
        FlowFactEnricher::new(&functions).enrich(&mut cfg, entry, &facts).unwrap();
        assert!(cfg.edges().all(|e| e.circulation == -1));
    }

    #[test]
    fn test_static_flow_attached() {
        let (mut cfg, entry) = loop_cfg();
        let facts = FlowFactFile::parse("flow 1 max 5 main 0x110 0x118\n").unwrap();
        let functions = functions();
        FlowFactEnricher::new(&functions).enrich(&mut cfg, entry, &facts).unwrap();
        let e = cfg.edges().find(|e| e.target == 3).unwrap();
        let fact = e.static_flow.unwrap();
        assert_eq!(fact.id, 1);
        assert_eq!(fact.restriction, FlowRestriction::Max);
        assert_eq!(fact.bound, 5);
    }

    #[test]
    fn test_flow_fact_file_rejects_garbage() {
        assert!(FlowFactFile::parse("loop main\n").is_err());
    }
}
