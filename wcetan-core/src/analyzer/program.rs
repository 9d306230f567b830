//! Parsed-program interface.
//!
//! The disassembly front ends are external collaborators; the pipeline only
//! relies on the interface defined here: a super control-flow graph spanning
//! all reachable functions, the list of detected functions, and the function
//! call graph. A minimal text-dump reader implements the interface so the
//! analyzer is runnable end to end.

use crate::analyzer::error::{AnalysisError, Result};
use crate::analyzer::graph::{ControlFlowGraph, EdgeKind, NodeId, NodeKind};
use log::debug;
use std::collections::HashMap;

/// A detected function label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub address: u32,
    pub label: String,
    /// Function size in bytes.
    pub size: u32,
}

/// Call relation between the detected functions.
#[derive(Debug, Clone, Default)]
pub struct FunctionCallGraph {
    pub functions: Vec<FunctionInfo>,
    /// (caller address, callee address) pairs.
    pub calls: Vec<(u32, u32)>,
}

impl FunctionCallGraph {
    pub fn function(&self, address: u32) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.address == address)
    }

    pub fn function_by_label(&self, label: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.label == label)
    }

    pub fn function_size(&self, address: u32) -> u32 {
        self.function(address).map(|f| f.size).unwrap_or(0)
    }

    pub fn callees_of(&self, caller: u32) -> Vec<u32> {
        self.calls.iter().filter(|(c, _)| *c == caller).map(|(_, t)| *t).collect()
    }

    /// Functions reachable from `root` over the call relation.
    pub fn reachable_from(&self, root: u32) -> Vec<u32> {
        let mut reachable = vec![root];
        let mut queue = vec![root];
        while let Some(f) = queue.pop() {
            for callee in self.callees_of(f) {
                if !reachable.contains(&callee) {
                    reachable.push(callee);
                    queue.push(callee);
                }
            }
        }
        reachable
    }
}

/// Everything the front end hands over to the analysis pipeline.
#[derive(Debug, Clone)]
pub struct ParsedProgram {
    pub cfg: ControlFlowGraph,
    /// Super entry (Meta node framing the entry function).
    pub entry: NodeId,
    /// Super exit.
    pub exit: NodeId,
    pub functions: Vec<FunctionInfo>,
    /// Function address → (Entry node, Exit node) of its body in the SCFG.
    pub function_nodes: HashMap<u32, (NodeId, NodeId)>,
    pub call_graph: FunctionCallGraph,
    pub code_size: u32,
}

/// Front-end interface: produce a `ParsedProgram` from a dump.
pub trait ProgramParser {
    fn parse(&mut self) -> Result<ParsedProgram>;
}

/// Minimal plain-text dump reader.
///
/// Format, one record per line (code lines of the preceding `bb` record are
/// indented):
///
/// ```text
/// function <label> <hex_addr> <size>
/// bb <hex_start> <size> <instr_count>
///   <addr>: <encoding> <mnemonic> <operands>
/// edge <hex_src> <hex_tgt> step|jump|backjump
/// call <hex_caller_bb> <hex_callee_fn> <hex_return_bb>
/// ```
pub struct TextDumpParser {
    text: String,
    entry_function: String,
}

struct RawBlock {
    start: u32,
    size: u32,
    instruction_count: u32,
    code: String,
}

impl TextDumpParser {
    pub fn new(text: impl Into<String>, entry_function: impl Into<String>) -> Self {
        TextDumpParser { text: text.into(), entry_function: entry_function.into() }
    }

    pub fn from_file(path: &std::path::Path, entry_function: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::Parse(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(TextDumpParser::new(text, entry_function))
    }
}

fn parse_hex(token: &str, line_no: usize) -> Result<u32> {
    let stripped = token.trim_start_matches("0x");
    u32::from_str_radix(stripped, 16)
        .map_err(|_| AnalysisError::Parse(format!("line {}: bad address '{}'", line_no, token)))
}

fn parse_num(token: &str, line_no: usize) -> Result<u32> {
    token
        .parse::<u32>()
        .map_err(|_| AnalysisError::Parse(format!("line {}: bad number '{}'", line_no, token)))
}

impl ProgramParser for TextDumpParser {
    fn parse(&mut self) -> Result<ParsedProgram> {
        let mut functions: Vec<FunctionInfo> = Vec::new();
        let mut blocks: Vec<RawBlock> = Vec::new();
        let mut edges: Vec<(u32, u32, EdgeKind)> = Vec::new();
        let mut calls: Vec<(u32, u32, u32)> = Vec::new();

        for (idx, line) in self.text.lines().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                // code line of the preceding bb record
                let block = blocks.last_mut().ok_or_else(|| {
                    AnalysisError::Parse(format!("line {}: code line without a bb record", line_no))
                })?;
                if !block.code.is_empty() {
                    block.code.push('\n');
                }
                block.code.push_str(line.trim());
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens[0] {
                "function" => {
                    if tokens.len() != 4 {
                        return Err(AnalysisError::Parse(format!(
                            "line {}: expected 'function <label> <addr> <size>'",
                            line_no
                        )));
                    }
                    functions.push(FunctionInfo {
                        label: tokens[1].to_string(),
                        address: parse_hex(tokens[2], line_no)?,
                        size: parse_num(tokens[3], line_no)?,
                    });
                }
                "bb" => {
                    if tokens.len() != 4 {
                        return Err(AnalysisError::Parse(format!(
                            "line {}: expected 'bb <start> <size> <instr_count>'",
                            line_no
                        )));
                    }
                    blocks.push(RawBlock {
                        start: parse_hex(tokens[1], line_no)?,
                        size: parse_num(tokens[2], line_no)?,
                        instruction_count: parse_num(tokens[3], line_no)?,
                        code: String::new(),
                    });
                }
                "edge" => {
                    if tokens.len() != 4 {
                        return Err(AnalysisError::Parse(format!(
                            "line {}: expected 'edge <src> <tgt> <kind>'",
                            line_no
                        )));
                    }
                    let kind = match tokens[3] {
                        "step" => EdgeKind::ForwardStep,
                        "jump" => EdgeKind::ForwardJump,
                        "backjump" => EdgeKind::BackwardJump,
                        other => {
                            return Err(AnalysisError::Parse(format!(
                                "line {}: unknown edge kind '{}'",
                                line_no, other
                            )))
                        }
                    };
                    edges.push((parse_hex(tokens[1], line_no)?, parse_hex(tokens[2], line_no)?, kind));
                }
                "call" => {
                    if tokens.len() != 4 {
                        return Err(AnalysisError::Parse(format!(
                            "line {}: expected 'call <caller_bb> <callee_fn> <return_bb>'",
                            line_no
                        )));
                    }
                    calls.push((
                        parse_hex(tokens[1], line_no)?,
                        parse_hex(tokens[2], line_no)?,
                        parse_hex(tokens[3], line_no)?,
                    ));
                }
                other => {
                    return Err(AnalysisError::Parse(format!(
                        "line {}: unknown record '{}'",
                        line_no, other
                    )))
                }
            }
        }

        build_scfg(&self.entry_function, functions, blocks, edges, calls)
    }
}

fn build_scfg(
    entry_function: &str,
    functions: Vec<FunctionInfo>,
    blocks: Vec<RawBlock>,
    edges: Vec<(u32, u32, EdgeKind)>,
    calls: Vec<(u32, u32, u32)>,
) -> Result<ParsedProgram> {
    if functions.is_empty() {
        return Err(AnalysisError::Parse("dump contains no function".to_string()));
    }
    let entry_info = functions
        .iter()
        .find(|f| f.label == entry_function)
        .ok_or_else(|| {
            AnalysisError::Parse(format!("entry function '{}' not in dump", entry_function))
        })?
        .clone();

    let mut cfg = ControlFlowGraph::new();
    let mut bb_nodes: HashMap<u32, NodeId> = HashMap::new();
    let mut function_nodes: HashMap<u32, (NodeId, NodeId)> = HashMap::new();

    let owning_function = |addr: u32| -> Option<&FunctionInfo> {
        functions.iter().find(|f| addr >= f.address && addr < f.address + f.size.max(1))
    };

    for f in &functions {
        let entry = cfg.add_node(NodeKind::Entry, format!("{}_entry", f.label));
        let exit = cfg.add_node(NodeKind::Exit, format!("{}_exit", f.label));
        cfg.node_mut(entry).start_address = f.address;
        cfg.node_mut(exit).start_address = f.address;
        function_nodes.insert(f.address, (entry, exit));
    }

    for block in &blocks {
        let node = cfg.add_node(NodeKind::BasicBlock, format!("0x{:08X}", block.start));
        {
            let n = cfg.node_mut(node);
            n.start_address = block.start;
            n.end_address = block.start + block.size;
            n.size = block.size;
            n.instruction_count = block.instruction_count;
            n.code = block.code.clone();
        }
        bb_nodes.insert(block.start, node);
    }

    // function entry -> first block, declared block edges
    for f in &functions {
        let (fentry, _) = function_nodes[&f.address];
        let first = bb_nodes.get(&f.address).ok_or_else(|| {
            AnalysisError::Parse(format!("function {} has no block at its entry address", f.label))
        })?;
        cfg.add_edge(fentry, *first, EdgeKind::Meta);
    }
    for (src, tgt, kind) in &edges {
        let s = bb_nodes
            .get(src)
            .ok_or_else(|| AnalysisError::Parse(format!("edge source 0x{:08X} unknown", src)))?;
        let t = bb_nodes
            .get(tgt)
            .ok_or_else(|| AnalysisError::Parse(format!("edge target 0x{:08X} unknown", tgt)))?;
        cfg.add_edge(*s, *t, *kind);
    }

    // call sites: caller bb -> CallPoint -> callee entry, callee exit -> ReturnPoint -> return bb
    let mut context_id: u32 = 0;
    let mut call_pairs: Vec<(u32, u32)> = Vec::new();
    for (caller_bb, callee, return_bb) in &calls {
        let caller_node = *bb_nodes
            .get(caller_bb)
            .ok_or_else(|| AnalysisError::Parse(format!("call site 0x{:08X} unknown", caller_bb)))?;
        let return_node = *bb_nodes
            .get(return_bb)
            .ok_or_else(|| AnalysisError::Parse(format!("return block 0x{:08X} unknown", return_bb)))?;
        let (callee_entry, callee_exit) = *function_nodes
            .get(callee)
            .ok_or_else(|| AnalysisError::Parse(format!("callee 0x{:08X} unknown", callee)))?;
        let context_addr = cfg.node(caller_node).end_address;

        let cp = cfg.add_node(NodeKind::CallPoint, format!("call_0x{:08X}_c{}", callee, context_id));
        let rp = cfg.add_node(NodeKind::ReturnPoint, format!("ret_0x{:08X}_c{}", callee, context_id));
        for id in [cp, rp] {
            let n = cfg.node_mut(id);
            n.end_address = context_addr;
            n.context_id = context_id;
            n.call_target = *callee;
        }
        cfg.add_edge(caller_node, cp, EdgeKind::Meta);
        cfg.add_edge(cp, callee_entry, EdgeKind::Meta);
        cfg.add_edge(callee_exit, rp, EdgeKind::Meta);
        cfg.add_edge(rp, return_node, EdgeKind::Meta);

        let caller_fn = owning_function(*caller_bb).map(|f| f.address).unwrap_or(0);
        call_pairs.push((caller_fn, *callee));
        context_id += 1;
    }

    // blocks without successors fall through to their function's exit
    for block in &blocks {
        let node = bb_nodes[&block.start];
        if cfg.out_degree(node) == 0 {
            let f = owning_function(block.start).ok_or_else(|| {
                AnalysisError::Parse(format!("block 0x{:08X} outside any function", block.start))
            })?;
            let (_, fexit) = function_nodes[&f.address];
            cfg.add_edge(node, fexit, EdgeKind::Meta);
        }
    }

    // frame the entry function with super entry/exit meta nodes
    let (root_entry, root_exit) = function_nodes[&entry_info.address];
    let super_entry = cfg.add_node(NodeKind::Meta, "super_entry");
    let super_exit = cfg.add_node(NodeKind::Meta, "super_exit");
    cfg.add_edge(super_entry, root_entry, EdgeKind::Meta);
    cfg.add_edge(root_exit, super_exit, EdgeKind::Meta);

    let code_size = functions.iter().map(|f| f.size).sum();
    debug!(
        "parsed dump: {} functions, {} blocks, {} call sites, code size {}",
        functions.len(),
        blocks.len(),
        calls.len(),
        code_size
    );

    let call_graph = FunctionCallGraph { functions: functions.clone(), calls: call_pairs };
    Ok(ParsedProgram {
        cfg,
        entry: super_entry,
        exit: super_exit,
        functions,
        function_nodes,
        call_graph,
        code_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
# two functions, main calls helper
function main 0x100 16
function helper 0x200 8
bb 0x100 8 2
  100: 02f1 mov d15, d1
  104: 6d00 call 200
bb 0x108 8 2
  108: 9000 ret
bb 0x200 8 1
  200: 9000 ret
call 0x100 0x200 0x108
";

    #[test]
    fn test_parse_dump_builds_scfg() {
        let mut parser = TextDumpParser::new(DUMP, "main");
        let program = parser.parse().unwrap();
        assert_eq!(program.functions.len(), 2);
        assert_eq!(program.code_size, 24);
        // super entry is a meta node with one successor
        assert_eq!(program.cfg.node(program.entry).kind, NodeKind::Meta);
        assert_eq!(program.cfg.out_degree(program.entry), 1);
        // exactly one call/return pair
        let cps: Vec<_> =
            program.cfg.nodes().filter(|n| n.kind == NodeKind::CallPoint).collect();
        assert_eq!(cps.len(), 1);
        assert_eq!(program.cfg.paired_return_point(cps[0].id).is_some(), true);
        // call graph records main -> helper
        assert_eq!(program.call_graph.callees_of(0x100), vec![0x200]);
    }

    #[test]
    fn test_unknown_entry_function_rejected() {
        let mut parser = TextDumpParser::new(DUMP, "nonexistent");
        assert!(parser.parse().is_err());
    }

    #[test]
    fn test_malformed_record_rejected() {
        let mut parser = TextDumpParser::new("bb 0x100", "main");
        assert!(parser.parse().is_err());
    }
}
