//! Exporters for intermediate graphs, cost tables, worst-case paths and the
//! function table. All of them consume finished analysis results read-only
//! and write plain files.

use crate::analyzer::error::{AnalysisError, Result};
use crate::analyzer::graph::msg::MemoryStateGraph;
use crate::analyzer::graph::{ControlFlowGraph, NodeId, NodeKind};
use crate::analyzer::program::{FunctionCallGraph, FunctionInfo};
use log::debug;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Writes GraphViz dumps of CFGs and MSGs.
pub struct GraphExporter {
    directory: PathBuf,
}

impl GraphExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        GraphExporter { directory: directory.into() }
    }

    fn write(&self, name: &str, content: String) -> Result<()> {
        let path = self.directory.join(format!("{}.dot", name));
        std::fs::write(&path, content)
            .map_err(|e| AnalysisError::Parse(format!("cannot write {}: {}", path.display(), e)))?;
        debug!("exported graph to {}", path.display());
        Ok(())
    }

    pub fn export_cfg(&self, name: &str, cfg: &ControlFlowGraph) -> Result<()> {
        self.write(name, render_cfg(cfg))
    }

    pub fn export_msg(&self, name: &str, msg: &MemoryStateGraph, cfg: &ControlFlowGraph) -> Result<()> {
        self.write(name, render_msg(msg, cfg))
    }
}

fn escape(label: &str) -> String {
    label.replace('"', "\\\"")
}

fn render_cfg(cfg: &ControlFlowGraph) -> String {
    let mut out = String::from("digraph cfg {\n");
    for n in cfg.nodes() {
        let shape = match n.kind {
            NodeKind::BasicBlock => "box",
            NodeKind::CallPoint | NodeKind::ReturnPoint => "diamond",
            _ => "ellipse",
        };
        let _ = writeln!(out, "  n{} [shape={},label=\"{}\"];", n.id, shape, escape(&n.name));
    }
    for e in cfg.edges() {
        let _ = writeln!(
            out,
            "  n{} -> n{} [label=\"{}\"];",
            e.source,
            e.target,
            escape(&e.label)
        );
    }
    out.push_str("}\n");
    out
}

fn render_msg(msg: &MemoryStateGraph, cfg: &ControlFlowGraph) -> String {
    let mut out = String::from("digraph msg {\n");
    for n in msg.nodes() {
        let _ = writeln!(
            out,
            "  m{} [label=\"{} [{}]\"];",
            n.id,
            escape(&cfg.node(n.cfg_node).name),
            n.context
        );
    }
    for e in msg.edges() {
        let _ = writeln!(out, "  m{} -> m{} [label=\"+{}\"];", e.source, e.target, e.dynamic_penalty);
    }
    out.push_str("}\n");
    out
}

/// Writes the per-block cost table of an annotated CFG.
pub struct CostExporter {
    directory: PathBuf,
}

impl CostExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        CostExporter { directory: directory.into() }
    }

    pub fn export_cost(&self, name: &str, cfg: &ControlFlowGraph) -> Result<()> {
        let mut out = String::from("# addr size cost onchip offchip penalty activation\n");
        for n in cfg.nodes() {
            if n.kind != NodeKind::BasicBlock {
                continue;
            }
            for e in cfg.out_edges(n.id) {
                let _ = writeln!(
                    out,
                    "0x{:08X} {} {} {} {} {} {}",
                    n.start_address,
                    n.size,
                    e.cost,
                    e.cost_onchip,
                    e.cost_offchip,
                    e.mem_penalty,
                    e.activation
                );
            }
        }
        let path = self.directory.join(format!("{}.cost", name));
        std::fs::write(&path, out)
            .map_err(|e| AnalysisError::Parse(format!("cannot write {}: {}", path.display(), e)))?;
        Ok(())
    }
}

/// Traverses the solved graph along activated edges and renders the
/// worst-case path and a per-block activation histogram.
pub struct WcPathExporter<'a> {
    cfg: &'a ControlFlowGraph,
    entry: NodeId,
    exit: NodeId,
}

impl<'a> WcPathExporter<'a> {
    pub fn new(cfg: &'a ControlFlowGraph, entry: NodeId, exit: NodeId) -> Self {
        WcPathExporter { cfg, entry, exit }
    }

    /// Walk from entry to exit, always taking an out-edge with remaining
    /// activation, preferring the most activated one.
    pub fn render_path(&self) -> String {
        let mut remaining_by_edge = std::collections::HashMap::new();
        for e in self.cfg.edges() {
            remaining_by_edge.insert(e.id, e.activation);
        }
        let mut out = String::new();
        let mut current = self.entry;
        let mut steps = 0usize;
        let step_cap: usize = remaining_by_edge.values().map(|&v| v as usize).sum::<usize>() + 1;
        loop {
            let _ = writeln!(out, "{}", self.cfg.node(current).name);
            if current == self.exit || steps > step_cap {
                break;
            }
            let next = self
                .cfg
                .out_edges(current)
                .filter(|e| remaining_by_edge.get(&e.id).copied().unwrap_or(0) > 0)
                .max_by_key(|e| remaining_by_edge[&e.id]);
            match next {
                Some(e) => {
                    *remaining_by_edge.get_mut(&e.id).unwrap() -= 1;
                    current = e.target;
                }
                None => break,
            }
            steps += 1;
        }
        out
    }

    /// Per-block execution counts on the worst-case path.
    pub fn render_histogram(&self) -> String {
        let mut out = String::from("# addr executions\n");
        for n in self.cfg.nodes() {
            if n.kind != NodeKind::BasicBlock {
                continue;
            }
            let executions: u64 = self.cfg.out_edges(n.id).map(|e| e.activation).sum();
            if executions > 0 {
                let _ = writeln!(out, "0x{:08X} {}", n.start_address, executions);
            }
        }
        out
    }

    pub fn write_path(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render_path())
            .map_err(|e| AnalysisError::Parse(format!("cannot write {}: {}", path.display(), e)))
    }

    pub fn write_histogram(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render_histogram())
            .map_err(|e| AnalysisError::Parse(format!("cannot write {}: {}", path.display(), e)))
    }
}

/// Writes the table of functions reachable from the entry function.
pub struct FunctionTableCreator {
    path: PathBuf,
}

impl FunctionTableCreator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FunctionTableCreator { path: path.into() }
    }

    pub fn create_function_table(
        &self,
        call_graph: &FunctionCallGraph,
        entry_function: u32,
    ) -> Result<()> {
        let reachable = call_graph.reachable_from(entry_function);
        let mut functions: Vec<&FunctionInfo> = call_graph
            .functions
            .iter()
            .filter(|f| reachable.contains(&f.address))
            .collect();
        functions.sort_by_key(|f| f.address);
        let mut out = String::from("# label address size\n");
        for f in functions {
            let _ = writeln!(out, "{} 0x{:08X} {}", f.label, f.address, f.size);
        }
        std::fs::write(&self.path, out).map_err(|e| {
            AnalysisError::Parse(format!("cannot write {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::graph::EdgeKind;

    fn solved_cfg() -> (ControlFlowGraph, NodeId, NodeId) {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.add_node(NodeKind::Meta, "entry");
        let a = cfg.add_node(NodeKind::BasicBlock, "0x100");
        let b = cfg.add_node(NodeKind::BasicBlock, "0x110");
        let exit = cfg.add_node(NodeKind::Meta, "exit");
        cfg.node_mut(a).start_address = 0x100;
        cfg.node_mut(b).start_address = 0x110;
        let e0 = cfg.add_edge(entry, a, EdgeKind::Meta);
        let e1 = cfg.add_edge(a, b, EdgeKind::ForwardStep);
        let e2 = cfg.add_edge(b, exit, EdgeKind::Meta);
        for e in [e0, e1, e2] {
            cfg.edge_mut(e).activation = 1;
        }
        (cfg, entry, exit)
    }

    #[test]
    fn test_dot_rendering() {
        let (cfg, _, _) = solved_cfg();
        let dot = render_cfg(&cfg);
        assert!(dot.starts_with("digraph cfg {"));
        assert!(dot.contains("n1 [shape=box,label=\"0x100\"]"));
        assert!(dot.contains("n0 -> n1"));
    }

    #[test]
    fn test_wc_path_traversal() {
        let (cfg, entry, exit) = solved_cfg();
        let exporter = WcPathExporter::new(&cfg, entry, exit);
        let path = exporter.render_path();
        let lines: Vec<&str> = path.lines().collect();
        assert_eq!(lines, vec!["entry", "0x100", "0x110", "exit"]);
        let hist = exporter.render_histogram();
        assert!(hist.contains("0x00000100 1"));
    }

    #[test]
    fn test_function_table_skips_unreachable() {
        let call_graph = FunctionCallGraph {
            functions: vec![
                FunctionInfo { address: 0x100, label: "main".into(), size: 32 },
                FunctionInfo { address: 0x200, label: "used".into(), size: 32 },
                FunctionInfo { address: 0x300, label: "dead".into(), size: 32 },
            ],
            calls: vec![(0x100, 0x200)],
        };
        let dir = std::env::temp_dir().join("wcetan_function_table_test.txt");
        let creator = FunctionTableCreator::new(&dir);
        creator.create_function_table(&call_graph, 0x100).unwrap();
        let content = std::fs::read_to_string(&dir).unwrap();
        assert!(content.contains("main"));
        assert!(content.contains("used"));
        assert!(!content.contains("dead"));
        let _ = std::fs::remove_file(&dir);
    }
}
