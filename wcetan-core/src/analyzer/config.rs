//! Analysis configuration.
//!
//! Deserialized from a JSON file; every field has a default so partial
//! configurations stay usable. `validate()` rejects conflicting toggles
//! before any analysis phase runs.

use crate::analyzer::arch::Architecture;
use crate::analyzer::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Instruction memory architecture under analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryType {
    NoMem,
    VivuTest,
    Icache,
    Disp,
    Bbsisp,
    BbsispJp,
    BbsispWcp,
    BbsispJpWcp,
    Fsisp,
    FsispWcp,
    FsispOld,
}

impl MemoryType {
    /// Static scratchpads are allocated ahead of time by an optimizer.
    pub fn is_static(self) -> bool {
        matches!(
            self,
            MemoryType::Bbsisp
                | MemoryType::BbsispJp
                | MemoryType::BbsispWcp
                | MemoryType::BbsispJpWcp
                | MemoryType::Fsisp
                | MemoryType::FsispWcp
                | MemoryType::FsispOld
        )
    }

    /// Dynamic memories change content at run time and need the MSG analyses.
    pub fn is_dynamic(self) -> bool {
        matches!(self, MemoryType::Icache | MemoryType::Disp)
    }

    pub fn uses_jump_penalties(self) -> bool {
        matches!(self, MemoryType::BbsispJp | MemoryType::BbsispJpWcp)
    }
}

/// Replacement policy of the dynamic memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplacementPolicy {
    Lru,
    Fifo,
    DirectMapped,
    Stack,
}

/// Metric maximized by the path analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisMetric {
    Wcet,
    /// Dynamic instruction count.
    Mdic,
    /// Path length in bytes.
    Mpl,
    WcetRatioFiles,
}

/// Expected values the result checker compares computed metrics against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedResults {
    /// Expected WCET without any allocation (baseline).
    pub wcet_without_optimization: u64,
    /// Expected final WCET.
    pub wcet: u64,
    /// Expected memory cost portion of the WCET.
    pub mem_cost: u64,
    /// Expected WCET per memory size (stepping mode).
    pub wcet_per_size: BTreeMap<u32, u64>,
    /// Expected memory cost per memory size (stepping mode).
    pub mem_cost_per_size: BTreeMap<u32, u64>,
    /// Simulated execution time used to report the overestimation.
    pub simulated_time: u64,
}

/// Full analyzer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub architecture: Architecture,
    /// Label the analysis starts at.
    pub entry_function: String,
    /// Path of the disassembly dump.
    pub dump_file: String,
    pub memory_type: MemoryType,
    pub memory_replacement_policy: ReplacementPolicy,
    /// On-chip memory size in bytes.
    pub memory_size: u32,
    /// Total on-chip budget; when non-zero the usable size is derived from it.
    pub memory_budget: u32,
    /// Iterate the analysis over `memory_size_steps`.
    pub memory_size_stepping: bool,
    pub memory_size_steps: Vec<u32>,
    pub use_metric: AnalysisMetric,
    pub use_flowfact_file: bool,
    pub use_flowfact_graph_enrichment: bool,
    pub flowfact_file: String,
    /// Enumerate one reference per basic block instead of per cache line.
    pub memory_cache_bbs: bool,
    /// Keep analysing when a function does not fit the DISP (it then always
    /// executes off-chip); abort otherwise.
    pub memory_disp_ignore_outsized_functions: bool,
    /// Cap on the concrete-state set size of the brute-force DFAs.
    pub max_abstract_state_count: usize,
    /// Use the sound intra-block cache state update. The unsound historical
    /// variant is kept selectable for comparison.
    pub fix_intra_block_state_update: bool,
    pub bbsisp_wcp_fill_isp_up: bool,
    pub bbsisp_wcp_shrink_ilp_formulation: bool,
    pub memory_bbsisp_add_jump_penalties_to_wcet: bool,
    pub export_graphs: bool,
    pub export_ilps: bool,
    pub export_bb_costs: bool,
    pub export_wc_path: bool,
    pub export_wc_path_hist: bool,
    pub export_function_table: bool,
    pub export_directory: String,
    /// Opaque parameter string forwarded to the solver invocation.
    pub lp_solve_parameters: String,
    pub report_file: String,
    pub report_append: bool,
    pub function_table_file: String,
    pub expected: ExpectedResults,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            architecture: Architecture::Carcore,
            entry_function: "main".to_string(),
            dump_file: String::new(),
            memory_type: MemoryType::NoMem,
            memory_replacement_policy: ReplacementPolicy::Lru,
            memory_size: 0,
            memory_budget: 0,
            memory_size_stepping: false,
            memory_size_steps: Vec::new(),
            use_metric: AnalysisMetric::Wcet,
            use_flowfact_file: false,
            use_flowfact_graph_enrichment: false,
            flowfact_file: String::new(),
            memory_cache_bbs: false,
            memory_disp_ignore_outsized_functions: false,
            max_abstract_state_count: 16384,
            fix_intra_block_state_update: true,
            bbsisp_wcp_fill_isp_up: false,
            bbsisp_wcp_shrink_ilp_formulation: false,
            memory_bbsisp_add_jump_penalties_to_wcet: false,
            export_graphs: false,
            export_ilps: false,
            export_bb_costs: false,
            export_wc_path: false,
            export_wc_path_hist: false,
            export_function_table: false,
            export_directory: ".".to_string(),
            lp_solve_parameters: String::new(),
            report_file: "report.txt".to_string(),
            report_append: false,
            function_table_file: "functions.txt".to_string(),
            expected: ExpectedResults::default(),
        }
    }
}

impl Configuration {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Configuration = serde_json::from_str(&text)
            .map_err(|e| AnalysisError::Config(format!("invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject option combinations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.use_flowfact_graph_enrichment && !self.use_flowfact_file {
            return Err(AnalysisError::Config(
                "use_flowfact_graph_enrichment requires use_flowfact_file".to_string(),
            ));
        }
        if self.memory_type.is_dynamic() && self.memory_size == 0 && self.memory_budget == 0 {
            return Err(AnalysisError::Config(
                "a dynamic memory needs memory_size or memory_budget".to_string(),
            ));
        }
        if self.memory_size_stepping && self.memory_size_steps.is_empty() {
            return Err(AnalysisError::Config(
                "memory_size_stepping requires a non-empty memory_size_steps list".to_string(),
            ));
        }
        match self.memory_type {
            MemoryType::Icache => {
                if !matches!(
                    self.memory_replacement_policy,
                    ReplacementPolicy::Lru | ReplacementPolicy::Fifo | ReplacementPolicy::DirectMapped
                ) {
                    return Err(AnalysisError::Config(
                        "ICACHE supports LRU, FIFO and DIRECT_MAPPED only".to_string(),
                    ));
                }
            }
            MemoryType::Disp => {
                if !matches!(
                    self.memory_replacement_policy,
                    ReplacementPolicy::Fifo | ReplacementPolicy::Stack
                ) {
                    return Err(AnalysisError::Config(
                        "DISP supports FIFO and STACK only".to_string(),
                    ));
                }
            }
            _ => {}
        }
        if self.memory_bbsisp_add_jump_penalties_to_wcet && !self.memory_type.is_static() {
            return Err(AnalysisError::Config(
                "jump penalties are only meaningful for static scratchpads".to_string(),
            ));
        }
        Ok(())
    }

    /// Sizes the analysis iterates over; a single entry without stepping.
    pub fn size_sequence(&self) -> Vec<u32> {
        if self.memory_size_stepping {
            self.memory_size_steps.clone()
        } else {
            vec![self.memory_size]
        }
    }
}
