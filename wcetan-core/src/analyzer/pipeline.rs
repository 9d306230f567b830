//! Analysis Pipeline
//!
//! Orchestrates the complete timing analysis:
//!
//! 1. **Program analysis**: parse the dump, attach flow facts.
//! 2. **Pipeline analysis**: baseline edge costs for the configured memory.
//! 3. **Instruction memory analysis**: VIVU plus the cache/DISP DFA for the
//!    dynamic memories, or baseline-ILP plus an allocation optimizer plus
//!    cost update for the static scratchpads.
//! 4. **Estimate calculation**: the IPET ILP, solved externally; results are
//!    checked against configured expectations and reported.
//!
//! A memory-size stepper re-runs stages 3 and 4 over a configured size
//! sequence while reusing the parsed program and the baseline timing.

use crate::analyzer::arch::ArchConfig;
use crate::analyzer::config::{Configuration, MemoryType};
use crate::analyzer::cost::CostCalculator;
use crate::analyzer::error::AnalysisError;
use crate::analyzer::export::{CostExporter, FunctionTableCreator, GraphExporter, WcPathExporter};
use crate::analyzer::flowfacts::{FlowFactEnricher, FlowFactFile};
use crate::analyzer::graph::{ControlFlowGraph, NodeId};
use crate::analyzer::ilp::generator::IlpGenerator;
use crate::analyzer::ilp::solver::{IlpBackend, LpSolutionType};
use crate::analyzer::isa::{isa_helper_for, IsaHelper};
use crate::analyzer::memory::cache_dfa::{DfaStatistics, ICacheDfa};
use crate::analyzer::memory::cache_state::CacheStateMaintainer;
use crate::analyzer::memory::disp_dfa::{DispDfa, DispStateMaintainer};
use crate::analyzer::memory::params::MemoryParameters;
use crate::analyzer::program::{FunctionInfo, ParsedProgram, ProgramParser};
use crate::analyzer::report::{ReportGenerator, ResultChecker};
use crate::analyzer::sisp::bbsisp::BbsispOptimizer;
use crate::analyzer::sisp::bbsisp_jp::BbsispJpOptimizer;
use crate::analyzer::sisp::bbsisp_jp_wcp::BbsispJpWcpOptimizer;
use crate::analyzer::sisp::bbsisp_wcp::BbsispWcpOptimizer;
use crate::analyzer::sisp::fsisp::{FsispOldOptimizer, FsispOptimizer, FsispWcpOptimizer};
use crate::analyzer::sisp::{check_sisp_assignment, SispOptimizer, SispResult};
use crate::analyzer::vivu::{MsgToCfgConverter, VivuGraphCreator};
use anyhow::{anyhow, Result};
use log::{debug, info};
use std::path::PathBuf;

/// Result of one size step.
#[derive(Debug, Clone)]
pub struct SizeStepOutcome {
    pub mem_size: u32,
    pub wcet: u64,
    pub mem_cost: u64,
    pub solution_type: LpSolutionType,
}

/// Overall analysis result.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub wcet: u64,
    pub mem_cost: u64,
    pub solution_type: LpSolutionType,
    pub baseline_wcet: Option<u64>,
    pub steps: Vec<SizeStepOutcome>,
}

struct Baseline {
    cfg: ControlFlowGraph,
    entry: NodeId,
    exit: NodeId,
    wcet: u64,
    mem_cost: u64,
    solution_type: LpSolutionType,
}

struct ImemOutput {
    cfg: ControlFlowGraph,
    entry: NodeId,
    exit: NodeId,
    mem_size: u32,
    used_size: u32,
    dfa_statistics: Option<DfaStatistics>,
    sisp_result: Option<SispResult>,
    assigned_functions: Vec<FunctionInfo>,
    is_cache: bool,
}

/// The analysis driver.
pub struct TimingAnalysis<'a> {
    config: &'a Configuration,
    arch: ArchConfig,
    solver: &'a dyn IlpBackend,
    isa: Box<dyn IsaHelper>,
    report: ReportGenerator,
    program: Option<ParsedProgram>,
    cost_annotated: Option<(ControlFlowGraph, NodeId, NodeId)>,
    baseline: Option<Baseline>,
}

impl<'a> TimingAnalysis<'a> {
    pub fn new(config: &'a Configuration, arch: ArchConfig, solver: &'a dyn IlpBackend) -> Self {
        let isa = isa_helper_for(config.architecture);
        let report = ReportGenerator::new(config);
        TimingAnalysis {
            config,
            arch,
            solver,
            isa,
            report,
            program: None,
            cost_annotated: None,
            baseline: None,
        }
    }

    pub fn report(&self) -> &ReportGenerator {
        &self.report
    }

    /// Run the full analysis.
    pub fn start(&mut self, parser: &mut dyn ProgramParser) -> Result<AnalysisOutcome> {
        info!("entering application with start label: {}", self.config.entry_function);
        self.analyse_program(parser)?;
        self.analyse_pipeline()?;

        let mut steps = Vec::new();
        if self.config.memory_size_stepping {
            self.report.generate_header();
            for size in self.config.size_sequence() {
                let step = self.analyse_size(Some(size))?;
                steps.push(step);
                self.report.generate_line();
            }
        } else {
            let step = self.analyse_size(None)?;
            steps.push(step);
            self.report.generate();
        }

        if self.config.export_function_table {
            let program = self.program.as_ref().expect("program parsed");
            let entry = program
                .call_graph
                .function_by_label(&self.config.entry_function)
                .map(|f| f.address)
                .unwrap_or(0);
            FunctionTableCreator::new(&self.config.function_table_file)
                .create_function_table(&program.call_graph, entry)?;
        }
        self.report.flush()?;

        let last = steps.last().expect("at least one analysis step");
        Ok(AnalysisOutcome {
            wcet: last.wcet,
            mem_cost: last.mem_cost,
            solution_type: last.solution_type,
            baseline_wcet: self.baseline.as_ref().map(|b| b.wcet),
            steps,
        })
    }

    /// Stage 1: parse the dump and attach flow facts.
    pub fn analyse_program(&mut self, parser: &mut dyn ProgramParser) -> Result<()> {
        let mut program = parser.parse()?;
        self.report.set_code_size(program.code_size);
        info!(
            "code size is: {} number of functions: {}",
            program.code_size,
            program.functions.len()
        );

        if self.config.use_flowfact_graph_enrichment {
            let facts = FlowFactFile::from_file(std::path::Path::new(&self.config.flowfact_file))?;
            let enricher = FlowFactEnricher::new(&program.functions);
            enricher.enrich(&mut program.cfg, program.entry, &facts)?;
        }

        if self.config.export_graphs {
            GraphExporter::new(&self.config.export_directory)
                .export_cfg("supergraph", &program.cfg)?;
        }
        self.program = Some(program);
        Ok(())
    }

    /// Stage 2: baseline edge costs.
    pub fn analyse_pipeline(&mut self) -> Result<()> {
        let program = self.program.as_ref().ok_or_else(|| anyhow!("No program parsed"))?;
        let mut cfg = program.cfg.clone();
        let calculator =
            CostCalculator::new(&self.arch, self.config.use_metric, self.config.memory_type);
        calculator.calculate_cost(&mut cfg);
        self.cost_annotated = Some((cfg, program.entry, program.exit));
        Ok(())
    }

    /// Stages 3 and 4 for one memory size.
    fn analyse_size(&mut self, size_override: Option<u32>) -> Result<SizeStepOutcome> {
        let imem = self.analyse_imem(size_override)?;
        self.calculate_estimate(imem)
    }

    /// Stage 3: the memory-specific analysis round.
    fn analyse_imem(&mut self, size_override: Option<u32>) -> Result<ImemOutput> {
        let (ca_cfg, entry, exit) = self
            .cost_annotated
            .clone()
            .ok_or_else(|| anyhow!("No cost-annotated graph built"))?;
        let memory = MemoryParameters::new(self.config, &self.arch);

        match self.config.memory_type {
            MemoryType::NoMem => {
                debug!("analyzing program without on-chip memory");
                Ok(ImemOutput {
                    cfg: ca_cfg,
                    entry,
                    exit,
                    mem_size: 0,
                    used_size: 0,
                    dfa_statistics: None,
                    sisp_result: None,
                    assigned_functions: Vec::new(),
                    is_cache: false,
                })
            }
            MemoryType::VivuTest => {
                debug!("creating memory state graph (VIVU)");
                let vivu = VivuGraphCreator::new(&ca_cfg, entry, exit).create_vivu_graph()?;
                if self.config.export_graphs {
                    GraphExporter::new(&self.config.export_directory)
                        .export_msg("vivu_graph", &vivu.msg, &vivu.cfg)?;
                }
                let (cfg, entry, exit) = MsgToCfgConverter::new(&vivu).convert();
                Ok(ImemOutput {
                    cfg,
                    entry,
                    exit,
                    mem_size: 0,
                    used_size: 0,
                    dfa_statistics: None,
                    sisp_result: None,
                    assigned_functions: Vec::new(),
                    is_cache: false,
                })
            }
            MemoryType::Icache => {
                let params = memory.cache_params(size_override)?;
                let mem_size = params.size;
                debug!("starting data flow analysis for the cache");
                let mut vivu = VivuGraphCreator::new(&ca_cfg, entry, exit).create_vivu_graph()?;
                let maintainer =
                    CacheStateMaintainer::new(params, self.config.max_abstract_state_count);
                let mut dfa = ICacheDfa::new(
                    &mut vivu,
                    maintainer,
                    &self.arch,
                    self.config.fix_intra_block_state_update,
                );
                dfa.analyze_cache()?;
                dfa.categorize_cache_accesses();
                let statistics = dfa.statistics();
                drop(dfa);
                if self.config.export_graphs {
                    GraphExporter::new(&self.config.export_directory)
                        .export_msg("vivu_cache_graph", &vivu.msg, &vivu.cfg)?;
                }
                let (cfg, entry, exit) = MsgToCfgConverter::new(&vivu).convert();
                Ok(ImemOutput {
                    cfg,
                    entry,
                    exit,
                    mem_size,
                    used_size: mem_size,
                    dfa_statistics: Some(statistics),
                    sisp_result: None,
                    assigned_functions: Vec::new(),
                    is_cache: true,
                })
            }
            MemoryType::Disp => {
                let params = memory.disp_params(size_override)?;
                let mem_size = params.size;
                debug!("starting data flow analysis for the DISP");
                let program = self.program.as_ref().expect("program parsed");
                let mut vivu = VivuGraphCreator::new(&ca_cfg, entry, exit).create_vivu_graph()?;
                let maintainer = DispStateMaintainer::new(
                    params,
                    &program.call_graph,
                    self.config.max_abstract_state_count,
                );
                let mut dfa = DispDfa::new(&mut vivu, maintainer, &self.arch);
                dfa.analyze_disp()?;
                dfa.categorize_mem_accesses();
                let statistics = dfa.statistics();
                drop(dfa);
                if self.config.export_graphs {
                    GraphExporter::new(&self.config.export_directory)
                        .export_msg("vivu_disp_graph", &vivu.msg, &vivu.cfg)?;
                }
                let (cfg, entry, exit) = MsgToCfgConverter::new(&vivu).convert();
                Ok(ImemOutput {
                    cfg,
                    entry,
                    exit,
                    mem_size,
                    used_size: mem_size,
                    dfa_statistics: Some(statistics),
                    sisp_result: None,
                    assigned_functions: Vec::new(),
                    is_cache: false,
                })
            }
            _ => self.analyse_sisp(memory.sisp_params(size_override).size),
        }
    }

    /// Static scratchpad round: baseline ILP, allocation, cost update.
    fn analyse_sisp(&mut self, sisp_size: u32) -> Result<ImemOutput> {
        if self.baseline.is_none() {
            self.calculate_baseline_estimate()?;
        }
        let baseline = self.baseline.as_ref().expect("baseline calculated");
        let bl_cfg = baseline.cfg.clone();
        let (entry, exit) = (baseline.entry, baseline.exit);
        let metric = self.config.use_metric;
        let program = self.program.as_ref().expect("program parsed");
        let functions = program.functions.clone();

        let mut optimizer: Box<dyn SispOptimizer + '_> = match self.config.memory_type {
            MemoryType::Bbsisp => {
                info!("starting Knapsack-based BBSISP allocation");
                Box::new(BbsispOptimizer::new(bl_cfg.clone(), entry, exit, metric, sisp_size))
            }
            MemoryType::BbsispJp => {
                info!("starting Knapsack-based BBSISP allocation with penalties");
                Box::new(BbsispJpOptimizer::new(
                    bl_cfg.clone(),
                    entry,
                    exit,
                    metric,
                    sisp_size,
                    &self.arch,
                    self.isa.as_ref(),
                ))
            }
            MemoryType::BbsispWcp => {
                info!("starting WCP-aware BBSISP allocation");
                Box::new(BbsispWcpOptimizer::new(
                    bl_cfg.clone(),
                    entry,
                    exit,
                    metric,
                    sisp_size,
                    self.config.bbsisp_wcp_fill_isp_up,
                    self.config.bbsisp_wcp_shrink_ilp_formulation,
                ))
            }
            MemoryType::BbsispJpWcp => {
                info!("starting WCP-aware BBSISP allocation with penalties");
                Box::new(BbsispJpWcpOptimizer::new(
                    bl_cfg.clone(),
                    entry,
                    exit,
                    metric,
                    sisp_size,
                    self.config.bbsisp_wcp_fill_isp_up,
                    self.config.bbsisp_wcp_shrink_ilp_formulation,
                    &self.arch,
                    self.isa.as_ref(),
                ))
            }
            MemoryType::Fsisp => {
                info!("starting Knapsack-based FSISP allocation");
                Box::new(FsispOptimizer::new(
                    bl_cfg.clone(),
                    entry,
                    exit,
                    metric,
                    sisp_size,
                    functions.clone(),
                ))
            }
            MemoryType::FsispWcp => {
                info!("starting WCP-aware FSISP allocation");
                Box::new(FsispWcpOptimizer::new(
                    bl_cfg.clone(),
                    entry,
                    exit,
                    metric,
                    sisp_size,
                    self.config.bbsisp_wcp_fill_isp_up,
                    self.config.bbsisp_wcp_shrink_ilp_formulation,
                    functions.clone(),
                ))
            }
            MemoryType::FsispOld => {
                info!("starting legacy Knapsack-based FSISP allocation");
                Box::new(FsispOldOptimizer::new(
                    bl_cfg.clone(),
                    entry,
                    exit,
                    metric,
                    sisp_size,
                    functions.clone(),
                ))
            }
            other => return Err(anyhow!("memory type {:?} is not a static scratchpad", other)),
        };

        let ilp_path = self.export_path(&format!(
            "wcetan_{}_{}_{}.ilp",
            self.config.entry_function, "sisp", sisp_size
        ));
        optimizer.calculate_block_assignment(self.solver, &ilp_path)?;
        let assigned_blocks = optimizer.block_assignment().to_vec();
        let result = optimizer.results();
        let assigned_functions = match self.config.memory_type {
            MemoryType::Fsisp | MemoryType::FsispWcp | MemoryType::FsispOld => functions
                .iter()
                .filter(|f| assigned_blocks.contains(&f.address))
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        drop(optimizer);

        debug!(
            "block assignment for a scratchpad of {} bytes (used {}): {:?}",
            sisp_size, result.used_size, assigned_blocks
        );

        // update the graph: assigned blocks lose their penalty; the
        // jump-penalty modes recalculate the affected edge costs
        let mut ma_cfg = bl_cfg;
        let recompute = self.config.memory_type.uses_jump_penalties()
            || self.config.memory_bbsisp_add_jump_penalties_to_wcet;
        let calculator =
            CostCalculator::new(&self.arch, self.config.use_metric, self.config.memory_type);
        calculator.consider_memory_assignment(
            &mut ma_cfg,
            &assigned_blocks,
            recompute,
            self.isa.as_ref(),
        );

        Ok(ImemOutput {
            cfg: ma_cfg,
            entry,
            exit,
            mem_size: sisp_size,
            used_size: result.used_size,
            dfa_statistics: None,
            sisp_result: Some(result),
            assigned_functions,
            is_cache: false,
        })
    }

    /// Baseline WCET of the unmodified program, needed by the allocators.
    fn calculate_baseline_estimate(&mut self) -> Result<()> {
        let (ca_cfg, entry, exit) = self
            .cost_annotated
            .clone()
            .ok_or_else(|| anyhow!("No cost-annotated graph built"))?;
        let mut generator = IlpGenerator::new(
            ca_cfg,
            entry,
            exit,
            self.config.use_metric,
            self.config.memory_type,
        );
        generator.create_ilp()?;
        if self.config.export_ilps {
            generator.write_ilp_file(&self.export_path(&format!(
                "wcetan_{}_baseline.ilp",
                self.config.entry_function
            )))?;
        }
        let ilp_path = self.export_path("baseline.ilp.tmp");
        let status = generator.solve_ilp(self.solver, &ilp_path)?;
        check_solution_usable(status)?;

        let checker = ResultChecker::new(self.config);
        checker.check_baseline_wcet(generator.wc_cost_value());

        if self.config.export_bb_costs {
            CostExporter::new(&self.config.export_directory)
                .export_cost("nomem_wo_assignment", generator.ilp_cfg())?;
        }
        let wcet = generator.wc_cost_value();
        let mem_cost = generator.mem_cost_value();
        let (cfg, entry, exit) = generator.into_cfg();
        info!("baseline WCET is {} (memory cost {})", wcet, mem_cost);
        if self.config.memory_size_stepping {
            // the stepping report leads with the unoptimized program
            self.report.set_mem_size(0, 0);
            self.report.set_wc_cost_value(wcet, status);
            self.report.set_mem_cost_value(mem_cost);
            self.report.generate_line();
        }
        self.baseline =
            Some(Baseline { cfg, entry, exit, wcet, mem_cost, solution_type: status });
        Ok(())
    }

    /// Stage 4: the IPET estimate of the analyzed graph.
    fn calculate_estimate(&mut self, imem: ImemOutput) -> Result<SizeStepOutcome> {
        let mut generator = IlpGenerator::new(
            imem.cfg,
            imem.entry,
            imem.exit,
            self.config.use_metric,
            self.config.memory_type,
        );
        generator.create_ilp()?;
        if self.config.export_ilps {
            generator.write_ilp_file(&self.export_path(&format!(
                "wcetan_{}_{}.ilp",
                self.config.entry_function, imem.mem_size
            )))?;
        }
        let ilp_path = self.export_path("estimate.ilp.tmp");
        let status = generator.solve_ilp(self.solver, &ilp_path)?;
        check_solution_usable(status)?;

        let wcet = generator.wc_cost_value();
        let mem_cost = generator.mem_cost_value();

        let checker = ResultChecker::new(self.config);
        if self.config.memory_size_stepping {
            checker.check_wcet_for_size(wcet, imem.mem_size);
            checker.check_mem_cost_for_size(mem_cost, imem.mem_size);
        } else {
            checker.check_wcet(wcet);
            checker.check_mem_cost(mem_cost);
        }

        if let Some(result) = &imem.sisp_result {
            let in_cfg = generator.size_of_blocks(&result.assigned_bbs);
            let sizes_may_shift = self.config.memory_type.uses_jump_penalties()
                || self.config.memory_bbsisp_add_jump_penalties_to_wcet;
            check_sisp_assignment(result, in_cfg, sizes_may_shift)?;
            if result.estimated_timing != u64::MAX && result.estimated_timing != wcet {
                log::warn!(
                    "allocation ILP estimated a WCET of {} but the IPET round computed {}",
                    result.estimated_timing,
                    wcet
                );
            }
            self.report.set_block_assignment(result.assigned_bbs.clone());
        }
        if !imem.assigned_functions.is_empty() {
            self.report.set_function_assignment(imem.assigned_functions.clone());
        }
        if let Some(statistics) = imem.dfa_statistics {
            self.report.set_dfa_statistics(statistics);
        }
        if imem.is_cache {
            self.report.set_cache_hm_stats(generator.cache_stats_for_wcp());
        }

        if self.config.export_bb_costs {
            CostExporter::new(&self.config.export_directory).export_cost(
                &format!("m{:?}_size_{}", self.config.memory_type, imem.mem_size),
                generator.ilp_cfg(),
            )?;
        }
        if self.config.export_graphs {
            GraphExporter::new(&self.config.export_directory)
                .export_cfg(&format!("ilpgraph_{}", imem.mem_size), generator.ilp_cfg())?;
        }
        if self.config.export_wc_path || self.config.export_wc_path_hist {
            let exporter =
                WcPathExporter::new(generator.ilp_cfg(), generator.entry(), generator.exit());
            if self.config.export_wc_path {
                exporter.write_path(&self.export_path("worst_case.wcp"))?;
            }
            if self.config.export_wc_path_hist {
                exporter.write_histogram(&self.export_path("worst_case.wch"))?;
            }
        }

        self.report.set_mem_size(imem.mem_size, imem.used_size);
        self.report.set_wc_cost_value(wcet, status);
        self.report.set_mem_cost_value(mem_cost);
        if self.config.memory_type.is_static() {
            let baseline = self.baseline.as_ref().expect("baseline calculated");
            self.report.set_baseline_wc_cost_value(baseline.wcet);
        }

        Ok(SizeStepOutcome { mem_size: imem.mem_size, wcet, mem_cost, solution_type: status })
    }

    fn export_path(&self, name: &str) -> PathBuf {
        PathBuf::from(&self.config.export_directory).join(name)
    }
}

/// Unbound or failed solver runs stop the analysis without a WCET value.
fn check_solution_usable(status: LpSolutionType) -> Result<()> {
    match status {
        LpSolutionType::OptimalSolution => Ok(()),
        LpSolutionType::SuboptimalSolution => {
            log::warn!("accepting a suboptimal solver solution");
            Ok(())
        }
        LpSolutionType::ProblemUnbound => {
            Err(AnalysisError::Solver("the ILP is unbound (missing loop bound?)".into()).into())
        }
        LpSolutionType::ErrorWhileSolving => {
            Err(AnalysisError::Solver("unknown error while solving the ILP".into()).into())
        }
        LpSolutionType::SolutionNotCalculated => {
            Err(AnalysisError::Solver("the solution was not calculated".into()).into())
        }
    }
}
