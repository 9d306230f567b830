// End-to-end pipeline tests against a canned solver backend
mod utils;

#[cfg(test)]
mod tests {
    use crate::utils::{CannedBackend, CALL_DUMP, STRAIGHT_LINE_DUMP};
    use wcetan_core::analyzer::arch::ArchConfig;
    use wcetan_core::analyzer::config::{MemoryType, ReplacementPolicy};
    use wcetan_core::analyzer::ilp::solver::LpSolutionType;
    use wcetan_core::analyzer::pipeline::TimingAnalysis;
    use wcetan_core::analyzer::program::TextDumpParser;
    use wcetan_core::Configuration;

    fn config_for(memory_type: MemoryType, test_name: &str) -> Configuration {
        Configuration {
            memory_type,
            entry_function: "main".to_string(),
            report_file: std::env::temp_dir()
                .join(format!("wcetan_{}_report.txt", test_name))
                .display()
                .to_string(),
            export_directory: std::env::temp_dir().display().to_string(),
            ..Configuration::default()
        }
    }

    #[test]
    fn test_nomem_straight_line() {
        let config = config_for(MemoryType::NoMem, "nomem");
        let arch = ArchConfig::for_architecture(config.architecture);
        let backend = CannedBackend::new(0);
        let mut parser = TextDumpParser::new(STRAIGHT_LINE_DUMP, "main");
        let mut analysis = TimingAnalysis::new(&config, arch, &backend);
        let outcome = analysis.start(&mut parser).unwrap();

        // both blocks execute off-chip: (4 + 2*4) + (4 + 3 + 2*4)
        assert_eq!(outcome.wcet, 27);
        assert_eq!(outcome.mem_cost, 16);
        assert_eq!(outcome.solution_type, LpSolutionType::OptimalSolution);
        assert_eq!(*backend.invocations.borrow(), 1);
        let report = std::fs::read_to_string(&config.report_file).unwrap();
        assert!(report.contains("0 0 27 - 16 optimal"), "report was: {}", report);
        let _ = std::fs::remove_file(&config.report_file);
    }

    #[test]
    fn test_vivu_test_mode_keeps_timing() {
        let config = config_for(MemoryType::VivuTest, "vivu");
        let arch = ArchConfig::for_architecture(config.architecture);
        let backend = CannedBackend::new(0);
        let mut parser = TextDumpParser::new(STRAIGHT_LINE_DUMP, "main");
        let mut analysis = TimingAnalysis::new(&config, arch, &backend);
        let outcome = analysis.start(&mut parser).unwrap();

        // the transformation itself must not change the bound
        assert_eq!(outcome.wcet, 27);
        let _ = std::fs::remove_file(&config.report_file);
    }

    #[test]
    fn test_icache_adds_miss_penalties() {
        let mut config = config_for(MemoryType::Icache, "icache");
        config.memory_replacement_policy = ReplacementPolicy::Lru;
        config.memory_size = 1024;
        let arch = ArchConfig::for_architecture(config.architecture);
        let backend = CannedBackend::new(0);
        let mut parser = TextDumpParser::new(STRAIGHT_LINE_DUMP, "main");
        let mut analysis = TimingAnalysis::new(&config, arch, &backend);
        let outcome = analysis.start(&mut parser).unwrap();

        // on-chip execution (4, 4+3) plus two cold line misses at 10 cycles
        assert_eq!(outcome.wcet, 31);
        assert_eq!(outcome.mem_cost, 20);
        let report = std::fs::read_to_string(&config.report_file).unwrap();
        assert!(report.contains("cache_wcp=H:0|M:2|N:0"), "report was: {}", report);
        let _ = std::fs::remove_file(&config.report_file);
    }

    #[test]
    fn test_disp_fifo_call_penalties() {
        let mut config = config_for(MemoryType::Disp, "disp");
        config.memory_replacement_policy = ReplacementPolicy::Fifo;
        config.memory_size = 64;
        let arch = ArchConfig::for_architecture(config.architecture);
        let backend = CannedBackend::new(0);
        let mut parser = TextDumpParser::new(CALL_DUMP, "main");
        let mut analysis = TimingAnalysis::new(&config, arch, &backend);
        let outcome = analysis.start(&mut parser).unwrap();

        // execution 7 + 7 + 7 cycles, plus the root-function load (3) and
        // the helper load (2); the return to main hits
        assert_eq!(outcome.wcet, 26);
        assert_eq!(outcome.mem_cost, 5);
        let _ = std::fs::remove_file(&config.report_file);
    }

    #[test]
    fn test_bbsisp_assignment_improves_wcet() {
        let mut config = config_for(MemoryType::Bbsisp, "bbsisp");
        config.memory_size = 64;
        let arch = ArchConfig::for_architecture(config.architecture);
        // the canned backend assigns every block; both fit
        let backend = CannedBackend::new(32);
        let mut parser = TextDumpParser::new(STRAIGHT_LINE_DUMP, "main");
        let mut analysis = TimingAnalysis::new(&config, arch, &backend);
        let outcome = analysis.start(&mut parser).unwrap();

        // baseline pays the off-chip surcharge, the final round does not
        assert_eq!(outcome.baseline_wcet, Some(27));
        assert_eq!(outcome.wcet, 11);
        // baseline IPET + allocation + final IPET
        assert_eq!(*backend.invocations.borrow(), 3);
        let report = std::fs::read_to_string(&config.report_file).unwrap();
        assert!(report.contains("blocks=[0x00000100,0x00000110]"), "report was: {}", report);
        assert!(report.contains(" 11 27 "), "report was: {}", report);
        let _ = std::fs::remove_file(&config.report_file);
    }

    #[test]
    fn test_fsisp_whole_function_assignment() {
        let mut config = config_for(MemoryType::Fsisp, "fsisp");
        config.memory_size = 64;
        let arch = ArchConfig::for_architecture(config.architecture);
        let backend = CannedBackend::new(48);
        let mut parser = TextDumpParser::new(CALL_DUMP, "main");
        let mut analysis = TimingAnalysis::new(&config, arch, &backend);
        let outcome = analysis.start(&mut parser).unwrap();

        assert!(outcome.baseline_wcet.unwrap() > outcome.wcet);
        let report = std::fs::read_to_string(&config.report_file).unwrap();
        assert!(report.contains("functions=[main,helper]"), "report was: {}", report);
        let _ = std::fs::remove_file(&config.report_file);
    }

    #[test]
    fn test_size_stepping_emits_one_line_per_size() {
        let mut config = config_for(MemoryType::Bbsisp, "stepping");
        config.memory_size_stepping = true;
        config.memory_size_steps = vec![0, 64];
        let arch = ArchConfig::for_architecture(config.architecture);
        let backend = CannedBackend::new(32);
        let mut parser = TextDumpParser::new(STRAIGHT_LINE_DUMP, "main");
        let mut analysis = TimingAnalysis::new(&config, arch, &backend);
        let outcome = analysis.start(&mut parser).unwrap();

        assert_eq!(outcome.steps.len(), 2);
        let report = std::fs::read_to_string(&config.report_file).unwrap();
        let lines: Vec<&str> = report.lines().filter(|l| !l.starts_with('#')).collect();
        // one leading baseline line plus one line per size step
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("0 0 27"));
        let _ = std::fs::remove_file(&config.report_file);
    }

    #[test]
    fn test_function_table_export() {
        let mut config = config_for(MemoryType::NoMem, "ftable");
        config.export_function_table = true;
        config.function_table_file = std::env::temp_dir()
            .join("wcetan_ftable_test.txt")
            .display()
            .to_string();
        let arch = ArchConfig::for_architecture(config.architecture);
        let backend = CannedBackend::new(0);
        let mut parser = TextDumpParser::new(CALL_DUMP, "main");
        let mut analysis = TimingAnalysis::new(&config, arch, &backend);
        analysis.start(&mut parser).unwrap();

        let table = std::fs::read_to_string(&config.function_table_file).unwrap();
        assert!(table.contains("main 0x00000100 32"));
        assert!(table.contains("helper 0x00000200 16"));
        let _ = std::fs::remove_file(&config.function_table_file);
        let _ = std::fs::remove_file(&config.report_file);
    }
}
