// CLI application
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use wcetan_core::analyzer::arch::ArchConfig;
use wcetan_core::analyzer::error::AnalysisError;
use wcetan_core::analyzer::ilp::solver::LpSolver;
use wcetan_core::analyzer::pipeline::TimingAnalysis;
use wcetan_core::analyzer::program::TextDumpParser;
use wcetan_core::Configuration;

#[derive(Parser)]
#[command(name = "wcetan")]
#[command(about = "Static WCET analyzer for instruction scratchpads and caches")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run a timing analysis described by a configuration file
    Analyze {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Override the entry function of the configuration
        #[arg(long)]
        entry_function: Option<String>,

        /// Override the report file of the configuration
        #[arg(long)]
        report_file: Option<PathBuf>,
    },
    /// Validate a configuration file without running the analysis
    CheckConfig {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AnalysisError>() {
        Some(AnalysisError::Config(_)) => 2,
        Some(AnalysisError::Parse(_)) => 3,
        Some(AnalysisError::Precondition(_)) => 4,
        Some(AnalysisError::StateExplosion { .. }) => 5,
        Some(AnalysisError::Solver(_)) => 6,
        Some(AnalysisError::Internal(_)) => 7,
        None => 1,
    }
}

fn run_analysis(
    config_path: &PathBuf,
    entry_function: Option<String>,
    report_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = Configuration::from_file(config_path)?;
    if let Some(entry) = entry_function {
        config.entry_function = entry;
    }
    if let Some(report) = report_file {
        config.report_file = report.display().to_string();
    }
    config.validate()?;

    let arch = ArchConfig::for_architecture(config.architecture);
    let solver = LpSolver::new(config.lp_solve_parameters.clone());
    let mut parser =
        TextDumpParser::from_file(std::path::Path::new(&config.dump_file), &config.entry_function)?;

    let pb = create_progress_bar("Analyzing...");
    let mut analysis = TimingAnalysis::new(&config, arch, &solver);
    let outcome = analysis.start(&mut parser)?;
    pb.finish_with_message("Analysis complete");

    log::info!(
        "WCET estimate: {} cycles (memory cost {}, solution {:?})",
        outcome.wcet,
        outcome.mem_cost,
        outcome.solution_type
    );
    println!("{}", outcome.wcet);
    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Analyze { config, entry_function, report_file } => {
            run_analysis(&config, entry_function, report_file)
        }
        Commands::CheckConfig { config } => Configuration::from_file(&config)
            .map(|_| println!("configuration is valid"))
            .map_err(anyhow::Error::from),
    };

    if let Err(err) = result {
        eprintln!("error: {:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}
