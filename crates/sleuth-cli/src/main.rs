#![doc = include_str!("../README.md")]

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze {
            trace,
            no_branch,
            no_schedule,
            deadlock,
            atomicity,
            no_race,
            timeout_ms,
            check_consistency,
            dump_smt,
            schedule_limit,
        } => {
            let detectors = commands::analyze::detectors(!no_race, deadlock, atomicity)?;
            let options = sleuth_engine::pipeline::AnalysisOptions {
                window_size: trace.window_size,
                no_branch,
                no_schedule,
                detectors,
                solver_timeout_ms: timeout_ms,
                check_consistency,
                dump_smt,
                schedule_display_limit: schedule_limit,
            };
            commands::analyze::run_analyze_command(&trace, &options)?;
        }
        Commands::Stats { trace } => {
            commands::stats::run_stats_command(&trace)?;
        }
    }
    Ok(())
}
