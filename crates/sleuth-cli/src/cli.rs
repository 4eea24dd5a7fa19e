//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Predictive concurrency-bug detection over recorded execution traces.\n\n\
    Every reordering of the trace that each thread could still have produced is\n\
    encoded as an SMT formula; a race, deadlock or atomicity violation is\n\
    reported only when the solver finds such a reordering that exhibits it.\n\n\
    Typical use:\n  \
    1. sleuth stats trace.jsonl\n  \
    2. sleuth analyze trace.jsonl --metadata meta.json\n  \
    3. sleuth analyze trace.jsonl --deadlock --atomicity --format json";

#[derive(Parser)]
#[command(name = "sleuth")]
#[command(about = "Predictive race, deadlock and atomicity-violation detection")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Options shared by every command that reads a trace.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct TraceArgs {
    /// Path to the JSON Lines event log (`-` reads stdin)
    pub(crate) trace: PathBuf,

    /// Metadata document naming locations and threads
    #[arg(long)]
    pub(crate) metadata: Option<PathBuf>,

    /// Events per analysis window
    #[arg(long, default_value_t = 1000)]
    pub(crate) window_size: usize,

    /// Output format: text | json
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub(crate) format: OutputFormat,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Detect concurrency bugs predicted by the trace
    Analyze {
        #[command(flatten)]
        trace: TraceArgs,

        /// Treat every event as dependent on all earlier reads of its thread
        #[arg(long)]
        no_branch: bool,

        /// Report violations without witness schedules
        #[arg(long)]
        no_schedule: bool,

        /// Also look for deadlocks
        #[arg(long)]
        deadlock: bool,

        /// Also look for atomicity violations
        #[arg(long)]
        atomicity: bool,

        /// Skip race detection
        #[arg(long)]
        no_race: bool,

        /// Per-query solver timeout in milliseconds (0 = unbounded)
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,

        /// Check each window's recorded order against its own model first
        #[arg(long)]
        check_consistency: bool,

        /// Write each window's SMT-LIB2 model to `<PREFIX>.window<N>.smt2`
        #[arg(long, value_name = "PREFIX")]
        dump_smt: Option<String>,

        /// Schedule steps shown per witness (0 = all)
        #[arg(long, default_value_t = 100)]
        schedule_limit: usize,
    },

    /// Index the trace window by window and print its statistics
    Stats {
        #[command(flatten)]
        trace: TraceArgs,
    },
}
