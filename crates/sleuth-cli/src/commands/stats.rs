// Command handler for: Stats
//
// Indexes the trace exactly as `analyze` would, without building any solver
// model, and reports the per-window and overall counters.

use std::time::Instant;

use miette::IntoDiagnostic;
use serde::Serialize;

use sleuth_engine::result::{Totals, WindowSummary};
use sleuth_engine::session::AnalysisSession;
use sleuth_trace::closure::HappensBefore;
use sleuth_trace::reader::Windows;
use sleuth_trace::window::Trace;

use super::helpers::{load_metadata, open_trace};
use crate::cli::{OutputFormat, TraceArgs};

#[derive(Debug, Serialize)]
pub(crate) struct StatsReport {
    pub(crate) windows: Vec<WindowSummary>,
    pub(crate) totals: Totals,
}

pub(crate) fn run_stats_command(args: &TraceArgs) -> miette::Result<()> {
    let metadata = load_metadata(args.metadata.as_deref())?;
    let events = open_trace(&args.trace)?;
    let report = collect_stats(events, metadata, args.window_size)?;
    match args.format {
        OutputFormat::Text => {
            for w in &report.windows {
                println!(
                    "Window {}: {} events, {} critical, {} shared addresses",
                    w.window, w.stats.raw_events, w.stats.critical_events, w.stats.shared_addresses
                );
            }
            println!("{}", report.totals);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        }
    }
    Ok(())
}

pub(crate) fn collect_stats<I>(
    events: I,
    metadata: sleuth_trace::metadata::Metadata,
    window_size: usize,
) -> miette::Result<StatsReport>
where
    I: Iterator<Item = Result<sleuth_trace::event::Event, sleuth_trace::reader::IngestError>>,
{
    let started = Instant::now();
    // Schedules are never rendered here; keep the prefix minimal.
    let mut session = AnalysisSession::new(metadata, 1);
    for window in Windows::new(events, window_size) {
        let raw = window?;
        let first_gid = raw.first().map(|e| e.gid);
        let last_gid = raw.last().map(|e| e.gid);
        let trace = Trace::load(raw, session.carry_mut()).into_diagnostic()?;
        HappensBefore::build(&trace).into_diagnostic()?;
        let summary = WindowSummary {
            window: trace.window(),
            first_gid,
            last_gid,
            stats: trace.stats(),
            ..WindowSummary::default()
        };
        session.finish_window(&trace, summary);
    }
    let report = session.into_report(started.elapsed());
    Ok(StatsReport {
        windows: report.windows,
        totals: report.totals,
    })
}
