//! Windowed analysis driver.
//!
//! The event stream is cut into windows of `window_size` events. Each window
//! is indexed against the state carried from the previous one, gets a fresh
//! causal model and solver, and is handed to the enabled detectors.

use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use sleuth_smt::backends::z3_backend::Z3Solver;
use sleuth_smt::encoder::{EncoderOptions, MaximalCausalModel, ModelError, ModelStats};
use sleuth_smt::solver::SmtSolver;
use sleuth_trace::closure::HbError;
use sleuth_trace::event::Event;
use sleuth_trace::metadata::Metadata;
use sleuth_trace::reader::{IngestError, Windows};
use sleuth_trace::window::{Trace, TraceError};

use crate::detect::{detect_atomicity_violations, detect_deadlocks, detect_races, DetectorSet};
use crate::result::{AnalysisReport, WindowSummary};
use crate::session::AnalysisSession;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),
    #[error("Happens-before error: {0}")]
    HappensBefore(#[from] HbError),
}

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Events per window.
    pub window_size: usize,
    /// Make every event depend on all earlier reads of its thread.
    pub no_branch: bool,
    /// Skip witness extraction; violations are reported without schedules.
    pub no_schedule: bool,
    pub detectors: DetectorSet,
    /// Per-query solver bound; `0` means unbounded.
    pub solver_timeout_ms: u64,
    /// Check that each window's recorded order satisfies its own model.
    pub check_consistency: bool,
    /// Write each window's model to `<prefix>.window<N>.smt2`.
    pub dump_smt: Option<String>,
    /// Steps shown per schedule; `0` shows all.
    pub schedule_display_limit: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            window_size: 1000,
            no_branch: false,
            no_schedule: false,
            detectors: DetectorSet::default(),
            solver_timeout_ms: 0,
            check_consistency: false,
            dump_smt: None,
            schedule_display_limit: 100,
        }
    }
}

/// Analyze a whole event stream with Z3.
pub fn analyze_events<I>(
    events: I,
    metadata: Metadata,
    options: &AnalysisOptions,
) -> Result<AnalysisReport, PipelineError>
where
    I: IntoIterator<Item = Result<Event, IngestError>>,
{
    let started = Instant::now();
    let mut session = AnalysisSession::new(metadata, options.schedule_display_limit);
    for window in Windows::new(events.into_iter(), options.window_size) {
        analyze_window(&mut session, window?, options)?;
    }
    let report = session.into_report(started.elapsed());
    info!(
        windows = report.totals.windows,
        real = report.totals.real_violations,
        potential = report.totals.potential_violations,
        elapsed_ms = report.totals.elapsed_ms,
        "analysis finished"
    );
    Ok(report)
}

/// Analyze already-materialized events.
pub fn analyze_trace(
    events: Vec<Event>,
    metadata: Metadata,
    options: &AnalysisOptions,
) -> Result<AnalysisReport, PipelineError> {
    analyze_events(events.into_iter().map(Ok), metadata, options)
}

pub fn analyze_window(
    session: &mut AnalysisSession,
    raw: Vec<Event>,
    options: &AnalysisOptions,
) -> Result<(), PipelineError> {
    analyze_window_with(session, raw, options, Z3Solver::new())
}

/// Index `raw` as the session's next window and run the detectors with `solver`.
///
/// Solver failures and inconsistent windows abandon the window but not the
/// run: its undecided suspects are discarded, violations it already
/// confirmed stay reported.
pub fn analyze_window_with<S: SmtSolver>(
    session: &mut AnalysisSession,
    raw: Vec<Event>,
    options: &AnalysisOptions,
    solver: S,
) -> Result<(), PipelineError> {
    let first_gid = raw.first().map(|e| e.gid);
    let last_gid = raw.last().map(|e| e.gid);
    let trace = Trace::load(raw, session.carry_mut())?;
    let window = trace.window();
    let stats = trace.stats();
    info!(
        window,
        events = stats.raw_events,
        critical = stats.critical_events,
        shared = stats.shared_addresses,
        "analyzing window"
    );

    let mut summary = WindowSummary {
        window,
        first_gid,
        last_gid,
        stats,
        ..WindowSummary::default()
    };
    match detect_window(&trace, solver, session, options) {
        Ok(model) => {
            summary.queries = model.queries;
            summary.degraded_reads = model.degraded_reads;
        }
        Err(ModelError::HappensBefore(e)) => return Err(e.into()),
        Err(e) => {
            let discarded = session.abandon_window(window, e.to_string());
            warn!(window, error = %e, discarded, "window abandoned");
        }
    }
    session.finish_window(&trace, summary);
    Ok(())
}

fn detect_window<S: SmtSolver>(
    trace: &Trace,
    mut solver: S,
    session: &mut AnalysisSession,
    options: &AnalysisOptions,
) -> Result<ModelStats, ModelError> {
    solver
        .set_timeout_ms(options.solver_timeout_ms)
        .map_err(|e| ModelError::Solver(e.to_string()))?;
    let encoder = EncoderOptions {
        no_branch: options.no_branch,
    };
    let mut model = MaximalCausalModel::create(trace, solver, encoder)?;
    if options.check_consistency {
        model.check_consistency()?;
    }

    let schedules = !options.no_schedule;
    if options.detectors.race {
        detect_races(&mut model, session, schedules)?;
    }
    if options.detectors.deadlock {
        detect_deadlocks(&mut model, session, schedules)?;
    }
    if options.detectors.atomicity {
        detect_atomicity_violations(&mut model, session, schedules)?;
    }

    if let Some(prefix) = &options.dump_smt {
        let path = format!("{prefix}.window{}.smt2", trace.window());
        if let Err(e) = std::fs::write(&path, model.to_smtlib()) {
            warn!(%path, error = %e, "could not write SMT dump");
        } else {
            info!(%path, "SMT dump written");
        }
    }
    Ok(model.stats())
}
