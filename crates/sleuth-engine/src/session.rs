//! State owned by one analysis run.

use std::collections::HashSet;
use std::time::Duration;

use indexmap::IndexSet;
use tracing::info;

use sleuth_trace::event::ThreadId;
use sleuth_trace::metadata::Metadata;
use sleuth_trace::window::{CarryState, EventIdx, Trace};

use crate::result::{AnalysisReport, FailedWindow, Totals, WindowSummary};
use crate::schedule::{Schedule, SchedulePrefix};
use crate::violation::{PotentialViolation, Signature, Unconfirmed, Violation};

/// Deduplication sets, carried window state and findings of a run.
///
/// Windows must be fed in trace order; a session is never shared between
/// runs.
#[derive(Debug)]
pub struct AnalysisSession {
    metadata: Metadata,
    carry: CarryState,
    prefix: SchedulePrefix,
    confirmed: IndexSet<Signature>,
    unconfirmed: IndexSet<Signature>,
    violations: Vec<Violation>,
    potentials: Vec<PotentialViolation>,
    windows: Vec<WindowSummary>,
    failed: Vec<FailedWindow>,
    threads: HashSet<ThreadId>,
}

impl AnalysisSession {
    pub fn new(metadata: Metadata, schedule_display_limit: usize) -> Self {
        Self {
            metadata,
            carry: CarryState::new(),
            prefix: SchedulePrefix::new(schedule_display_limit),
            confirmed: IndexSet::new(),
            unconfirmed: IndexSet::new(),
            violations: Vec::new(),
            potentials: Vec::new(),
            windows: Vec::new(),
            failed: Vec::new(),
            threads: HashSet::new(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn carry_mut(&mut self) -> &mut CarryState {
        &mut self.carry
    }

    pub fn prefix(&self) -> &SchedulePrefix {
        &self.prefix
    }

    pub fn is_confirmed(&self, signature: &Signature) -> bool {
        self.confirmed.contains(signature)
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn potentials(&self) -> &[PotentialViolation] {
        &self.potentials
    }

    pub fn windows(&self) -> &[WindowSummary] {
        &self.windows
    }

    pub fn failed_windows(&self) -> &[FailedWindow] {
        &self.failed
    }

    /// Record a confirmed violation exhibited by `events` of `trace`.
    ///
    /// Returns `false` if the signature was already confirmed. A pending
    /// unconfirmed entry for the same signature is withdrawn.
    pub fn confirm(
        &mut self,
        signature: Signature,
        trace: &Trace,
        events: &[EventIdx],
        schedules: Vec<Schedule>,
    ) -> bool {
        if !self.confirmed.insert(signature.clone()) {
            return false;
        }
        if self.unconfirmed.shift_remove(&signature) {
            self.potentials.retain(|p| p.signature != signature);
        }
        let mut threads: Vec<ThreadId> = Vec::new();
        for &e in events {
            let thread = trace.event(e).thread;
            if !threads.contains(&thread) {
                threads.push(thread);
            }
        }
        let description = signature.describe(&self.metadata);
        info!(window = trace.window(), category = %signature.category(), "{description}");
        self.violations.push(Violation {
            signature,
            description,
            window: trace.window(),
            gids: events.iter().map(|e| trace.event(*e).gid).collect(),
            threads,
            schedules,
        });
        true
    }

    /// Record a suspect the solver did not confirm, once per signature.
    pub fn record_unconfirmed(&mut self, signature: Signature, window: usize, outcome: Unconfirmed) {
        if self.confirmed.contains(&signature) || !self.unconfirmed.insert(signature.clone()) {
            return;
        }
        let description = signature.describe(&self.metadata);
        self.potentials.push(PotentialViolation {
            signature,
            description,
            window,
            outcome,
        });
    }

    /// Give up on `window`. Suspects it first left undecided go with it;
    /// violations it confirmed stay reported. Returns the number dropped.
    pub fn abandon_window(&mut self, window: usize, reason: String) -> usize {
        let before = self.potentials.len();
        let unconfirmed = &mut self.unconfirmed;
        self.potentials.retain(|p| {
            if p.window != window {
                return true;
            }
            unconfirmed.shift_remove(&p.signature);
            false
        });
        self.failed.push(FailedWindow { window, reason });
        before - self.potentials.len()
    }

    /// Close a window: its events join the schedule prefix of later windows.
    pub fn finish_window(&mut self, trace: &Trace, mut summary: WindowSummary) {
        self.prefix.extend(trace, &self.metadata);
        self.threads.extend(trace.threads().keys().copied());
        summary.confirmed = self
            .violations
            .iter()
            .filter(|v| v.window == trace.window())
            .count();
        summary.potential = self
            .potentials
            .iter()
            .filter(|p| p.window == trace.window())
            .count();
        self.windows.push(summary);
    }

    pub fn totals(&self, elapsed: Duration) -> Totals {
        let mut totals = Totals {
            threads: self.threads.len(),
            potential_violations: self.potentials.len(),
            real_violations: self.violations.len(),
            windows: self.windows.len(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            ..Totals::default()
        };
        for w in &self.windows {
            totals.events += w.stats.raw_events;
            totals.critical_events += w.stats.critical_events;
            totals.shared_addresses += w.stats.shared_addresses;
            totals.read_writes += w.stats.read_writes;
            totals.synchronizations += w.stats.synchronizations;
            totals.branches += w.stats.branches;
            totals.local_accesses += w.stats.local_accesses;
        }
        totals
    }

    pub fn into_report(self, elapsed: Duration) -> AnalysisReport {
        let totals = self.totals(elapsed);
        AnalysisReport {
            violations: self.violations,
            potentials: self.potentials,
            windows: self.windows,
            failed_windows: self.failed,
            totals,
        }
    }
}
