//! Witness schedules reconstructed from solver models.
//!
//! A schedule is the recorded history of the windows already analyzed
//! followed by the reordered events of the current window that lead to the
//! violation. Only the last `limit` steps are kept; the rest are counted.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use sleuth_smt::encoder::Witness;
use sleuth_trace::event::{EventKind, ThreadId};
use sleuth_trace::metadata::Metadata;
use sleuth_trace::window::{EventIdx, Trace};

/// One executed event, with names resolved for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStep {
    pub gid: u64,
    pub thread: ThreadId,
    pub thread_name: String,
    pub site: String,
    pub action: String,
}

impl ScheduleStep {
    pub fn of(trace: &Trace, idx: EventIdx, metadata: &Metadata) -> Self {
        let event = trace.event(idx);
        // The reacquisition after a wait shares the wait's gid.
        let reacquire = idx > 0 && trace.event(idx - 1).gid == event.gid;
        let action = match &event.kind {
            EventKind::Lock { lock, .. } if reacquire => format!("reacquire {lock}"),
            kind => kind.to_string(),
        };
        Self {
            gid: event.gid,
            thread: event.thread,
            thread_name: metadata.thread_name(event.thread),
            site: metadata.location_signature(event.location),
            action,
        }
    }
}

impl fmt::Display for ScheduleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}: {}", self.thread_name, self.site, self.action)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schedule {
    /// Leading steps dropped from the display.
    pub elided: usize,
    pub steps: Vec<ScheduleStep>,
}

impl Schedule {
    /// Keep the last `limit` steps (`0` keeps all).
    pub fn trimmed(mut steps: Vec<ScheduleStep>, mut elided: usize, limit: usize) -> Self {
        if limit > 0 && steps.len() > limit {
            let cut = steps.len() - limit;
            steps.drain(..cut);
            elided += cut;
        }
        Self { elided, steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elided > 0 {
            writeln!(f, "...")?;
        }
        for step in &self.steps {
            writeln!(f, "{step}")?;
        }
        Ok(())
    }
}

/// Recorded schedule of the windows analyzed so far.
#[derive(Debug, Clone, Default)]
pub struct SchedulePrefix {
    steps: VecDeque<ScheduleStep>,
    elided: usize,
    limit: usize,
}

impl SchedulePrefix {
    pub fn new(limit: usize) -> Self {
        Self {
            steps: VecDeque::new(),
            elided: 0,
            limit,
        }
    }

    /// Append a finished window in its recorded order.
    pub fn extend(&mut self, trace: &Trace, metadata: &Metadata) {
        for idx in 0..trace.len() {
            self.steps.push_back(ScheduleStep::of(trace, idx, metadata));
        }
        while self.limit > 0 && self.steps.len() > self.limit {
            self.steps.pop_front();
            self.elided += 1;
        }
    }

    /// Total number of recorded steps, including elided ones.
    pub fn len(&self) -> usize {
        self.elided + self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prefix followed by `tail`, trimmed to the display limit.
    pub fn compose(&self, tail: Vec<ScheduleStep>) -> Schedule {
        let steps = self.steps.iter().cloned().chain(tail).collect();
        Schedule::trimmed(steps, self.elided, self.limit)
    }
}

/// Events of `trace` accepted by `keep`, in the order `witness` assigns.
pub fn witness_steps(
    trace: &Trace,
    witness: &Witness,
    metadata: &Metadata,
    keep: impl FnMut(EventIdx, i64) -> bool,
) -> Vec<ScheduleStep> {
    witness
        .ordered_events(keep)
        .into_iter()
        .map(|idx| ScheduleStep::of(trace, idx, metadata))
        .collect()
}

/// Steps for explicitly ordered events, e.g. the two racing accesses.
pub fn steps_of(trace: &Trace, events: &[EventIdx], metadata: &Metadata) -> Vec<ScheduleStep> {
    events
        .iter()
        .map(|idx| ScheduleStep::of(trace, *idx, metadata))
        .collect()
}
