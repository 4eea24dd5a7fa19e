//! Predictive deadlock detection over nested lock acquisitions.

use tracing::debug;

use sleuth_smt::encoder::{CircularWait, MaximalCausalModel, ModelError, Query, Witness};
use sleuth_smt::solver::SmtSolver;
use sleuth_trace::event::{SyncObject, ThreadId};
use sleuth_trace::window::{EventIdx, RegionIdx, Trace};

use super::settle;
use crate::schedule::{witness_steps, Schedule};
use crate::session::AnalysisSession;
use crate::violation::Signature;

/// A thread acquiring `inner` while holding `outer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nesting {
    pub thread: ThreadId,
    pub outer: RegionIdx,
    pub inner: RegionIdx,
    pub held: SyncObject,
    pub requested: SyncObject,
    /// Acquisition of the outer lock.
    pub hold: EventIdx,
    /// Acquisition of the inner lock.
    pub request: EventIdx,
}

/// Every acquisition of one lock made while another lock is held, with both
/// acquisitions inside the window.
pub fn nestings(trace: &Trace) -> Vec<Nesting> {
    let regions = trace.lock_regions();
    let mut found = Vec::new();
    for (o, outer) in regions.iter().enumerate() {
        let Some(hold) = outer.lock.filter(|&h| trace.event(h).is_lock()) else {
            continue;
        };
        for (i, inner) in regions.iter().enumerate() {
            if inner.thread != outer.thread || inner.object == outer.object {
                continue;
            }
            // A monitor resumed from a carried wait has no acquisition here.
            let Some(request) = inner.lock.filter(|&r| trace.event(r).is_lock()) else {
                continue;
            };
            if outer.contains(request) {
                found.push(Nesting {
                    thread: outer.thread,
                    outer: o,
                    inner: i,
                    held: outer.object,
                    requested: inner.object,
                    hold,
                    request,
                });
            }
        }
    }
    found
}

/// Pairs of nestings that acquire the same two locks in opposite orders.
pub fn deadlock_candidates(trace: &Trace) -> Vec<(Nesting, Nesting)> {
    let regions = trace.lock_regions();
    let excludes = |a: RegionIdx, b: RegionIdx| regions[a].is_exclusive() || regions[b].is_exclusive();
    let all = nestings(trace);
    let mut pairs = Vec::new();
    for n1 in &all {
        for n2 in &all {
            if n1.thread >= n2.thread || n1.held != n2.requested || n1.requested != n2.held {
                continue;
            }
            if excludes(n1.outer, n2.inner) && excludes(n1.inner, n2.outer) {
                pairs.push((*n1, *n2));
            }
        }
    }
    pairs
}

pub fn detect_deadlocks<S: SmtSolver>(
    model: &mut MaximalCausalModel<'_, S>,
    session: &mut AnalysisSession,
    schedules: bool,
) -> Result<(), ModelError> {
    let trace = model.trace();
    let window = trace.window();
    for (n1, n2) in deadlock_candidates(trace) {
        let site = |e: EventIdx| trace.event(e).location;
        let signature = Signature::deadlock(site(n1.hold), site(n1.request), site(n2.hold), site(n2.request));
        if session.is_confirmed(&signature) {
            continue;
        }
        let hb = model.happens_before();
        if hb.reaches(n1.request, n2.hold) || hb.reaches(n2.request, n1.hold) {
            debug!(t1 = %n1.thread, t2 = %n2.thread, "acquisitions ordered by happens-before");
            continue;
        }
        if model.lockset().has_common_lock(trace, n1.request, n2.request) {
            debug!(t1 = %n1.thread, t2 = %n2.thread, "guarded by a common lock");
            continue;
        }

        let wait = CircularWait {
            outer1: n1.outer,
            inner1: n1.inner,
            outer2: n2.outer,
            inner2: n2.inner,
        };
        let assertion = model.deadlock_assertion(&wait);
        let query = Query::new(assertion)
            .relaxing(wait.regions())
            .with_witness(schedules);
        let verdict = model.check(&query)?;
        let Some(witness) = settle(session, &signature, window, verdict) else {
            continue;
        };
        let schedules = witness
            .map(|w| deadlock_schedule(trace, &w, &n1, &n2, session))
            .into_iter()
            .flatten()
            .collect();
        session.confirm(signature, trace, &[n1.hold, n1.request, n2.hold, n2.request], schedules);
    }
    Ok(())
}

/// Both threads up to their blocked request; nothing after the later one.
fn deadlock_schedule(
    trace: &Trace,
    witness: &Witness,
    n1: &Nesting,
    n2: &Nesting,
    session: &AnalysisSession,
) -> Option<Schedule> {
    let last = witness.order_of(n1.request)?.max(witness.order_of(n2.request)?);
    let steps = witness_steps(trace, witness, session.metadata(), |idx, o| {
        let thread = trace.event(idx).thread;
        let blocked = (thread == n1.thread && idx > n1.request)
            || (thread == n2.thread && idx > n2.request);
        o <= last && !blocked
    });
    Some(session.prefix().compose(steps))
}
