//! Predictive atomicity-violation detection.
//!
//! Two consecutive accesses of one thread to an address are assumed to be
//! meant atomic; a violation is a feasible schedule in which an access of
//! another thread to the same address runs between them.

use tracing::debug;

use sleuth_smt::encoder::{MaximalCausalModel, ModelError, Query, Witness};
use sleuth_smt::solver::SmtSolver;
use sleuth_trace::lockset::LockSetEngine;
use sleuth_trace::window::{EventIdx, Trace};

use super::settle;
use crate::schedule::{witness_steps, Schedule};
use crate::session::AnalysisSession;
use crate::violation::Signature;

/// `(n1, n2, n3)` triples: `n1`, `n2` consecutive in one thread, `n3` from
/// another thread, at least one of the three a write.
pub fn atomicity_candidates(trace: &Trace) -> Vec<(EventIdx, EventIdx, EventIdx)> {
    let mut triples = Vec::new();
    for &address in trace.shared_addresses() {
        let Some(by_thread) = trace.thread_accesses(address) else {
            continue;
        };
        for (thread, local) in by_thread {
            for pair in local.windows(2) {
                let (n1, n2) = (pair[0], pair[1]);
                for (other, remote) in by_thread {
                    if other == thread {
                        continue;
                    }
                    for &n3 in remote {
                        if [n1, n2, n3].iter().any(|e| trace.event(*e).is_write()) {
                            triples.push((n1, n2, n3));
                        }
                    }
                }
            }
        }
    }
    triples
}

/// Whether the recorded lock history already makes `n1 .. n2` atomic
/// with respect to `n3`: both accesses sit in one region of a lock that
/// also guards `n3`, one side exclusive.
fn guarded(trace: &Trace, lockset: &LockSetEngine, n1: EventIdx, n2: EventIdx, n3: EventIdx) -> bool {
    let regions = trace.lock_regions();
    let thread = trace.event(n1).thread;
    let remote = lockset.held_at(trace.event(n3).thread, n3);
    trace.thread_regions(thread).any(|r| {
        let region = &regions[r];
        region.contains(n1)
            && region.contains(n2)
            && remote
                .iter()
                .any(|(lock, exclusive)| *lock == region.object && (*exclusive || region.is_exclusive()))
    })
}

pub fn detect_atomicity_violations<S: SmtSolver>(
    model: &mut MaximalCausalModel<'_, S>,
    session: &mut AnalysisSession,
    schedules: bool,
) -> Result<(), ModelError> {
    let trace = model.trace();
    let window = trace.window();
    for (n1, n2, n3) in atomicity_candidates(trace) {
        let site = |e: EventIdx| trace.event(e).location;
        let signature = Signature::atomicity(site(n1), site(n2), site(n3));
        if session.is_confirmed(&signature) {
            continue;
        }
        if guarded(trace, model.lockset(), n1, n2, n3) {
            debug!(n1, n2, n3, "atomic by lock history");
            continue;
        }
        let hb = model.happens_before();
        if hb.reaches(n3, n1) || hb.reaches(n2, n3) {
            debug!(n1, n2, n3, "interleaving excluded by happens-before");
            continue;
        }

        let assertion = model.atomicity_assertion(n1, n2, n3);
        let verdict = model.check(&Query::new(assertion).with_witness(schedules))?;
        let Some(witness) = settle(session, &signature, window, verdict) else {
            continue;
        };
        let schedules = witness
            .map(|w| atomicity_schedule(trace, &w, n2, session))
            .into_iter()
            .flatten()
            .collect();
        session.confirm(signature, trace, &[n1, n3, n2], schedules);
    }
    Ok(())
}

fn atomicity_schedule(
    trace: &Trace,
    witness: &Witness,
    n2: EventIdx,
    session: &AnalysisSession,
) -> Option<Schedule> {
    let last = witness.order_of(n2)?;
    let steps = witness_steps(trace, witness, session.metadata(), |_, o| o <= last);
    Some(session.prefix().compose(steps))
}
