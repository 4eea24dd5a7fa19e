//! Predictive data-race detection.

use tracing::debug;

use sleuth_smt::encoder::{MaximalCausalModel, ModelError, Query, Witness};
use sleuth_smt::solver::SmtSolver;
use sleuth_trace::event::DataAddress;
use sleuth_trace::window::{EventIdx, Trace};

use super::settle;
use crate::schedule::{steps_of, witness_steps, Schedule};
use crate::session::AnalysisSession;
use crate::violation::Signature;

/// Conflicting pairs on `address`: write/write and read/write from
/// different threads, each pair in recorded order.
pub fn race_candidates(trace: &Trace, address: DataAddress) -> Vec<(EventIdx, EventIdx)> {
    let writes = trace.writes(address);
    let reads = trace.reads(address);
    let mut pairs = Vec::new();
    for (i, &w) in writes.iter().enumerate() {
        let thread = trace.event(w).thread;
        for &other in writes[i + 1..].iter().chain(reads) {
            if trace.event(other).thread != thread {
                pairs.push((w.min(other), w.max(other)));
            }
        }
    }
    pairs
}

/// Check every race suspect of the window, at most one confirmation per signature.
pub fn detect_races<S: SmtSolver>(
    model: &mut MaximalCausalModel<'_, S>,
    session: &mut AnalysisSession,
    schedules: bool,
) -> Result<(), ModelError> {
    let trace = model.trace();
    let window = trace.window();
    for address in trace.written_addresses() {
        if session.metadata().is_volatile(address) {
            debug!(%address, "volatile address, races not reported");
            continue;
        }
        for (e1, e2) in race_candidates(trace, address) {
            let signature = Signature::race(trace.event(e1).location, trace.event(e2).location);
            if session.is_confirmed(&signature) {
                continue;
            }
            if model.lockset().has_common_lock(trace, e1, e2) {
                debug!(%address, e1, e2, "protected by a common lock");
                continue;
            }
            if model.happens_before().ordered(e1, e2) {
                debug!(%address, e1, e2, "ordered by happens-before");
                continue;
            }

            let assertion = model.race_assertion(e1, e2);
            let verdict = model.check(&Query::new(assertion).with_witness(schedules))?;
            let Some(witness) = settle(session, &signature, window, verdict) else {
                continue;
            };
            let schedules = witness
                .map(|w| race_schedules(trace, &w, e1, e2, session))
                .unwrap_or_default();
            session.confirm(signature, trace, &[e1, e2], schedules);
        }
    }
    Ok(())
}

/// The events ordered before the race, then both accesses in each order.
fn race_schedules(
    trace: &Trace,
    witness: &Witness,
    e1: EventIdx,
    e2: EventIdx,
    session: &AnalysisSession,
) -> Vec<Schedule> {
    let Some(at) = witness.order_of(e1) else {
        return Vec::new();
    };
    let metadata = session.metadata();
    let before = witness_steps(trace, witness, metadata, |_, o| o < at);
    [[e1, e2], [e2, e1]]
        .iter()
        .map(|pair| {
            let mut tail = before.clone();
            tail.extend(steps_of(trace, pair, metadata));
            session.prefix().compose(tail)
        })
        .collect()
}
