//! Maximal causal model of one trace window.
//!
//! Every critical event gets an integer order variable. The model is the
//! conjunction of
//! - `φ_MHB`: program order plus start/join edges,
//! - `φ_LOCK`: pairwise mutual exclusion of lock regions on the same lock,
//! - wait/notify ordering,
//! - `φ_conc`: one boolean per read-opened memory access block, defined as
//!   the feasibility of the previous block conjoined with the read-write
//!   consistency `φ_SC` of the block's read.
//!
//! A violation hypothesis is checked by asserting its ordering inside a
//! scope on top of the model. Definitions are always asserted at the base
//! level; lock constraints live in their own scope so that deadlock queries
//! can lift the mutual exclusion of the regions they reason about.

pub mod variables;

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, warn};

use sleuth_trace::closure::{HappensBefore, HbError};
use sleuth_trace::event::{DataAddress, EventKind};
use sleuth_trace::lockset::LockSetEngine;
use sleuth_trace::window::{BlockIdx, EventIdx, RegionIdx, Trace};

use crate::backends::smtlib_printer;
use crate::solver::{Model, SatResult, SmtSolver};
use crate::terms::{SmtSort, SmtTerm};

use self::variables::{conc_var, order_var};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Solver error: {0}")]
    Solver(String),
    #[error("Happens-before error: {0}")]
    HappensBefore(#[from] HbError),
    #[error("window {window} contradicts its own causal model")]
    InconsistentTrace { window: usize },
}

fn solver_error<E: std::fmt::Display>(e: E) -> ModelError {
    ModelError::Solver(e.to_string())
}

/// How read dependences are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Every event depends on all earlier reads of its thread, rather than
    /// only on the reads preceding its most recent branch.
    pub no_branch: bool,
}

/// Mutual exclusion of two lock regions.
#[derive(Debug, Clone)]
pub struct LockConstraint {
    pub first: RegionIdx,
    pub second: RegionIdx,
    pub term: SmtTerm,
}

/// Declarations and formulas of a causal model, in assertion order.
#[derive(Debug, Clone, Default)]
pub struct CausalEncoding {
    pub declarations: Vec<(String, SmtSort)>,
    pub base: Vec<SmtTerm>,
    pub lock_constraints: Vec<LockConstraint>,
    pub definitions: Vec<SmtTerm>,
    keys: HashSet<SmtTerm>,
}

impl CausalEncoding {
    fn declare(&mut self, name: String, sort: SmtSort) {
        self.declarations.push((name, sort));
    }

    fn assert_base(&mut self, term: SmtTerm) {
        if term.is_true() {
            return;
        }
        if self.keys.insert(term.clone()) {
            self.base.push(term);
        }
    }
}

/// A hypothesis to test against the model.
#[derive(Debug, Clone)]
pub struct Query {
    pub assertion: SmtTerm,
    /// Regions whose pairwise mutual exclusion is lifted for this query.
    pub relaxed: Vec<RegionIdx>,
    pub want_witness: bool,
}

impl Query {
    pub fn new(assertion: SmtTerm) -> Self {
        Self {
            assertion,
            relaxed: Vec::new(),
            want_witness: false,
        }
    }

    pub fn relaxing(mut self, regions: impl IntoIterator<Item = RegionIdx>) -> Self {
        self.relaxed = regions.into_iter().collect();
        self.relaxed.sort_unstable();
        self.relaxed.dedup();
        self
    }

    pub fn with_witness(mut self, want: bool) -> Self {
        self.want_witness = want;
        self
    }
}

/// Order values of a satisfying assignment, indexed by event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    order: Vec<Option<i64>>,
}

impl Witness {
    fn from_model(model: &Model, events: usize) -> Self {
        Self {
            order: (0..events)
                .map(|idx| model.get_int(&order_var(idx)))
                .collect(),
        }
    }

    pub fn order_of(&self, event: EventIdx) -> Option<i64> {
        self.order.get(event).copied().flatten()
    }

    /// Events accepted by `keep`, sorted by solved order (ties by index).
    pub fn ordered_events(&self, mut keep: impl FnMut(EventIdx, i64) -> bool) -> Vec<EventIdx> {
        let mut events: Vec<(i64, EventIdx)> = self
            .order
            .iter()
            .enumerate()
            .filter_map(|(idx, o)| o.map(|o| (o, idx)))
            .filter(|(o, idx)| keep(*idx, *o))
            .collect();
        events.sort_unstable();
        events.into_iter().map(|(_, idx)| idx).collect()
    }
}

/// Outcome of a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Feasible(Option<Witness>),
    Infeasible,
    Unknown(String),
}

impl Verdict {
    pub fn is_feasible(&self) -> bool {
        matches!(self, Verdict::Feasible(_))
    }
}

/// A potential circular wait between two threads and two locks.
///
/// Thread 1 holds `outer1` and requests the lock of `inner1`; thread 2
/// holds `outer2` (on that lock) and requests the lock of `inner2`
/// (the lock of `outer1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularWait {
    pub outer1: RegionIdx,
    pub inner1: RegionIdx,
    pub outer2: RegionIdx,
    pub inner2: RegionIdx,
}

impl CircularWait {
    pub fn regions(&self) -> [RegionIdx; 4] {
        [self.outer1, self.inner1, self.outer2, self.inner2]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelStats {
    pub queries: usize,
    pub feasible: usize,
    pub unknown: usize,
    pub definitions: usize,
    pub degraded_reads: usize,
}

pub struct MaximalCausalModel<'t, S: SmtSolver> {
    trace: &'t Trace,
    solver: S,
    options: EncoderOptions,
    hb: HappensBefore,
    lockset: LockSetEngine,
    encoding: CausalEncoding,
    ordered: Vec<bool>,
    conc_defined: HashSet<BlockIdx>,
    pending: Vec<BlockIdx>,
    degraded: HashSet<DataAddress>,
    declared_upto: usize,
    base_upto: usize,
    definitions_upto: usize,
    lock_scope: Option<Vec<RegionIdx>>,
    stats: ModelStats,
}

impl<'t, S: SmtSolver> MaximalCausalModel<'t, S> {
    /// Build `φ_MHB`, `φ_LOCK` and the wait constraints and load them into `solver`.
    pub fn create(trace: &'t Trace, solver: S, options: EncoderOptions) -> Result<Self, ModelError> {
        let hb = HappensBefore::build(trace)?;
        let lockset = LockSetEngine::from_trace(trace);
        let mut model = Self {
            trace,
            solver,
            options,
            hb,
            lockset,
            encoding: CausalEncoding::default(),
            ordered: vec![false; trace.len()],
            conc_defined: HashSet::new(),
            pending: Vec::new(),
            degraded: HashSet::new(),
            declared_upto: 0,
            base_upto: 0,
            definitions_upto: 0,
            lock_scope: None,
            stats: ModelStats::default(),
        };
        model.add_phi_mhb();
        model.add_phi_lock();
        model.add_phi_wait();
        model.flush()?;
        debug!(
            window = trace.window(),
            base = model.encoding.base.len(),
            lock_pairs = model.encoding.lock_constraints.len(),
            "causal model created"
        );
        Ok(model)
    }

    pub fn trace(&self) -> &'t Trace {
        self.trace
    }

    pub fn happens_before(&self) -> &HappensBefore {
        &self.hb
    }

    pub fn lockset(&self) -> &LockSetEngine {
        &self.lockset
    }

    pub fn encoding(&self) -> &CausalEncoding {
        &self.encoding
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            definitions: self.encoding.definitions.len(),
            ..self.stats
        }
    }

    /// Order variable of `event`, declared on first use.
    pub fn order(&mut self, event: EventIdx) -> SmtTerm {
        if !self.ordered[event] {
            self.ordered[event] = true;
            self.encoding.declare(order_var(event), SmtSort::Int);
        }
        SmtTerm::var(order_var(event))
    }

    /// `o(a) < o(b)`.
    pub fn before(&mut self, a: EventIdx, b: EventIdx) -> SmtTerm {
        let lhs = self.order(a);
        lhs.lt(self.order(b))
    }

    fn region_before(&mut self, first: RegionIdx, second: RegionIdx) -> SmtTerm {
        let regions = self.trace.lock_regions();
        let bounds = (regions[first].unlock, regions[second].lock);
        match bounds {
            (Some(unlock), Some(lock)) => self.before(unlock, lock),
            _ => SmtTerm::bool(false),
        }
    }

    fn add_phi_mhb(&mut self) {
        let trace = self.trace;
        for events in trace.threads().values() {
            if let Some(&first) = events.first() {
                self.order(first);
            }
            for pair in events.windows(2) {
                let t = self.before(pair[0], pair[1]);
                self.encoding.assert_base(t);
            }
        }
        for (idx, event) in trace.events().iter().enumerate() {
            let edge = match event.kind {
                EventKind::Start { child } => {
                    trace.first_event(child).map(|first| (idx, first))
                }
                EventKind::Join { child } => {
                    trace.last_event(child).map(|last| (last, idx))
                }
                _ => None,
            };
            if let Some((from, to)) = edge {
                let t = self.before(from, to);
                self.encoding.assert_base(t);
            }
        }
    }

    fn add_phi_lock(&mut self) {
        let trace = self.trace;
        let regions = trace.lock_regions();
        for members in trace.regions_by_lock().values() {
            for (i, &a) in members.iter().enumerate() {
                for &b in &members[i + 1..] {
                    let (ra, rb) = (&regions[a], &regions[b]);
                    if ra.thread == rb.thread || !(ra.is_exclusive() || rb.is_exclusive()) {
                        continue;
                    }
                    let ab = self.region_before(a, b);
                    let ba = self.region_before(b, a);
                    self.encoding.lock_constraints.push(LockConstraint {
                        first: a,
                        second: b,
                        term: SmtTerm::or(vec![ab, ba]),
                    });
                }
            }
        }
    }

    fn add_phi_wait(&mut self) {
        let trace = self.trace;
        for &(wait, reacquire) in trace.waits() {
            let event = trace.event(wait);
            let Some(lock) = event.lock_object() else {
                continue;
            };
            let notifiers: Vec<EventIdx> = trace
                .notifies(lock)
                .iter()
                .copied()
                .filter(|n| trace.event(*n).thread != event.thread)
                .collect();
            // Timed and spurious wakeups have no notify between the wait and
            // the thread's next event; such waits constrain nothing.
            let resumed = trace
                .thread_events(event.thread)
                .iter()
                .copied()
                .find(|&e| e > reacquire);
            let served = notifiers
                .iter()
                .any(|&n| n > wait && resumed.map_or(true, |k| n < k));
            if !served {
                debug!(wait, "wait not served by a recorded notify");
                continue;
            }
            let mut options = Vec::with_capacity(notifiers.len());
            for n in notifiers {
                let after_wait = self.before(wait, n);
                let before_wakeup = self.before(n, reacquire);
                options.push(SmtTerm::and(vec![after_wait, before_wakeup]));
            }
            self.encoding.assert_base(SmtTerm::or(options));
        }
        // Waits begun in an earlier window: only the return is left to order.
        for resumption in trace.resumptions() {
            let notifiers: Vec<EventIdx> = trace
                .notifies(resumption.lock)
                .iter()
                .copied()
                .filter(|n| trace.event(*n).thread != resumption.thread)
                .collect();
            if !notifiers.iter().any(|&n| n < resumption.at) {
                continue;
            }
            let options = notifiers
                .into_iter()
                .map(|n| self.before(n, resumption.at))
                .collect();
            self.encoding.assert_base(SmtTerm::or(options));
        }
    }

    /// `φ_abs` of an event: feasibility of the reads it depends on.
    pub fn phi_abs(&mut self, event: EventIdx) -> SmtTerm {
        match self.trace.dependence_block(event, self.options.no_branch) {
            Some(block) => self.phi_conc(block),
            None => SmtTerm::bool(true),
        }
    }

    /// Concrete feasibility of a read: its own consistency plus its dependences.
    pub fn read_feasibility(&mut self, read: EventIdx) -> SmtTerm {
        match self.trace.block_of(read) {
            Some(block) => self.phi_conc(block),
            None => SmtTerm::bool(true),
        }
    }

    fn phi_conc(&mut self, block: BlockIdx) -> SmtTerm {
        let trace = self.trace;
        let b = &trace.blocks()[block];
        match b.read {
            None => match b.prev {
                Some(prev) => self.phi_conc(prev),
                None => SmtTerm::bool(true),
            },
            Some(read) => {
                if self.conc_defined.insert(block) {
                    self.encoding.declare(conc_var(read), SmtSort::Bool);
                    self.pending.push(block);
                }
                SmtTerm::var(conc_var(read))
            }
        }
    }

    /// Define every `φ_conc` variable referenced so far. Definitions may
    /// reference further blocks, so this runs to a fixpoint.
    fn drain_definitions(&mut self) {
        let trace = self.trace;
        while let Some(block) = self.pending.pop() {
            let b = &trace.blocks()[block];
            let (Some(read), prev) = (b.read, b.prev) else {
                continue;
            };
            let abs = match prev {
                Some(p) => self.phi_conc(p),
                None => SmtTerm::bool(true),
            };
            let sc = self.phi_sc(read);
            let def = SmtTerm::var(conc_var(read)).eq(SmtTerm::and(vec![abs, sc]));
            self.encoding.definitions.push(def);
        }
    }

    /// Read-write consistency of `read`.
    fn phi_sc(&mut self, read: EventIdx) -> SmtTerm {
        let trace = self.trace;
        let r = trace.event(read);
        let (Some(address), Some(value)) = (r.address(), r.value()) else {
            return SmtTerm::bool(true);
        };

        // Writes of other threads that may still precede the read.
        let mut same = Vec::new();
        let mut diff = Vec::new();
        for &w in trace.writes(address) {
            let write = trace.event(w);
            if write.thread == r.thread || self.hb.reaches(read, w) {
                continue;
            }
            if write.value() == Some(value) {
                same.push(w);
            } else {
                diff.push(w);
            }
        }

        match trace.same_thread_prev_write(read) {
            Some(own) if trace.event(own).value() == Some(value) => {
                let mut options = Vec::with_capacity(same.len() + 1);
                let mut shielded = Vec::with_capacity(diff.len());
                for &w in &diff {
                    let before_own = self.before(w, own);
                    let after_read = self.before(read, w);
                    shielded.push(SmtTerm::or(vec![before_own, after_read]));
                }
                options.push(SmtTerm::and(shielded));
                for &w1 in &same {
                    if self.hb.reaches(w1, own) {
                        continue;
                    }
                    let mut conj = vec![self.phi_abs(w1), self.before(w1, read)];
                    for &w2 in &diff {
                        if !self.hb.reaches(w2, w1) && !self.hb.reaches(w2, own) {
                            conj.push(self.not_between(w2, w1, read));
                        }
                    }
                    options.push(SmtTerm::and(conj));
                }
                SmtTerm::or(options)
            }
            Some(own) => {
                if same.is_empty() {
                    return self.degrade(address);
                }
                let mut options = Vec::with_capacity(same.len());
                for &w1 in &same {
                    let mut conj = vec![
                        self.phi_abs(w1),
                        self.before(own, w1),
                        self.before(w1, read),
                    ];
                    for &w2 in &diff {
                        if !self.hb.reaches(w2, w1) {
                            conj.push(self.not_between(w2, w1, read));
                        }
                    }
                    options.push(SmtTerm::and(conj));
                }
                SmtTerm::or(options)
            }
            None => {
                let mut initial = Vec::with_capacity(diff.len());
                for &w in &diff {
                    initial.push(self.before(read, w));
                }
                let from_initial = SmtTerm::and(initial);
                let seen_initial = trace.initial_value(address);
                match (trace.any_thread_prev_write(read), seen_initial) {
                    (None, None) => from_initial,
                    (None, Some(v0)) if v0 == value => from_initial,
                    (_, Some(v0)) if v0 == value => {
                        let justified = self.justify_by_other_threads(read, &same, &diff);
                        SmtTerm::or(vec![from_initial, justified.unwrap_or(SmtTerm::bool(false))])
                    }
                    _ => match self.justify_by_other_threads(read, &same, &diff) {
                        Some(term) => term,
                        None => self.degrade(address),
                    },
                }
            }
        }
    }

    fn justify_by_other_threads(
        &mut self,
        read: EventIdx,
        same: &[EventIdx],
        diff: &[EventIdx],
    ) -> Option<SmtTerm> {
        if same.is_empty() {
            return None;
        }
        let mut options = Vec::with_capacity(same.len());
        for &w1 in same {
            let mut conj = vec![self.phi_abs(w1), self.before(w1, read)];
            for &w2 in diff {
                if !self.hb.reaches(w2, w1) {
                    conj.push(self.not_between(w2, w1, read));
                }
            }
            options.push(SmtTerm::and(conj));
        }
        Some(SmtTerm::or(options))
    }

    /// `w` is not ordered between `source` and `read`.
    fn not_between(&mut self, w: EventIdx, source: EventIdx, read: EventIdx) -> SmtTerm {
        let earlier = self.before(w, source);
        let later = self.before(read, w);
        SmtTerm::or(vec![earlier, later])
    }

    fn degrade(&mut self, address: DataAddress) -> SmtTerm {
        self.stats.degraded_reads += 1;
        if self.degraded.insert(address) {
            warn!(
                window = self.trace.window(),
                %address,
                "no write in the window can justify a read; dropping its consistency constraint"
            );
        }
        SmtTerm::bool(true)
    }

    /// Two conflicting accesses may execute back to back.
    pub fn race_assertion(&mut self, e1: EventIdx, e2: EventIdx) -> SmtTerm {
        let o1 = self.order(e1);
        let same_point = o1.eq(self.order(e2));
        SmtTerm::and(vec![same_point, self.phi_abs(e1), self.phi_abs(e2)])
    }

    /// Both threads hold their outer lock and block on their inner request.
    pub fn deadlock_assertion(&mut self, wait: &CircularWait) -> SmtTerm {
        let trace = self.trace;
        let regions = trace.lock_regions();
        let (o1, i1, o2, i2) = (
            &regions[wait.outer1],
            &regions[wait.inner1],
            &regions[wait.outer2],
            &regions[wait.inner2],
        );
        let (Some(hold1), Some(req1), Some(hold2), Some(req2)) = (o1.lock, i1.lock, o2.lock, i2.lock)
        else {
            return SmtTerm::bool(false);
        };
        let (release1, release2) = (o1.unlock, o2.unlock);
        let mut conj = vec![self.before(hold1, req2), self.before(hold2, req1)];
        if let Some(u) = release1 {
            conj.push(self.before(req2, u));
        }
        if let Some(u) = release2 {
            conj.push(self.before(req1, u));
        }
        conj.push(self.phi_abs(req1));
        conj.push(self.phi_abs(req2));
        SmtTerm::and(conj)
    }

    /// `n3` of another thread runs between the consecutive accesses `n1`, `n2`.
    pub fn atomicity_assertion(&mut self, n1: EventIdx, n2: EventIdx, n3: EventIdx) -> SmtTerm {
        let first = self.before(n1, n3);
        let second = self.before(n3, n2);
        SmtTerm::and(vec![
            first,
            second,
            self.phi_abs(n1),
            self.phi_abs(n2),
            self.phi_abs(n3),
        ])
    }

    /// Pass outstanding declarations, base formulas and definitions to the solver.
    fn flush(&mut self) -> Result<(), ModelError> {
        self.drain_definitions();
        for (name, sort) in &self.encoding.declarations[self.declared_upto..] {
            self.solver.declare_var(name, sort).map_err(solver_error)?;
        }
        self.declared_upto = self.encoding.declarations.len();

        let stale = self.base_upto < self.encoding.base.len()
            || self.definitions_upto < self.encoding.definitions.len();
        if !stale {
            return Ok(());
        }
        self.leave_lock_scope()?;
        for term in &self.encoding.base[self.base_upto..] {
            self.solver.assert(term).map_err(solver_error)?;
        }
        for term in &self.encoding.definitions[self.definitions_upto..] {
            self.solver.assert(term).map_err(solver_error)?;
        }
        self.base_upto = self.encoding.base.len();
        self.definitions_upto = self.encoding.definitions.len();
        Ok(())
    }

    fn leave_lock_scope(&mut self) -> Result<(), ModelError> {
        if self.lock_scope.take().is_some() {
            self.solver.pop().map_err(solver_error)?;
        }
        Ok(())
    }

    fn enter_lock_scope(&mut self, relaxed: &[RegionIdx]) -> Result<(), ModelError> {
        if self.lock_scope.as_deref() == Some(relaxed) {
            return Ok(());
        }
        self.leave_lock_scope()?;
        self.solver.push().map_err(solver_error)?;
        for c in &self.encoding.lock_constraints {
            let lifted = relaxed.binary_search(&c.first).is_ok()
                && relaxed.binary_search(&c.second).is_ok();
            if !lifted {
                self.solver.assert(&c.term).map_err(solver_error)?;
            }
        }
        self.lock_scope = Some(relaxed.to_vec());
        Ok(())
    }

    /// Decide `query` in its own scope.
    ///
    /// On error the solver may be left inside an open scope; the model must
    /// then be discarded.
    pub fn check(&mut self, query: &Query) -> Result<Verdict, ModelError> {
        self.stats.queries += 1;
        self.flush()?;
        self.enter_lock_scope(&query.relaxed)?;
        self.solver.push().map_err(solver_error)?;
        self.solver.assert(&query.assertion).map_err(solver_error)?;

        let verdict = if query.want_witness {
            let names: Vec<String> = (0..self.trace.len())
                .filter(|idx| self.ordered[*idx])
                .map(order_var)
                .collect();
            let vars: Vec<(&str, &SmtSort)> =
                names.iter().map(|n| (n.as_str(), &SmtSort::Int)).collect();
            let (result, model) = self
                .solver
                .check_sat_with_model(&vars)
                .map_err(solver_error)?;
            match result {
                SatResult::Sat => Verdict::Feasible(
                    model.map(|m| Witness::from_model(&m, self.trace.len())),
                ),
                SatResult::Unsat => Verdict::Infeasible,
                SatResult::Unknown(reason) => Verdict::Unknown(reason),
            }
        } else {
            match self.solver.check_sat().map_err(solver_error)? {
                SatResult::Sat => Verdict::Feasible(None),
                SatResult::Unsat => Verdict::Infeasible,
                SatResult::Unknown(reason) => Verdict::Unknown(reason),
            }
        };
        self.solver.pop().map_err(solver_error)?;

        match verdict {
            Verdict::Feasible(_) => self.stats.feasible += 1,
            Verdict::Unknown(_) => self.stats.unknown += 1,
            Verdict::Infeasible => {}
        }
        Ok(verdict)
    }

    /// Check that the recorded order itself satisfies the model.
    ///
    /// Every order variable is pinned to twice the event's position, so the
    /// synthetic reacquisition after a wait can float between its
    /// neighbours, and every read is required to be concretely feasible.
    pub fn check_consistency(&mut self) -> Result<(), ModelError> {
        let trace = self.trace;
        let floating: HashSet<EventIdx> = trace.waits().iter().map(|(_, q)| *q).collect();
        let mut conj = Vec::new();
        for block in 0..trace.blocks().len() {
            if trace.blocks()[block].read.is_some() {
                conj.push(self.phi_conc(block));
            }
        }
        for idx in 0..trace.len() {
            if !floating.contains(&idx) {
                let pin = self.order(idx).eq(SmtTerm::int(2 * idx as i64));
                conj.push(pin);
            }
        }
        match self.check(&Query::new(SmtTerm::and(conj)))? {
            Verdict::Infeasible => Err(ModelError::InconsistentTrace {
                window: trace.window(),
            }),
            Verdict::Unknown(reason) => {
                warn!(window = trace.window(), %reason, "consistency check inconclusive");
                Ok(())
            }
            Verdict::Feasible(_) => Ok(()),
        }
    }

    /// The model as a standalone SMT-LIB2 script (all lock constraints enforced).
    pub fn to_smtlib(&mut self) -> String {
        self.drain_definitions();
        let enc = &self.encoding;
        smtlib_printer::script(
            enc.declarations.iter().map(|(n, s)| (n.as_str(), *s)),
            enc.base
                .iter()
                .chain(enc.lock_constraints.iter().map(|c| &c.term))
                .chain(enc.definitions.iter()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::z3_backend::Z3Solver;
    use sleuth_trace::builder::EventLogBuilder;
    use sleuth_trace::window::CarryState;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn load(log: EventLogBuilder) -> Trace {
        Trace::load(log.into_events(), &mut CarryState::new()).expect("loads")
    }

    fn no_branch() -> EncoderOptions {
        EncoderOptions { no_branch: true }
    }

    #[test]
    fn unsynchronized_writes_can_be_adjacent() -> TestResult {
        let mut log = EventLogBuilder::new();
        log.write(1, "a", 1, 1).write(2, "b", 1, 2);
        let trace = load(log);
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        let race = model.race_assertion(0, 1);
        let verdict = model.check(&Query::new(race).with_witness(true))?;
        let Verdict::Feasible(Some(witness)) = verdict else {
            panic!("expected a witness, got {verdict:?}");
        };
        assert_eq!(witness.order_of(0), witness.order_of(1));
        Ok(())
    }

    #[test]
    fn writes_under_common_lock_cannot_be_adjacent() -> TestResult {
        let mut log = EventLogBuilder::new();
        log.lock(1, "l1", 9)
            .write(1, "a", 1, 1)
            .unlock(1, "u1", 9)
            .lock(2, "l2", 9)
            .write(2, "b", 1, 2)
            .unlock(2, "u2", 9);
        let trace = load(log);
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        assert_eq!(model.encoding().lock_constraints.len(), 1);
        let race = model.race_assertion(1, 4);
        assert_eq!(model.check(&Query::new(race))?, Verdict::Infeasible);
        Ok(())
    }

    #[test]
    fn read_of_an_overwritten_value_is_feasible() -> TestResult {
        // T1 writes 5 then 7; T2 reads 5.
        let mut log = EventLogBuilder::new();
        log.write(1, "w5", 1, 5).write(1, "w7", 1, 7).read(2, "r", 1, 5);
        let trace = load(log);
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        let feasible = model.read_feasibility(2);
        assert!(model.check(&Query::new(feasible))?.is_feasible());
        Ok(())
    }

    #[test]
    fn read_forced_after_the_overwrite_is_infeasible() -> TestResult {
        // T1 writes 5, then 7, then starts T2, which claims to read 5.
        let mut log = EventLogBuilder::new();
        log.write(1, "w5", 1, 5)
            .write(1, "w7", 1, 7)
            .start(1, "spawn", 2)
            .read(2, "r", 1, 5);
        let trace = load(log);
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        let feasible = model.read_feasibility(3);
        assert_eq!(model.check(&Query::new(feasible))?, Verdict::Infeasible);
        assert!(matches!(
            model.check_consistency(),
            Err(ModelError::InconsistentTrace { window: 0 })
        ));
        Ok(())
    }

    #[test]
    fn unjustifiable_read_degrades_to_true() -> TestResult {
        // T2 reads 3 after its own write of 1; nobody else ever writes 3.
        let mut log = EventLogBuilder::new();
        log.write(2, "own", 1, 1).read(2, "r", 1, 3).write(1, "w", 1, 9);
        let trace = load(log);
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        let feasible = model.read_feasibility(1);
        assert!(model.check(&Query::new(feasible))?.is_feasible());
        assert_eq!(model.stats().degraded_reads, 1);
        Ok(())
    }

    #[test]
    fn read_dependence_restricts_races() -> TestResult {
        // T2 writes only after reading 1, which T1 writes after its own access.
        let mut log = EventLogBuilder::new();
        log.write(1, "x", 2, 0)
            .write(1, "flag", 1, 1)
            .read(2, "poll", 1, 1)
            .write(2, "y", 2, 5);
        let trace = load(log);
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        let race = model.race_assertion(0, 3);
        assert_eq!(model.check(&Query::new(race))?, Verdict::Infeasible);
        // Racing on the flag itself remains possible.
        let flag_race = model.race_assertion(1, 2);
        assert!(model.check(&Query::new(flag_race))?.is_feasible());
        Ok(())
    }

    #[test]
    fn deadlock_query_lifts_exclusion_of_its_regions() -> TestResult {
        let mut log = EventLogBuilder::new();
        log.lock(1, "t1.a", 10)
            .lock(1, "t1.b", 20)
            .unlock(1, "t1.ub", 20)
            .unlock(1, "t1.ua", 10)
            .lock(2, "t2.b", 20)
            .lock(2, "t2.a", 10)
            .unlock(2, "t2.ua", 10)
            .unlock(2, "t2.ub", 20);
        let trace = load(log);
        // Regions close inner-first: 0 = T1/B, 1 = T1/A, 2 = T2/A, 3 = T2/B.
        let wait = CircularWait {
            outer1: 1,
            inner1: 0,
            outer2: 3,
            inner2: 2,
        };
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        let assertion = model.deadlock_assertion(&wait);
        let strict = model.check(&Query::new(assertion.clone()))?;
        assert_eq!(strict, Verdict::Infeasible);
        let relaxed = model.check(&Query::new(assertion).relaxing(wait.regions()))?;
        assert!(relaxed.is_feasible());
        Ok(())
    }

    #[test]
    fn notify_must_fall_between_wait_and_wakeup() -> TestResult {
        let mut log = EventLogBuilder::new();
        log.lock(1, "l", 3)
            .wait(1, "w", 3)
            .lock(2, "l2", 3)
            .notify(2, "n", 3)
            .unlock(2, "u2", 3)
            .unlock(1, "u", 3);
        let trace = load(log);
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        // wait=1, reacquire=2, notify=4
        let early = model.before(4, 1);
        assert_eq!(model.check(&Query::new(early))?, Verdict::Infeasible);
        model.check_consistency()?;
        Ok(())
    }

    #[test]
    fn timed_wait_keeps_the_recorded_order() -> TestResult {
        // Thread 1 wakes without a notify; thread 2 notified before it waited.
        let mut log = EventLogBuilder::new();
        log.lock(2, "l2", 7)
            .notify(2, "n", 7)
            .unlock(2, "u2", 7)
            .lock(1, "l", 7)
            .wait(1, "w", 7)
            .unlock(1, "u", 7);
        let trace = load(log);
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        model.check_consistency()?;
        // notify=1, wait=4: thread 1 may run first, nothing pins the notify.
        let late = model.before(4, 1);
        assert!(model.check(&Query::new(late))?.is_feasible());
        Ok(())
    }

    #[test]
    fn wait_from_an_earlier_window_returns_after_a_notify() -> TestResult {
        let mut log = EventLogBuilder::new();
        log.lock(1, "l", 3).wait(1, "w", 3);
        let first = log.take_events();
        log.lock(2, "l2", 3)
            .notify(2, "n", 3)
            .unlock(2, "u2", 3)
            .unlock(1, "u", 3);
        let mut carry = CarryState::new();
        Trace::load(first, &mut carry)?;
        let trace = Trace::load(log.into_events(), &mut carry)?;
        assert_eq!(trace.resumptions().len(), 1);

        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        model.check_consistency()?;
        // notify=1, thread 1 returns at its unlock=3
        let early = model.before(3, 1);
        assert_eq!(model.check(&Query::new(early))?, Verdict::Infeasible);
        Ok(())
    }

    #[test]
    fn smtlib_dump_contains_every_layer() -> TestResult {
        let mut log = EventLogBuilder::new();
        log.lock(1, "l1", 9)
            .write(1, "a", 1, 1)
            .unlock(1, "u1", 9)
            .read(2, "r", 1, 1)
            .lock(2, "l2", 9)
            .unlock(2, "u2", 9);
        let trace = load(log);
        let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), no_branch())?;
        model.read_feasibility(3);
        let text = model.to_smtlib();
        assert!(text.contains("(declare-const o0 Int)"));
        assert!(text.contains("(declare-const phi3 Bool)"));
        assert!(text.contains("(assert (< o0 o1))"));
        assert!(text.contains("(or (< o2 o4) (< o5 o0))"));
        assert!(text.ends_with("(check-sat)\n"));
        Ok(())
    }
}
