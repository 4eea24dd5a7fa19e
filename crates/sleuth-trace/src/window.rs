//! Window indexing: turns a bounded slice of raw events into a [`Trace`].
//!
//! Loading is two-pass. The first pass classifies addresses as shared or
//! thread-local; the second pass keeps only the critical events (shared
//! accesses and synchronization) and builds every index the detectors and
//! the causal model consume. State that must survive the window boundary
//! (last written values, locks still held) lives in [`CarryState`].

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tracing::debug;

use crate::event::{DataAddress, Event, EventKind, LockMode, SyncObject, ThreadId};

/// Position of an event in [`Trace::events`].
pub type EventIdx = usize;
/// Position of a block in [`Trace::blocks`].
pub type BlockIdx = usize;
/// Position of a region in [`Trace::lock_regions`].
pub type RegionIdx = usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("event {gid} follows event {previous}: global ids must strictly increase")]
    NonMonotonic { previous: u64, gid: u64 },
    #[error("{thread} releases {lock} in {found:?} mode while holding it in {held:?} mode")]
    LockModeMismatch {
        thread: ThreadId,
        lock: SyncObject,
        held: LockMode,
        found: LockMode,
    },
}

/// One thread's critical section on one lock.
///
/// A missing bound means the acquisition or release lies outside the
/// window; a region with neither bound is a lock held for the whole window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRegion {
    pub thread: ThreadId,
    pub object: SyncObject,
    pub mode: LockMode,
    pub lock: Option<EventIdx>,
    pub unlock: Option<EventIdx>,
}

impl LockRegion {
    /// Whether `idx` (an event of the same thread) executes inside the region.
    pub fn contains(&self, idx: EventIdx) -> bool {
        self.lock.map_or(true, |l| l < idx) && self.unlock.map_or(true, |u| idx < u)
    }

    pub fn is_exclusive(&self) -> bool {
        self.mode.is_exclusive()
    }
}

/// A run of one thread's accesses sharing the same preceding reads.
///
/// Every read opens a new block; the accesses a thread performs before its
/// first read form a leading block with no read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAccessBlock {
    pub thread: ThreadId,
    pub read: Option<EventIdx>,
    pub prev: Option<BlockIdx>,
    pub accesses: Vec<EventIdx>,
}

/// Running counters for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceStats {
    pub raw_events: usize,
    pub critical_events: usize,
    pub threads: usize,
    pub shared_addresses: usize,
    pub read_writes: usize,
    pub local_accesses: usize,
    pub synchronizations: usize,
    pub branches: usize,
}

/// Whether a held monitor was given up by a wait still in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum WaitState {
    #[default]
    Holding,
    /// Released by a wait no notify has served yet.
    Waiting,
    /// Released by a wait that a notify has already served.
    Notified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeldLock {
    depth: usize,
    mode: LockMode,
    wait: WaitState,
}

/// State handed from one window to the next.
#[derive(Debug, Clone, Default)]
pub struct CarryState {
    last_values: HashMap<DataAddress, i64>,
    held: IndexMap<(ThreadId, SyncObject), HeldLock>,
    last_gid: Option<u64>,
    windows: usize,
}

impl CarryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value written to `address` by any earlier event.
    pub fn last_value(&self, address: DataAddress) -> Option<i64> {
        self.last_values.get(&address).copied()
    }

    /// Reentrancy depth of `lock` held by `thread` at the end of the last window.
    pub fn held_depth(&self, thread: ThreadId, lock: SyncObject) -> usize {
        self.held.get(&(thread, lock)).map_or(0, |h| h.depth)
    }

    /// Whether `thread` was still inside a wait on `lock` when the last
    /// window ended.
    pub fn is_waiting(&self, thread: ThreadId, lock: SyncObject) -> bool {
        self.held
            .get(&(thread, lock))
            .is_some_and(|h| h.wait != WaitState::Holding)
    }
}

/// Per-(thread, lock) stack entry while the window is walked.
#[derive(Debug, Clone, Copy)]
struct OpenRegion {
    lock: Option<EventIdx>,
    mode: LockMode,
    depth: usize,
    /// Anything but `Holding` means the monitor is reacquired at the
    /// thread's next critical event.
    wait: WaitState,
}

/// A thread returning in this window from a wait it began in an earlier one,
/// with no notify seen since.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resumption {
    pub thread: ThreadId,
    pub lock: SyncObject,
    /// First critical event of the thread after the wait.
    pub at: EventIdx,
}

/// The indexed critical events of one window.
#[derive(Debug, Clone)]
pub struct Trace {
    window: usize,
    events: Vec<Event>,
    threads: IndexMap<ThreadId, Vec<EventIdx>>,
    reads: IndexMap<DataAddress, Vec<EventIdx>>,
    writes: IndexMap<DataAddress, Vec<EventIdx>>,
    thread_accesses: IndexMap<DataAddress, IndexMap<ThreadId, Vec<EventIdx>>>,
    lock_regions: Vec<LockRegion>,
    regions_by_lock: IndexMap<SyncObject, Vec<RegionIdx>>,
    blocks: Vec<MemoryAccessBlock>,
    block_of: HashMap<EventIdx, BlockIdx>,
    read_chain: HashMap<ThreadId, Vec<(EventIdx, BlockIdx)>>,
    branches: HashMap<ThreadId, Vec<u64>>,
    waits: Vec<(EventIdx, EventIdx)>,
    resumptions: Vec<Resumption>,
    notifies: IndexMap<SyncObject, Vec<EventIdx>>,
    initial_values: HashMap<DataAddress, i64>,
    shared: IndexSet<DataAddress>,
    stats: TraceStats,
}

impl Trace {
    /// Index `raw` as the next window after the one `carry` was left by.
    pub fn load(raw: Vec<Event>, carry: &mut CarryState) -> Result<Trace, TraceError> {
        let shared = shared_addresses(&raw, carry.last_gid)?;
        let window = carry.windows;
        carry.windows += 1;

        let mut trace = Trace {
            window,
            events: Vec::with_capacity(raw.len()),
            threads: IndexMap::new(),
            reads: IndexMap::new(),
            writes: IndexMap::new(),
            thread_accesses: IndexMap::new(),
            lock_regions: Vec::new(),
            regions_by_lock: IndexMap::new(),
            blocks: Vec::new(),
            block_of: HashMap::new(),
            read_chain: HashMap::new(),
            branches: HashMap::new(),
            waits: Vec::new(),
            resumptions: Vec::new(),
            notifies: IndexMap::new(),
            initial_values: shared
                .iter()
                .filter_map(|a| carry.last_values.get(a).map(|v| (*a, *v)))
                .collect(),
            stats: TraceStats {
                raw_events: raw.len(),
                shared_addresses: shared.len(),
                ..TraceStats::default()
            },
            shared,
        };

        let mut open: IndexMap<(ThreadId, SyncObject), OpenRegion> = carry
            .held
            .iter()
            .map(|(key, held)| {
                (
                    *key,
                    OpenRegion {
                        lock: None,
                        mode: held.mode,
                        depth: held.depth,
                        wait: held.wait,
                    },
                )
            })
            .collect();
        let mut current_block: HashMap<ThreadId, BlockIdx> = HashMap::new();

        if let Some(last) = raw.last() {
            carry.last_gid = Some(last.gid);
        }

        for event in raw {
            let thread = event.thread;
            if trace.is_critical(&event) {
                let at = trace.events.len();
                for ((t, lock), region) in open.iter_mut() {
                    if *t != thread || region.wait == WaitState::Holding {
                        continue;
                    }
                    if region.wait == WaitState::Waiting {
                        trace.resumptions.push(Resumption {
                            thread,
                            lock: *lock,
                            at,
                        });
                    }
                    region.wait = WaitState::Holding;
                    region.lock = Some(at);
                }
            }
            match event.kind.clone() {
                EventKind::Init { address, value } => {
                    if !trace.writes.contains_key(&address) {
                        trace.initial_values.insert(address, value);
                    }
                    carry.last_values.entry(address).or_insert(value);
                }
                EventKind::Branch => {
                    trace.stats.branches += 1;
                    trace.branches.entry(thread).or_default().push(event.gid);
                }
                EventKind::Read { address, .. } | EventKind::Write { address, .. } => {
                    let is_write = event.is_write();
                    if is_write {
                        if let Some(v) = event.value() {
                            carry.last_values.insert(address, v);
                        }
                    }
                    if !trace.shared.contains(&address) {
                        trace.stats.local_accesses += 1;
                        continue;
                    }
                    trace.stats.read_writes += 1;
                    let idx = trace.push(event);
                    if is_write {
                        trace.writes.entry(address).or_default().push(idx);
                    } else {
                        trace.reads.entry(address).or_default().push(idx);
                    }
                    trace
                        .thread_accesses
                        .entry(address)
                        .or_default()
                        .entry(thread)
                        .or_default()
                        .push(idx);
                    trace.attach_to_block(idx, thread, !is_write, &mut current_block);
                }
                EventKind::Lock { lock, mode } => {
                    trace.stats.synchronizations += 1;
                    let idx = trace.push(event);
                    match open.get_mut(&(thread, lock)) {
                        Some(region) => region.depth += 1,
                        None => {
                            open.insert(
                                (thread, lock),
                                OpenRegion {
                                    lock: Some(idx),
                                    mode,
                                    depth: 1,
                                    wait: WaitState::Holding,
                                },
                            );
                        }
                    }
                }
                EventKind::Unlock { lock, mode } => {
                    trace.stats.synchronizations += 1;
                    let idx = trace.push(event);
                    let key = (thread, lock);
                    match open.get_mut(&key) {
                        Some(region) if region.depth > 1 => region.depth -= 1,
                        Some(region) => {
                            if region.mode != mode {
                                return Err(TraceError::LockModeMismatch {
                                    thread,
                                    lock,
                                    held: region.mode,
                                    found: mode,
                                });
                            }
                            let region = *region;
                            open.shift_remove(&key);
                            trace.add_region(thread, lock, region.mode, region.lock, Some(idx));
                        }
                        None => {
                            debug!(%thread, %lock, gid = trace.events[idx].gid, "unlock without matching lock");
                            trace.add_region(thread, lock, mode, None, Some(idx));
                        }
                    }
                }
                EventKind::Wait { lock } => {
                    trace.stats.synchronizations += 1;
                    let reacquire = Event::new(
                        event.gid,
                        thread,
                        event.location,
                        EventKind::Lock {
                            lock,
                            mode: LockMode::Exclusive,
                        },
                    );
                    let idx = trace.push(event);
                    match open.get_mut(&(thread, lock)) {
                        Some(region) => {
                            let held_from = region.lock;
                            let q = trace.push(reacquire);
                            region.lock = Some(q);
                            trace.add_region(thread, lock, region.mode, held_from, Some(idx));
                            trace.waits.push((idx, q));
                        }
                        None => {
                            debug!(%thread, %lock, "wait outside of a critical section");
                        }
                    }
                }
                EventKind::Notify { lock } => {
                    trace.stats.synchronizations += 1;
                    let idx = trace.push(event);
                    trace.notifies.entry(lock).or_default().push(idx);
                }
                EventKind::Start { .. } | EventKind::Join { .. } => {
                    trace.stats.synchronizations += 1;
                    trace.push(event);
                }
            }
        }

        carry.held.clear();
        for ((thread, lock), region) in open {
            // A thread whose last event here is a reacquisition has not
            // returned from the wait yet; the monitor is free until it does.
            let wait = match (region.wait, region.lock) {
                (WaitState::Holding, Some(q))
                    if trace.last_event(thread) == Some(q) && trace.waits.iter().any(|(_, r)| *r == q) =>
                {
                    trace.wait_state_after(thread, lock, Some(q))
                }
                (WaitState::Waiting, _) => trace.wait_state_after(thread, lock, None),
                (state, _) => state,
            };
            if wait == WaitState::Holding {
                // A lock held across the whole window still guards this window's accesses.
                trace.add_region(thread, lock, region.mode, region.lock, None);
            }
            carry.held.insert(
                (thread, lock),
                HeldLock {
                    depth: region.depth,
                    mode: region.mode,
                    wait,
                },
            );
        }

        trace.stats.critical_events = trace.events.len();
        trace.stats.threads = trace.threads.len();
        debug!(
            window = trace.window,
            critical = trace.stats.critical_events,
            shared = trace.stats.shared_addresses,
            local = trace.stats.local_accesses,
            "window indexed"
        );
        Ok(trace)
    }

    /// Whether `event` is kept in the window's critical events.
    fn is_critical(&self, event: &Event) -> bool {
        match &event.kind {
            EventKind::Init { .. } | EventKind::Branch => false,
            EventKind::Read { address, .. } | EventKind::Write { address, .. } => {
                self.shared.contains(address)
            }
            _ => true,
        }
    }

    /// `Notified` if another thread notified `lock` after `since` (or
    /// anywhere in the window), else `Waiting`.
    fn wait_state_after(&self, thread: ThreadId, lock: SyncObject, since: Option<EventIdx>) -> WaitState {
        let notified = self.notifies(lock).iter().any(|&n| {
            self.events[n].thread != thread && since.map_or(true, |s| n > s)
        });
        if notified {
            WaitState::Notified
        } else {
            WaitState::Waiting
        }
    }

    fn push(&mut self, event: Event) -> EventIdx {
        let idx = self.events.len();
        self.threads.entry(event.thread).or_default().push(idx);
        self.events.push(event);
        idx
    }

    fn attach_to_block(
        &mut self,
        idx: EventIdx,
        thread: ThreadId,
        is_read: bool,
        current: &mut HashMap<ThreadId, BlockIdx>,
    ) {
        let prev = current.get(&thread).copied();
        let block = match prev {
            Some(b) if !is_read => b,
            _ => {
                let b = self.blocks.len();
                self.blocks.push(MemoryAccessBlock {
                    thread,
                    read: is_read.then_some(idx),
                    prev,
                    accesses: Vec::new(),
                });
                current.insert(thread, b);
                if is_read {
                    self.read_chain.entry(thread).or_default().push((idx, b));
                }
                b
            }
        };
        self.blocks[block].accesses.push(idx);
        self.block_of.insert(idx, block);
    }

    fn add_region(
        &mut self,
        thread: ThreadId,
        object: SyncObject,
        mode: LockMode,
        lock: Option<EventIdx>,
        unlock: Option<EventIdx>,
    ) {
        let r = self.lock_regions.len();
        self.lock_regions.push(LockRegion {
            thread,
            object,
            mode,
            lock,
            unlock,
        });
        self.regions_by_lock.entry(object).or_default().push(r);
    }

    /// Zero-based ordinal of this window in the run.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Critical events in global order. A `Wait` is followed by a synthetic
    /// exclusive `Lock` with the same gid standing for the reacquisition.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&self, idx: EventIdx) -> &Event {
        &self.events[idx]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn threads(&self) -> &IndexMap<ThreadId, Vec<EventIdx>> {
        &self.threads
    }

    pub fn thread_events(&self, thread: ThreadId) -> &[EventIdx] {
        self.threads.get(&thread).map_or(&[], Vec::as_slice)
    }

    pub fn first_event(&self, thread: ThreadId) -> Option<EventIdx> {
        self.thread_events(thread).first().copied()
    }

    pub fn last_event(&self, thread: ThreadId) -> Option<EventIdx> {
        self.thread_events(thread).last().copied()
    }

    pub fn shared_addresses(&self) -> &IndexSet<DataAddress> {
        &self.shared
    }

    pub fn reads(&self, address: DataAddress) -> &[EventIdx] {
        self.reads.get(&address).map_or(&[], Vec::as_slice)
    }

    pub fn writes(&self, address: DataAddress) -> &[EventIdx] {
        self.writes.get(&address).map_or(&[], Vec::as_slice)
    }

    /// Shared addresses with at least one write in this window.
    pub fn written_addresses(&self) -> impl Iterator<Item = DataAddress> + '_ {
        self.writes.keys().copied()
    }

    /// Accesses to `address` grouped by thread, each list in program order.
    pub fn thread_accesses(&self, address: DataAddress) -> Option<&IndexMap<ThreadId, Vec<EventIdx>>> {
        self.thread_accesses.get(&address)
    }

    pub fn lock_regions(&self) -> &[LockRegion] {
        &self.lock_regions
    }

    pub fn regions_by_lock(&self) -> &IndexMap<SyncObject, Vec<RegionIdx>> {
        &self.regions_by_lock
    }

    /// Regions `thread` holds on some lock, in the order they were closed.
    pub fn thread_regions(&self, thread: ThreadId) -> impl Iterator<Item = RegionIdx> + '_ {
        self.lock_regions
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.thread == thread)
            .map(|(i, _)| i)
    }

    pub fn blocks(&self) -> &[MemoryAccessBlock] {
        &self.blocks
    }

    pub fn block_of(&self, idx: EventIdx) -> Option<BlockIdx> {
        self.block_of.get(&idx).copied()
    }

    /// Block whose feasibility `idx` depends on.
    ///
    /// With branch tracking, an event depends on the reads its thread
    /// performed before the most recent preceding branch (none if there is
    /// no such branch). Without branch tracking it depends on every earlier
    /// read of its thread.
    pub fn dependence_block(&self, idx: EventIdx, no_branch: bool) -> Option<BlockIdx> {
        let event = &self.events[idx];
        let chain = self.read_chain.get(&event.thread)?;
        let bound = if no_branch {
            event.gid
        } else {
            let branches = self.branches.get(&event.thread)?;
            let n = branches.partition_point(|g| *g < event.gid);
            *branches.get(n.checked_sub(1)?)?
        };
        let n = chain.partition_point(|(r, _)| self.events[*r].gid < bound);
        n.checked_sub(1).map(|i| chain[i].1)
    }

    /// Latest write to the read's address by the reading thread, if in this window.
    pub fn same_thread_prev_write(&self, read: EventIdx) -> Option<EventIdx> {
        let event = &self.events[read];
        let address = event.address()?;
        self.writes(address)
            .iter()
            .rev()
            .find(|w| **w < read && self.events[**w].thread == event.thread)
            .copied()
    }

    /// Latest write to the read's address by any thread, if in this window.
    pub fn any_thread_prev_write(&self, read: EventIdx) -> Option<EventIdx> {
        let address = self.events[read].address()?;
        self.writes(address).iter().rev().find(|w| **w < read).copied()
    }

    /// Value of `address` at the start of the window, if known.
    pub fn initial_value(&self, address: DataAddress) -> Option<i64> {
        self.initial_values.get(&address).copied()
    }

    /// `(wait, reacquire)` pairs of waits performed while holding the monitor.
    pub fn waits(&self) -> &[(EventIdx, EventIdx)] {
        &self.waits
    }

    /// Returns from waits begun in earlier windows that still await a notify.
    pub fn resumptions(&self) -> &[Resumption] {
        &self.resumptions
    }

    pub fn notifies(&self, lock: SyncObject) -> &[EventIdx] {
        self.notifies.get(&lock).map_or(&[], Vec::as_slice)
    }

    pub fn stats(&self) -> TraceStats {
        self.stats
    }
}

/// First pass: addresses written by two threads, or written by one and
/// accessed by another.
fn shared_addresses(raw: &[Event], mut last_gid: Option<u64>) -> Result<IndexSet<DataAddress>, TraceError> {
    let mut readers: IndexMap<DataAddress, HashSet<ThreadId>> = IndexMap::new();
    let mut writers: HashMap<DataAddress, HashSet<ThreadId>> = HashMap::new();
    for event in raw {
        if let Some(previous) = last_gid {
            if event.gid <= previous {
                return Err(TraceError::NonMonotonic {
                    previous,
                    gid: event.gid,
                });
            }
        }
        last_gid = Some(event.gid);
        match event.kind {
            EventKind::Read { address, .. } => {
                readers.entry(address).or_default().insert(event.thread);
            }
            EventKind::Write { address, .. } => {
                writers.entry(address).or_default().insert(event.thread);
                readers.entry(address).or_default();
            }
            _ => {}
        }
    }
    Ok(readers
        .into_iter()
        .filter(|(address, r)| match writers.get(address) {
            Some(w) if w.len() > 1 => true,
            Some(w) => r.iter().any(|t| !w.contains(t)),
            None => false,
        })
        .map(|(address, _)| address)
        .collect())
}
