//! Lockset quick filter.

use std::collections::HashMap;

use crate::event::{SyncObject, ThreadId};
use crate::window::{EventIdx, LockRegion, RegionIdx, Trace};

/// Indexes lock regions per (thread, lock) and answers whether two events
/// are protected by a common lock.
///
/// Sound but incomplete: a `true` answer means the events can never be
/// adjacent in any feasible reordering, a `false` answer means nothing.
#[derive(Debug, Clone, Default)]
pub struct LockSetEngine {
    regions: Vec<LockRegion>,
    by_thread: HashMap<ThreadId, HashMap<SyncObject, Vec<RegionIdx>>>,
}

impl LockSetEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_trace(trace: &Trace) -> Self {
        let mut engine = Self::new();
        for region in trace.lock_regions() {
            engine.add(region.clone());
        }
        engine
    }

    pub fn add(&mut self, region: LockRegion) {
        let idx = self.regions.len();
        self.by_thread
            .entry(region.thread)
            .or_default()
            .entry(region.object)
            .or_default()
            .push(idx);
        self.regions.push(region);
    }

    /// Locks `thread` holds while executing `event`, with whether the
    /// holding region is exclusive.
    pub fn held_at(&self, thread: ThreadId, event: EventIdx) -> Vec<(SyncObject, bool)> {
        let Some(locks) = self.by_thread.get(&thread) else {
            return Vec::new();
        };
        let mut held = Vec::new();
        for (lock, regions) in locks {
            if let Some(r) = regions
                .iter()
                .map(|r| &self.regions[*r])
                .find(|r| r.contains(event))
            {
                held.push((*lock, r.is_exclusive()));
            }
        }
        held
    }

    pub fn has_common_lock(&self, trace: &Trace, e1: EventIdx, e2: EventIdx) -> bool {
        let t1 = trace.event(e1).thread;
        let t2 = trace.event(e2).thread;
        let held2 = self.held_at(t2, e2);
        self.held_at(t1, e1).into_iter().any(|(lock, excl1)| {
            held2
                .iter()
                .any(|(other, excl2)| *other == lock && (excl1 || *excl2))
        })
    }
}
