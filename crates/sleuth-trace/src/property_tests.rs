use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use crate::closure::HappensBefore;
use crate::event::{DataAddress, ThreadId};
use crate::lockset::LockSetEngine;
use crate::proptest_generators::arb_event_log;
use crate::reader::windows_of;
use crate::window::{CarryState, Trace};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn happens_before_is_a_strict_partial_order(events in arb_event_log()) {
        let trace = Trace::load(events, &mut CarryState::new()).expect("generated logs load");
        let hb = HappensBefore::build(&trace).expect("generated logs are acyclic");
        let n = trace.len();
        for a in 0..n {
            prop_assert!(!hb.reaches(a, a));
            for b in 0..n {
                if hb.reaches(a, b) {
                    prop_assert!(!hb.reaches(b, a), "antisymmetry violated for {a} {b}");
                    for c in 0..n {
                        if hb.reaches(b, c) {
                            prop_assert!(hb.reaches(a, c), "transitivity violated for {a} {b} {c}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn happens_before_agrees_with_logged_order(events in arb_event_log()) {
        let trace = Trace::load(events, &mut CarryState::new()).expect("loads");
        let hb = HappensBefore::build(&trace).expect("acyclic");
        for a in 0..trace.len() {
            for b in 0..trace.len() {
                if hb.reaches(a, b) {
                    // A wait and its reacquisition share a gid.
                    prop_assert!(a < b);
                    prop_assert!(trace.event(a).gid <= trace.event(b).gid);
                }
            }
        }
    }

    #[test]
    fn thread_lists_follow_global_order(events in arb_event_log()) {
        let trace = Trace::load(events, &mut CarryState::new()).expect("loads");
        for (thread, list) in trace.threads() {
            for pair in list.windows(2) {
                prop_assert!(pair[0] < pair[1]);
                prop_assert!(trace.event(pair[0]).gid <= trace.event(pair[1]).gid);
            }
            prop_assert!(list.iter().all(|e| trace.event(*e).thread == *thread));
        }
    }

    #[test]
    fn pruned_addresses_never_reach_the_index(events in arb_event_log()) {
        let mut writers: HashMap<DataAddress, HashSet<ThreadId>> = HashMap::new();
        let mut accessors: HashMap<DataAddress, HashSet<ThreadId>> = HashMap::new();
        for e in &events {
            if let Some(a) = e.address() {
                accessors.entry(a).or_default().insert(e.thread);
                if e.is_write() {
                    writers.entry(a).or_default().insert(e.thread);
                }
            }
        }
        let trace = Trace::load(events, &mut CarryState::new()).expect("loads");
        for e in trace.events() {
            if let Some(a) = e.address() {
                let w = writers.get(&a).cloned().unwrap_or_default();
                prop_assert!(!w.is_empty(), "read-only address {a} was retained");
                prop_assert!(
                    w.len() > 1 || accessors[&a].iter().any(|t| !w.contains(t)),
                    "single-thread address {a} was retained"
                );
            }
        }
    }

    #[test]
    fn window_sharing_implies_global_sharing(events in arb_event_log(), size in 1..16usize) {
        let whole = Trace::load(events.clone(), &mut CarryState::new()).expect("loads");
        let globally: HashSet<u64> = whole.events().iter().map(|e| e.gid).collect();
        let mut carry = CarryState::new();
        for window in windows_of(events, size) {
            let trace = Trace::load(window.expect("monotonic"), &mut carry).expect("loads");
            for e in trace.events().iter().filter(|e| e.is_access()) {
                prop_assert!(globally.contains(&e.gid));
            }
        }
    }

    #[test]
    fn every_wait_is_followed_by_its_reacquisition(events in arb_event_log()) {
        let trace = Trace::load(events, &mut CarryState::new()).expect("loads");
        for &(wait, reacquire) in trace.waits() {
            prop_assert_eq!(reacquire, wait + 1);
            prop_assert_eq!(trace.event(wait).gid, trace.event(reacquire).gid);
            prop_assert_eq!(trace.event(wait).thread, trace.event(reacquire).thread);
        }
    }

    #[test]
    fn windowed_regions_never_overlap_on_one_lock(events in arb_event_log(), size in 1..16usize) {
        let mut carry = CarryState::new();
        for window in windows_of(events, size) {
            let trace = Trace::load(window.expect("monotonic"), &mut carry).expect("loads");
            let regions = trace.lock_regions();
            for (i, a) in regions.iter().enumerate() {
                for b in &regions[i + 1..] {
                    if a.object != b.object || a.thread == b.thread {
                        continue;
                    }
                    // Two regions on a lock, each open at an end, would
                    // both have to hold it at that boundary.
                    prop_assert!(!(a.lock.is_none() && b.lock.is_none()));
                    prop_assert!(!(a.unlock.is_none() && b.unlock.is_none()));
                }
            }
        }
    }

    #[test]
    fn events_inside_a_region_hold_its_lock(events in arb_event_log()) {
        let trace = Trace::load(events, &mut CarryState::new()).expect("loads");
        let locks = LockSetEngine::from_trace(&trace);
        for region in trace.lock_regions() {
            let (Some(l), Some(u)) = (region.lock, region.unlock) else { continue };
            for inner in (l + 1)..u {
                if trace.event(inner).thread == region.thread {
                    let held = locks.held_at(region.thread, inner);
                    prop_assert!(held.iter().any(|(obj, _)| *obj == region.object));
                }
            }
        }
    }
}
