//! Proptest strategies for generating well-formed multi-threaded event logs.

use std::collections::HashMap;

use proptest::prelude::*;

use crate::builder::EventLogBuilder;
use crate::event::Event;

/// One access: `(is_write, object, value)`. Read values are replaced by the
/// simulated memory contents when the log is assembled.
pub type AccessOp = (bool, u64, i64);

/// A unit of work a thread performs in the generated log.
#[derive(Debug, Clone)]
pub enum Section {
    Access(AccessOp),
    Branch,
    Locked { lock: u64, accesses: Vec<AccessOp> },
    /// Enter the monitor and notify it.
    Notify { lock: u64 },
    /// Enter the monitor and wait on it. The thread resumes at its next
    /// turn, so other threads may enter the monitor meanwhile. The wait
    /// returns on its own unless a `Notify` happened to fall in between.
    Waited { lock: u64, accesses: Vec<AccessOp> },
}

pub fn arb_access() -> impl Strategy<Value = AccessOp> {
    (any::<bool>(), 1..=3u64, 0..3i64)
}

pub fn arb_section() -> impl Strategy<Value = Section> {
    prop_oneof![
        arb_access().prop_map(Section::Access),
        (1..=2u64, proptest::collection::vec(arb_access(), 1..4))
            .prop_map(|(lock, accesses)| Section::Locked { lock, accesses }),
        Just(Section::Branch),
        (1..=2u64).prop_map(|lock| Section::Notify { lock }),
        (1..=2u64, proptest::collection::vec(arb_access(), 0..3))
            .prop_map(|(lock, accesses)| Section::Waited { lock, accesses }),
    ]
}

/// Strategy for an event log that could have been recorded from a real run.
///
/// Generated logs have:
/// - 2–4 threads, each with 1–5 sections
/// - critical sections that never overlap across threads on the same lock
/// - read values equal to the last value written in log order, starting
///   from optional `Init` values (otherwise 0)
/// - waits whose monitor other threads may enter before the waiter resumes
/// - optionally, thread 1 starting every other thread first and joining
///   them at the end
pub fn arb_event_log() -> impl Strategy<Value = Vec<Event>> {
    (2..=4usize)
        .prop_flat_map(|threads| {
            (
                proptest::collection::vec(
                    proptest::collection::vec(arb_section(), 1..6),
                    threads..=threads,
                ),
                proptest::collection::vec(0..threads, 0..48),
                any::<bool>(),
                proptest::collection::vec((1..=3u64, -2..3i64), 0..3),
            )
        })
        .prop_map(|(programs, schedule, fork_join, inits)| {
            assemble(programs, &schedule, fork_join, &inits)
        })
}

fn assemble(
    programs: Vec<Vec<Section>>,
    schedule: &[usize],
    fork_join: bool,
    inits: &[(u64, i64)],
) -> Vec<Event> {
    let mut log = EventLogBuilder::new();
    let mut memory: HashMap<u64, i64> = HashMap::new();
    let threads = programs.len();
    let mut cursor = vec![0usize; threads];
    // Threads parked in a wait, resumed at their next turn.
    let mut waiting = vec![false; threads];

    for &(object, value) in inits {
        if memory.contains_key(&object) {
            continue;
        }
        memory.insert(object, value);
        log.init(1, &format!("init:{object}"), object, value);
    }

    if fork_join {
        for child in 2..=threads as u64 {
            log.start(1, &format!("t1:start{child}"), child);
        }
    }

    let mut emit = |t: usize, cursor: &mut [usize], log: &mut EventLogBuilder| {
        let Some(section) = programs[t].get(cursor[t]) else {
            return;
        };
        let thread = t as u64 + 1;
        let site = format!("t{thread}:s{}", cursor[t]);
        let resuming = waiting[t];
        if let Section::Waited { .. } = section {
            waiting[t] = !resuming;
        }
        if !waiting[t] {
            cursor[t] += 1;
        }
        let mut access = |log: &mut EventLogBuilder, i: usize, op: &AccessOp| {
            let (is_write, object, value) = *op;
            let loc = format!("{site}:{i}");
            if is_write {
                memory.insert(object, value);
                log.write(thread, &loc, object, value);
            } else {
                let seen = memory.get(&object).copied().unwrap_or(0);
                log.read(thread, &loc, object, seen);
            }
        };
        match section {
            Section::Access(op) => access(log, 0, op),
            Section::Locked { lock, accesses } => {
                log.lock(thread, &format!("{site}:lock"), *lock);
                for (i, op) in accesses.iter().enumerate() {
                    access(log, i, op);
                }
                log.unlock(thread, &format!("{site}:unlock"), *lock);
            }
            Section::Branch => {
                log.branch(thread, &format!("{site}:branch"));
            }
            Section::Notify { lock } => {
                log.lock(thread, &format!("{site}:lock"), *lock)
                    .notify(thread, &format!("{site}:notify"), *lock)
                    .unlock(thread, &format!("{site}:unlock"), *lock);
            }
            Section::Waited { lock, .. } if !resuming => {
                log.lock(thread, &format!("{site}:lock"), *lock)
                    .wait(thread, &format!("{site}:wait"), *lock);
            }
            Section::Waited { lock, accesses } => {
                for (i, op) in accesses.iter().enumerate() {
                    access(log, i, op);
                }
                log.unlock(thread, &format!("{site}:unlock"), *lock);
            }
        }
    };

    for &t in schedule {
        emit(t, &mut cursor, &mut log);
    }
    for t in 0..threads {
        while cursor[t] < programs[t].len() {
            emit(t, &mut cursor, &mut log);
        }
    }

    if fork_join {
        for child in 2..=threads as u64 {
            log.join(1, &format!("t1:join{child}"), child);
        }
    }
    log.into_events()
}
