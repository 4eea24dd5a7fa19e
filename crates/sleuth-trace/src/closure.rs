//! Must-happen-before closure over one window.
//!
//! Program order plus start/join edges form a DAG in which only a few nodes
//! have more than one successor. Each thread's event list is cut into
//! groups: a group ends at a `Start` and a new group begins at a `Join`, so
//! every inter-thread edge leaves the end of one group and enters the
//! beginning of another. Reachability is then an index comparison inside a
//! group and a bitset lookup between groups.

use std::collections::VecDeque;

use thiserror::Error;

use crate::event::EventKind;
use crate::window::{EventIdx, Trace};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HbError {
    #[error("happens-before cycle through group of event {gid}")]
    Cycle { gid: u64 },
}

/// Reachability oracle for the must-happen-before partial order.
#[derive(Debug, Clone)]
pub struct HappensBefore {
    group_of: Vec<usize>,
    /// Successors of each group, strict (a group never reaches itself).
    reach: Vec<Vec<u64>>,
}

impl HappensBefore {
    pub fn build(trace: &Trace) -> Result<Self, HbError> {
        let n = trace.len();
        let mut group_of = vec![0usize; n];
        let mut group_head: Vec<EventIdx> = Vec::new();
        let mut edges: Vec<(usize, usize)> = Vec::new();

        for events in trace.threads().values() {
            let mut prev: Option<EventIdx> = None;
            for &idx in events {
                let starts_group = match prev {
                    None => true,
                    Some(p) => trace.event(p).is_start() || trace.event(idx).is_join(),
                };
                if starts_group {
                    let g = group_head.len();
                    group_head.push(idx);
                    if let Some(p) = prev {
                        edges.push((group_of[p], g));
                    }
                    group_of[idx] = g;
                } else if let Some(p) = prev {
                    group_of[idx] = group_of[p];
                }
                prev = Some(idx);
            }
        }

        for (idx, event) in trace.events().iter().enumerate() {
            match event.kind {
                EventKind::Start { child } => {
                    if let Some(first) = trace.first_event(child) {
                        edges.push((group_of[idx], group_of[first]));
                    }
                }
                EventKind::Join { child } => {
                    if let Some(last) = trace.last_event(child) {
                        edges.push((group_of[last], group_of[idx]));
                    }
                }
                _ => {}
            }
        }

        let groups = group_head.len();
        let mut succ: Vec<Vec<usize>> = vec![Vec::new(); groups];
        let mut indegree = vec![0usize; groups];
        for &(from, to) in &edges {
            if from == to {
                return Err(HbError::Cycle {
                    gid: trace.event(group_head[from]).gid,
                });
            }
            succ[from].push(to);
            indegree[to] += 1;
        }

        let mut queue: VecDeque<usize> = (0..groups).filter(|g| indegree[*g] == 0).collect();
        let mut topo = Vec::with_capacity(groups);
        while let Some(g) = queue.pop_front() {
            topo.push(g);
            for &s in &succ[g] {
                indegree[s] -= 1;
                if indegree[s] == 0 {
                    queue.push_back(s);
                }
            }
        }
        // Groups left with predecessors are exactly those on or behind a cycle.
        if let Some(stuck) = (0..groups).find(|g| indegree[*g] > 0) {
            return Err(HbError::Cycle {
                gid: trace.event(group_head[stuck]).gid,
            });
        }

        let words = groups.div_ceil(64);
        let mut reach = vec![vec![0u64; words]; groups];
        for &g in topo.iter().rev() {
            let mut row = vec![0u64; words];
            for &s in &succ[g] {
                row[s / 64] |= 1 << (s % 64);
                for (w, bits) in row.iter_mut().zip(&reach[s]) {
                    *w |= bits;
                }
            }
            reach[g] = row;
        }

        Ok(Self { group_of, reach })
    }

    /// Whether `e1` must happen before `e2`. Irreflexive.
    pub fn reaches(&self, e1: EventIdx, e2: EventIdx) -> bool {
        let (g1, g2) = (self.group_of[e1], self.group_of[e2]);
        if g1 == g2 {
            return e1 < e2;
        }
        self.reach[g1][g2 / 64] & (1 << (g2 % 64)) != 0
    }

    /// Whether the two events are ordered either way.
    pub fn ordered(&self, e1: EventIdx, e2: EventIdx) -> bool {
        self.reaches(e1, e2) || self.reaches(e2, e1)
    }

    pub fn group_count(&self) -> usize {
        self.reach.len()
    }
}
