//! Violation hypotheses and their static identities.

use std::fmt;

use serde::Serialize;
use sleuth_trace::event::{LocationId, ThreadId};
use sleuth_trace::metadata::Metadata;

use crate::schedule::Schedule;

/// Detector family a violation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Race,
    Deadlock,
    Atomicity,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Race => write!(f, "race"),
            Category::Deadlock => write!(f, "deadlock"),
            Category::Atomicity => write!(f, "atomicity violation"),
        }
    }
}

/// Static identity of a violation; dynamic repetitions share a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Signature {
    /// Unordered pair of conflicting access sites.
    Race {
        first: LocationId,
        second: LocationId,
    },
    /// Hold/request site pairs of both threads, smaller pair first.
    Deadlock {
        first: (LocationId, LocationId),
        second: (LocationId, LocationId),
    },
    /// Two consecutive accesses of one thread and the remote access between them.
    Atomicity {
        first: LocationId,
        second: LocationId,
        remote: LocationId,
    },
}

impl Signature {
    pub fn race(a: LocationId, b: LocationId) -> Self {
        Signature::Race {
            first: a.min(b),
            second: a.max(b),
        }
    }

    pub fn deadlock(
        hold1: LocationId,
        request1: LocationId,
        hold2: LocationId,
        request2: LocationId,
    ) -> Self {
        let (p, q) = ((hold1, request1), (hold2, request2));
        Signature::Deadlock {
            first: p.min(q),
            second: p.max(q),
        }
    }

    pub fn atomicity(first: LocationId, second: LocationId, remote: LocationId) -> Self {
        Signature::Atomicity {
            first,
            second,
            remote,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Signature::Race { .. } => Category::Race,
            Signature::Deadlock { .. } => Category::Deadlock,
            Signature::Atomicity { .. } => Category::Atomicity,
        }
    }

    /// Human-readable rendering with site names resolved through `metadata`.
    pub fn describe(&self, metadata: &Metadata) -> String {
        let site = |l: &LocationId| metadata.location_signature(*l);
        match self {
            Signature::Race { first, second } => {
                format!("Race: {} <-> {}", site(first), site(second))
            }
            Signature::Deadlock { first, second } => format!(
                "Deadlock: holding {} requests {}; holding {} requests {}",
                site(&first.0),
                site(&first.1),
                site(&second.0),
                site(&second.1)
            ),
            Signature::Atomicity {
                first,
                second,
                remote,
            } => format!(
                "Atomicity violation: {} interleaves {} .. {}",
                site(remote),
                site(first),
                site(second)
            ),
        }
    }
}

/// A violation the solver proved realizable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub signature: Signature,
    pub description: String,
    pub window: usize,
    /// Global ids of the dynamic events that exhibit the violation.
    pub gids: Vec<u64>,
    pub threads: Vec<ThreadId>,
    pub schedules: Vec<Schedule>,
}

impl Violation {
    pub fn category(&self) -> Category {
        self.signature.category()
    }
}

/// Why a suspect was not confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Unconfirmed {
    /// The model has no reordering exhibiting the violation.
    Refuted,
    /// The solver gave up, e.g. on timeout.
    Unknown(String),
}

/// A suspect that survived the cheap filters but was not confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PotentialViolation {
    pub signature: Signature,
    pub description: String,
    pub window: usize,
    pub outcome: Unconfirmed,
}
