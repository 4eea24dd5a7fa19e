//! Violation detectors.
//!
//! Each detector enumerates suspects of one category over a window, drops
//! those the lockset or happens-before filters already rule out, and asks
//! the causal model about the rest. Confirmed violations and unconfirmed
//! suspects are recorded in the [`AnalysisSession`](crate::session::AnalysisSession)
//! as they are decided.

pub mod atomicity;
pub mod deadlock;
pub mod race;

use serde::Serialize;
use sleuth_smt::encoder::{Verdict, Witness};

use crate::session::AnalysisSession;
use crate::violation::{Signature, Unconfirmed};

pub use atomicity::detect_atomicity_violations;
pub use deadlock::detect_deadlocks;
pub use race::detect_races;

/// Which detectors run on each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectorSet {
    pub race: bool,
    pub deadlock: bool,
    pub atomicity: bool,
}

impl DetectorSet {
    pub fn all() -> Self {
        Self {
            race: true,
            deadlock: true,
            atomicity: true,
        }
    }

    pub fn none() -> Self {
        Self {
            race: false,
            deadlock: false,
            atomicity: false,
        }
    }
}

impl Default for DetectorSet {
    fn default() -> Self {
        Self {
            race: true,
            ..Self::none()
        }
    }
}

/// Split a verdict: the witness slot when feasible, otherwise record the
/// suspect as unconfirmed and return `None`.
fn settle(
    session: &mut AnalysisSession,
    signature: &Signature,
    window: usize,
    verdict: Verdict,
) -> Option<Option<Witness>> {
    match verdict {
        Verdict::Feasible(witness) => Some(witness),
        Verdict::Infeasible => {
            session.record_unconfirmed(signature.clone(), window, Unconfirmed::Refuted);
            None
        }
        Verdict::Unknown(reason) => {
            session.record_unconfirmed(signature.clone(), window, Unconfirmed::Unknown(reason));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_races_by_default() {
        let set = DetectorSet::default();
        assert!(set.race);
        assert!(!set.deadlock);
        assert!(!set.atomicity);
        assert_eq!(DetectorSet::all(), DetectorSet { race: true, deadlock: true, atomicity: true });
    }
}
