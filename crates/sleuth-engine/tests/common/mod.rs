#![allow(dead_code)]

use sleuth_engine::detect::DetectorSet;
use sleuth_engine::pipeline::{analyze_trace, AnalysisOptions};
use sleuth_engine::result::AnalysisReport;
use sleuth_smt::solver::{Model, SatResult, SmtSolver};
use sleuth_smt::terms::{SmtSort, SmtTerm};
use sleuth_trace::builder::EventLogBuilder;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn options() -> AnalysisOptions {
    AnalysisOptions {
        no_branch: true,
        ..AnalysisOptions::default()
    }
}

pub fn all_detectors() -> AnalysisOptions {
    AnalysisOptions {
        detectors: DetectorSet::all(),
        ..options()
    }
}

pub fn run(log: EventLogBuilder, options: &AnalysisOptions) -> AnalysisReport {
    let (events, metadata) = log.into_parts();
    analyze_trace(events, metadata, options).unwrap_or_else(|e| panic!("analysis failed: {e}"))
}

/// Two threads writing the same field with no synchronization.
pub fn unsynchronized_writes() -> EventLogBuilder {
    let mut log = EventLogBuilder::new();
    log.write(1, "Account.deposit:12", 1, 1)
        .write(2, "Account.withdraw:30", 1, 2);
    log
}

/// The same writes, each inside a critical section on one lock.
pub fn locked_writes() -> EventLogBuilder {
    let mut log = EventLogBuilder::new();
    log.lock(1, "Account.deposit:10", 9)
        .write(1, "Account.deposit:12", 1, 1)
        .unlock(1, "Account.deposit:14", 9)
        .lock(2, "Account.withdraw:28", 9)
        .write(2, "Account.withdraw:30", 1, 2)
        .unlock(2, "Account.withdraw:32", 9);
    log
}

/// Thread 1 nests A then B; thread 2 nests B then A.
pub fn lock_order_inversion() -> EventLogBuilder {
    let mut log = EventLogBuilder::new();
    log.lock(1, "transfer:a", 10)
        .lock(1, "transfer:b", 20)
        .unlock(1, "transfer:ub", 20)
        .unlock(1, "transfer:ua", 10)
        .lock(2, "refund:b", 20)
        .lock(2, "refund:a", 10)
        .unlock(2, "refund:ua", 10)
        .unlock(2, "refund:ub", 20);
    log
}

/// A solver that accepts formulas but fails every check.
#[derive(Debug, Default)]
pub struct FailingSolver;

#[derive(Debug)]
pub struct SolverCrashed;

impl std::fmt::Display for SolverCrashed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "solver crashed")
    }
}

impl std::error::Error for SolverCrashed {}

impl SmtSolver for FailingSolver {
    type Error = SolverCrashed;

    fn declare_var(&mut self, _name: &str, _sort: &SmtSort) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn assert(&mut self, _term: &SmtTerm) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn push(&mut self) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn pop(&mut self) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, SolverCrashed> {
        Err(SolverCrashed)
    }

    fn check_sat_with_model(
        &mut self,
        _var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), SolverCrashed> {
        Err(SolverCrashed)
    }

    fn set_timeout_ms(&mut self, _timeout_ms: u64) -> Result<(), SolverCrashed> {
        Ok(())
    }
}

/// A solver that leaves its first check undecided and crashes on the next.
#[derive(Debug, Default)]
pub struct FlakySolver {
    checks: usize,
}

impl FlakySolver {
    fn next_check(&mut self) -> Result<SatResult, SolverCrashed> {
        self.checks += 1;
        if self.checks == 1 {
            Ok(SatResult::Unknown("timeout".into()))
        } else {
            Err(SolverCrashed)
        }
    }
}

impl SmtSolver for FlakySolver {
    type Error = SolverCrashed;

    fn declare_var(&mut self, _name: &str, _sort: &SmtSort) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn assert(&mut self, _term: &SmtTerm) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn push(&mut self) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn pop(&mut self) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, SolverCrashed> {
        self.next_check()
    }

    fn check_sat_with_model(
        &mut self,
        _var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), SolverCrashed> {
        Ok((self.next_check()?, None))
    }

    fn set_timeout_ms(&mut self, _timeout_ms: u64) -> Result<(), SolverCrashed> {
        Ok(())
    }
}

/// A solver that never reaches a verdict, as on timeout.
#[derive(Debug, Default)]
pub struct UndecidedSolver;

impl SmtSolver for UndecidedSolver {
    type Error = SolverCrashed;

    fn declare_var(&mut self, _name: &str, _sort: &SmtSort) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn assert(&mut self, _term: &SmtTerm) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn push(&mut self) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn pop(&mut self) -> Result<(), SolverCrashed> {
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, SolverCrashed> {
        Ok(SatResult::Unknown("timeout".into()))
    }

    fn check_sat_with_model(
        &mut self,
        _var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), SolverCrashed> {
        Ok((SatResult::Unknown("timeout".into()), None))
    }

    fn set_timeout_ms(&mut self, _timeout_ms: u64) -> Result<(), SolverCrashed> {
        Ok(())
    }
}
