//! Small recorded executions with known verdicts.

mod common;

use common::*;
use sleuth_engine::detect::detect_races;
use sleuth_engine::pipeline::AnalysisOptions;
use sleuth_engine::session::AnalysisSession;
use sleuth_engine::violation::{Category, Signature, Unconfirmed};
use sleuth_smt::backends::z3_backend::Z3Solver;
use sleuth_smt::encoder::{EncoderOptions, MaximalCausalModel};
use sleuth_trace::builder::EventLogBuilder;
use sleuth_trace::window::Trace;

#[test]
fn unsynchronized_writes_race_with_both_orders() {
    let report = run(unsynchronized_writes(), &options());
    assert_eq!(report.count(Category::Race), 1);
    let race = &report.violations[0];
    assert_eq!(race.description, "Race: Account.deposit:12 <-> Account.withdraw:30");
    assert_eq!(race.schedules.len(), 2);

    let sites = |i: usize| -> Vec<String> {
        race.schedules[i].steps.iter().map(|s| s.site.clone()).collect()
    };
    assert_eq!(sites(0), vec!["Account.deposit:12", "Account.withdraw:30"]);
    assert_eq!(sites(1), vec!["Account.withdraw:30", "Account.deposit:12"]);
    assert!(report.potentials.is_empty());
}

#[test]
fn writes_under_one_lock_do_not_race() {
    let report = run(locked_writes(), &options());
    assert_eq!(report.count(Category::Race), 0);
    // The lockset filter decides before the solver is consulted.
    assert!(report.potentials.is_empty());
    assert_eq!(report.windows[0].queries, 0);
}

#[test]
fn lock_order_inversion_deadlocks() {
    let report = run(lock_order_inversion(), &all_detectors());
    assert_eq!(report.count(Category::Deadlock), 1);
    assert_eq!(report.count(Category::Race), 0);
    let deadlock = report
        .of_category(Category::Deadlock)
        .next()
        .expect("one deadlock");
    assert_eq!(deadlock.gids.len(), 4);
    assert_eq!(deadlock.schedules.len(), 1);
    let steps = &deadlock.schedules[0].steps;
    assert_eq!(steps.len(), 4);
    assert!(steps.iter().all(|s| s.action.starts_with("lock")));
}

#[test]
fn deadlock_detection_is_off_by_default() {
    let report = run(lock_order_inversion(), &options());
    assert_eq!(report.count(Category::Deadlock), 0);
}

#[test]
fn gate_lock_prevents_deadlock() {
    let mut log = EventLogBuilder::new();
    log.lock(1, "t1:g", 5)
        .lock(1, "t1:a", 10)
        .lock(1, "t1:b", 20)
        .unlock(1, "t1:ub", 20)
        .unlock(1, "t1:ua", 10)
        .unlock(1, "t1:ug", 5)
        .lock(2, "t2:g", 5)
        .lock(2, "t2:b", 20)
        .lock(2, "t2:a", 10)
        .unlock(2, "t2:ua", 10)
        .unlock(2, "t2:ub", 20)
        .unlock(2, "t2:ug", 5);
    let report = run(log, &all_detectors());
    assert_eq!(report.count(Category::Deadlock), 0);
}

#[test]
fn unprotected_read_modify_write_is_not_atomic() {
    let mut log = EventLogBuilder::new();
    log.read(1, "inc:load", 1, 0)
        .write(1, "inc:store", 1, 1)
        .write(2, "reset", 1, 5);
    let report = run(log, &all_detectors());
    assert_eq!(report.count(Category::Atomicity), 1);
    let violation = report
        .of_category(Category::Atomicity)
        .next()
        .expect("one atomicity violation");
    assert_eq!(violation.description, "Atomicity violation: reset interleaves inc:load .. inc:store");
    let last: Vec<&str> = violation.schedules[0]
        .steps
        .iter()
        .map(|s| s.site.as_str())
        .collect();
    assert_eq!(last, vec!["inc:load", "reset", "inc:store"]);
}

#[test]
fn locked_read_modify_write_is_atomic() {
    let mut log = EventLogBuilder::new();
    log.lock(1, "inc:enter", 3)
        .read(1, "inc:load", 1, 0)
        .write(1, "inc:store", 1, 1)
        .unlock(1, "inc:exit", 3)
        .lock(2, "reset:enter", 3)
        .write(2, "reset", 1, 5)
        .unlock(2, "reset:exit", 3);
    let report = run(log, &all_detectors());
    assert_eq!(report.count(Category::Atomicity), 0);
    assert_eq!(report.count(Category::Race), 0);
}

#[test]
fn volatile_fields_are_exempt() {
    let mut log = unsynchronized_writes();
    log.mark_volatile(1);
    let report = run(log, &options());
    assert_eq!(report.count(Category::Race), 0);
}

#[test]
fn start_orders_parent_before_child() {
    let mut log = EventLogBuilder::new();
    log.write(1, "main:init", 1, 1)
        .start(1, "main:spawn", 2)
        .write(2, "worker:run", 1, 2)
        .join(1, "main:join", 2)
        .write(1, "main:after", 1, 3);
    let report = run(log, &options());
    assert_eq!(report.count(Category::Race), 0);
    assert!(report.potentials.is_empty());
}

#[test]
fn notify_orders_the_woken_read() {
    let mut log = EventLogBuilder::new();
    log.lock(1, "consumer:enter", 7)
        .wait(1, "consumer:wait", 7)
        .write(2, "producer:put", 1, 1)
        .lock(2, "producer:enter", 7)
        .notify(2, "producer:notify", 7)
        .unlock(2, "producer:exit", 7)
        .unlock(1, "consumer:exit", 7)
        .read(1, "consumer:take", 1, 1);
    let report = run(log, &options());
    assert_eq!(report.count(Category::Race), 0);
    assert_eq!(report.potentials.len(), 1);
    assert_eq!(report.potentials[0].outcome, Unconfirmed::Refuted);
}

#[test]
fn timed_wait_leaves_unrelated_races_decidable() {
    // Thread 1 only starts after the notify, so its wait times out.
    let mut log = EventLogBuilder::new();
    log.lock(2, "main:enter", 7)
        .notify(2, "main:notify", 7)
        .unlock(2, "main:exit", 7)
        .start(2, "main:spawn", 1)
        .lock(1, "sleeper:enter", 7)
        .wait(1, "sleeper:timed_wait", 7)
        .unlock(1, "sleeper:exit", 7)
        .write(3, "left:x", 1, 1)
        .write(4, "right:x", 1, 2);
    let options = AnalysisOptions {
        check_consistency: true,
        ..options()
    };
    let report = run(log, &options);
    assert!(report.failed_windows.is_empty());
    assert_eq!(report.count(Category::Race), 1);
    assert_eq!(report.violations[0].description, "Race: left:x <-> right:x");
}

#[test]
fn branch_dependence_limits_races() {
    // The worker only writes `data` after observing the flag.
    let build = |branch: bool| {
        let mut log = EventLogBuilder::new();
        log.write(1, "main:data", 2, 1)
            .write(1, "main:flag", 1, 1)
            .read(2, "worker:poll", 1, 1);
        if branch {
            log.branch(2, "worker:if");
        }
        log.write(2, "worker:data", 2, 2);
        log
    };
    let data_race = |report: &sleuth_engine::result::AnalysisReport| {
        report
            .violations
            .iter()
            .any(|v| v.description.contains("main:data"))
    };

    let tracked = sleuth_engine::pipeline::AnalysisOptions::default();
    assert!(!data_race(&run(build(true), &tracked)));
    // Without a branch the write does not depend on the poll.
    assert!(data_race(&run(build(false), &tracked)));
    // Treating every read as a dependence restores the ordering.
    assert!(!data_race(&run(build(false), &options())));
}

#[test]
fn rerunning_races_on_a_window_confirms_nothing_new() -> TestResult {
    let (events, metadata) = unsynchronized_writes().into_parts();
    let mut session = AnalysisSession::new(metadata, 100);
    let trace = Trace::load(events, session.carry_mut())?;
    let mut model = MaximalCausalModel::create(&trace, Z3Solver::new(), EncoderOptions::default())?;

    detect_races(&mut model, &mut session, true)?;
    assert_eq!(session.violations().len(), 1);
    let queries = model.stats().queries;

    detect_races(&mut model, &mut session, true)?;
    assert_eq!(session.violations().len(), 1);
    assert_eq!(model.stats().queries, queries);
    Ok(())
}

#[test]
fn read_of_overwritten_value_races_with_both_writes() {
    let mut log = EventLogBuilder::new();
    log.write(1, "w5", 1, 5)
        .write(1, "w7", 1, 7)
        .read(2, "r", 1, 5);
    let report = run(log, &options());
    let signatures: Vec<&Signature> = report.violations.iter().map(|v| &v.signature).collect();
    assert_eq!(signatures.len(), 2);
}
