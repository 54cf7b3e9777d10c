//! Multi-tick harness tests for the engine's observable guarantees.
//!
//! Each test drives a task through the single-task harness tick by tick and
//! checks what an owner can see: states, phases, the delegated child and
//! submitted actions.

use taskloop::action::ActionRequest;
use taskloop::core::budget::Timeout;
use taskloop::core::exclusion::{ExclusionPolicy, ExclusionSet};
use taskloop::core::invariants::check_lifecycle_trace;
use taskloop::core::types::{TaskState, TIMEOUT_REASON};
use taskloop::task::{Task, TaskFactory};
use taskloop::test_support::{Harness, ProbeMove, ProbeTask, ScriptedExecutor};
use taskloop::workflows::{Interact, Sequence, WaitFor};
use taskloop::world::{WorldView, predicate};

/// Wait scenario: the condition is false on ticks 1-5 and true on tick 6.
#[test]
fn wait_completes_on_the_tick_its_condition_turns_true() {
    let mut harness = Harness::new();
    let mut wait = WaitFor::until(
        "ready",
        predicate(|world: &dyn WorldView| world.flag("ready")),
    );

    for _ in 1..=5 {
        assert_eq!(harness.execute(&mut wait), TaskState::Running);
    }
    harness.world.set_flag("ready", true);

    assert_eq!(harness.execute(&mut wait), TaskState::Completed);
    assert_eq!(harness.tick, 6);
    assert_eq!(wait.wait_ticks(), 6);
}

/// Timeout scenario: a 5-tick budget and a condition that never holds.
#[test]
fn timeout_fails_on_first_execute_past_budget() {
    let mut harness = Harness::new();
    let mut wait = WaitFor::until("never", predicate(|_| false))
        .with_timeout(Some(Timeout::Ticks(5)));

    assert_eq!(harness.run(&mut wait, 20), TaskState::Failed);

    assert_eq!(harness.tick, 6);
    assert_eq!(wait.failure_reason(), Some(TIMEOUT_REASON));
    assert!(wait.evaluations() <= 5);
}

/// Child delegation: the parent delegates on tick 3 and the child completes
/// on tick 7.
#[test]
fn parent_moves_on_once_child_completes() {
    let child = ProbeTask::new("child").at(7, ProbeMove::Complete);
    let mut parent = ProbeTask::new("parent").at(3, ProbeMove::delegate(child));
    let log = parent.log();
    let mut harness = Harness::new();

    for tick in 1..=8u64 {
        harness.execute(&mut parent);
        let has_child = parent.core().has_child();
        assert_eq!(has_child, (3..7).contains(&tick), "tick {tick}");
    }

    assert_eq!(parent.phase_name(), "after_child");
    assert_eq!(parent.state(), TaskState::Running);
    let log = log.borrow();
    let children = &log.children;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].0, 7);
    assert!(children[0].1.succeeded());
}

/// Exclusion-and-retry: three consecutive failures at tick N exclude the
/// candidate until N + clear_interval.
#[test]
fn excluded_candidate_returns_after_clear_interval() {
    let policy = ExclusionPolicy {
        threshold: 3,
        clear_interval: 10,
    };
    let mut exclusions = ExclusionSet::new(policy);
    let candidates = vec!["oak_1".to_string(), "oak_2".to_string()];

    assert!(!exclusions.record_failure("oak_1", 18));
    assert!(!exclusions.record_failure("oak_1", 19));
    assert!(exclusions.record_failure("oak_1", 20));

    assert_eq!(exclusions.first_selectable(&candidates, 20), Some("oak_2"));
    assert!(exclusions.is_excluded("oak_1", 29));
    assert!(!exclusions.is_excluded("oak_1", 30));
    assert_eq!(exclusions.first_selectable(&candidates, 30), Some("oak_1"));
}

/// Single outstanding action: issued on tick 10, resolved on tick 13.
#[test]
fn pending_action_blocks_handler_until_it_resolves() {
    let mut probe = ProbeTask::new("clicker").at(10, ProbeMove::issue_click("door"));
    let log = probe.log();
    let mut harness = Harness::with_executor(ScriptedExecutor::new(3));
    let submitted = harness.executor.submitted();

    for _ in 1..=10 {
        harness.execute(&mut probe);
    }
    assert!(probe.core().is_pending());

    harness.execute(&mut probe);
    harness.execute(&mut probe);
    assert!(probe.core().is_pending());
    assert_eq!(probe.phase_name(), "acting");

    harness.execute(&mut probe);
    assert!(!probe.core().is_pending());
    assert_eq!(probe.phase_name(), "resolved");

    let log = log.borrow();
    assert_eq!(log.pending_ticks, vec![11, 12]);
    assert!(!log.handler_ticks.contains(&11));
    assert!(!log.handler_ticks.contains(&12));
    assert_eq!(log.resolved, vec![(13, true)]);
    assert_eq!(submitted.borrow().len(), 1);
}

/// A confirmation that never arrives escalates exactly once, on the tick
/// the phase's wait counter first exceeds its bound.
#[test]
fn stuck_confirm_phase_escalates_once_past_threshold() {
    let mut harness = Harness::new();
    let mut interact = Interact::new(ActionRequest::pointer("click", "door"))
        .max_attempts(1)
        .confirm(predicate(|world: &dyn WorldView| world.flag("door_open")), 4);

    // Issued on tick 1, resolved on tick 2: the confirm phase waits ticks 2-5.
    for _ in 1..=5 {
        assert_eq!(harness.execute(&mut interact), TaskState::Running);
    }
    assert_eq!(interact.phase_name(), "confirm");

    assert_eq!(harness.execute(&mut interact), TaskState::Failed);
    assert_eq!(
        interact.failure_reason(),
        Some("click door failed after 1 attempts: not confirmed within 4 ticks")
    );
}

#[test]
fn observed_states_never_go_backwards() {
    let wait: TaskFactory =
        Box::new(|| Box::new(WaitFor::for_ticks(2).idle_drift(false)) as Box<dyn Task>);
    let click: TaskFactory = Box::new(|| {
        Box::new(Interact::new(ActionRequest::pointer("click", "door"))) as Box<dyn Task>
    });
    let steps = vec![wait, click];
    let mut sequence = Sequence::new("enter", steps);
    let mut harness = Harness::new();

    let mut trace = vec![sequence.state()];
    for _ in 0..20 {
        trace.push(harness.execute(&mut sequence));
    }

    assert_eq!(sequence.state(), TaskState::Completed);
    check_lifecycle_trace(&trace).expect("monotonic trace");
}

#[test]
fn reset_keeps_cumulative_counters_and_clears_attempt_state() {
    let mut harness = Harness::new();
    let mut wait = WaitFor::until("never", predicate(|_| false))
        .with_timeout(Some(Timeout::Ticks(3)))
        .idle_drift(false);

    assert_eq!(harness.run(&mut wait, 10), TaskState::Failed);
    let evaluations = wait.evaluations();
    assert!(evaluations > 0);
    assert!(wait.wait_ticks() > 0);

    wait.reset().expect("reset from terminal state");

    assert_eq!(wait.state(), TaskState::Pending);
    assert_eq!(wait.wait_ticks(), 0);
    assert_eq!(wait.evaluations(), evaluations);
    assert_eq!(wait.failure_reason(), None);

    let trace_after_reset = [wait.state(), harness.execute(&mut wait)];
    check_lifecycle_trace(&trace_after_reset).expect("fresh attempt trace");
}

#[test]
fn reset_is_rejected_while_running() {
    let mut harness = Harness::new();
    let mut wait = WaitFor::for_ticks(5);
    harness.execute(&mut wait);
    assert!(wait.reset().is_err());
    assert_eq!(wait.state(), TaskState::Running);
}
