//! Orchestration for a single execute call on a task tree.
//!
//! Order of work for one call on a non-terminal task:
//! 1. `can_execute` gate and `start` on the first call
//! 2. overall timeout, then the optional inactivity limit
//! 3. outstanding action, delegated child, or the phase handler, in that order
//! 4. lifecycle hooks for whatever turned terminal, cancelling orphaned children

use tracing::{debug, info, instrument, trace, warn};

use crate::action::ActionCompletion;
use crate::core::budget::remaining_quiet_ticks;
use crate::core::gate::Stale;
use crate::core::types::{TIMEOUT_REASON, TaskState};
use crate::task::{ChildReport, Task, TaskContext};

/// What happened to a completion handed to [`deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The continuation ran on the owning task.
    Applied,
    /// The owner exists but moved on; the completion was dropped.
    Stale(Stale),
    /// No task in this tree has the ticket's id.
    Unknown,
}

/// Execute `task` once for the current tick and return its state afterwards.
#[instrument(skip_all, fields(task = %task.id(), tick = ctx.tick))]
pub fn execute_task(task: &mut dyn Task, ctx: &mut TaskContext<'_>) -> TaskState {
    let state = task.state();
    if state.is_terminal() {
        return state;
    }

    if state == TaskState::Pending {
        if !task.can_execute(ctx) {
            trace!("cannot execute yet");
            return state;
        }
        if !start(task, ctx) {
            settle(task, ctx);
            return task.state();
        }
    }

    if let Some(reason) = supervise(task, ctx) {
        task.core_mut().fail(reason);
        settle(task, ctx);
        return task.state();
    }

    task.core_mut().ticks += 1;
    let phase_before = task.phase_name();

    let outcome = if task.core().is_pending() {
        trace!("action pending");
        task.while_pending(ctx)
    } else if let Some(mut child) = task.core_mut().child.take() {
        let child_state = execute_task(child.as_mut(), ctx);
        if child_state.is_terminal() {
            let report = ChildReport::from_task(child.as_ref());
            drop(child);
            task.core_mut().mark_progress(ctx.tick);
            task.on_child_finished(ctx, report)
        } else {
            task.core_mut().child = Some(child);
            Ok(())
        }
    } else {
        task.step(ctx)
    };

    if let Err(err) = outcome {
        task.core_mut().fail(format!("error: {err:#}"));
    }

    let phase_after = task.phase_name();
    if phase_after != phase_before {
        debug!(from = phase_before, to = phase_after, "phase");
        task.core_mut().mark_progress(ctx.tick);
    }

    settle(task, ctx);
    task.state()
}

/// Route a completion to its owner inside the tree rooted at `task` and run
/// the continuation if the completion is still current.
pub fn deliver(
    task: &mut dyn Task,
    completion: ActionCompletion,
    ctx: &mut TaskContext<'_>,
) -> Delivery {
    if completion.ticket.task != task.id() {
        return match task.core_mut().child.as_mut() {
            Some(child) => deliver(child.as_mut(), completion, ctx),
            None => Delivery::Unknown,
        };
    }

    let ticket = completion.ticket;
    let generation = task.core().lifecycle().generation();
    let state = task.state();
    if let Err(stale) = task.core_mut().gate.admit(&ticket, generation, state) {
        warn!(%ticket, reason = %stale, "dropping stale completion");
        return Delivery::Stale(stale);
    }

    debug!(%ticket, ok = completion.result.is_ok(), tick = ctx.tick, "action resolved");
    task.core_mut().mark_progress(ctx.tick);
    if let Err(err) = task.on_action_resolved(ctx, completion.result) {
        task.core_mut().fail(format!("error: {err:#}"));
    }
    settle(task, ctx);
    Delivery::Applied
}

/// Fail `task` from outside with `"aborted: <reason>"`, cancelling its
/// subtree. Returns `false` when the task was already terminal.
pub fn abort_task(task: &mut dyn Task, ctx: &mut TaskContext<'_>, reason: &str) -> bool {
    if !task.core_mut().fail(format!("aborted: {reason}")) {
        return false;
    }
    settle(task, ctx);
    true
}

fn start(task: &mut dyn Task, ctx: &mut TaskContext<'_>) -> bool {
    if let Err(err) = task.core_mut().lifecycle.start(ctx.tick, ctx.now) {
        warn!(error = %err, "start rejected");
        return false;
    }
    task.core_mut().mark_progress(ctx.tick);
    info!(description = %task.description(), "started");
    if let Err(err) = task.on_start(ctx) {
        task.core_mut().fail(format!("error: {err:#}"));
        return false;
    }
    true
}

/// Overall budget first, then the inactivity limit.
fn supervise(task: &dyn Task, ctx: &TaskContext<'_>) -> Option<String> {
    let core = task.core();
    let lifecycle = core.lifecycle();
    if let (Some(timeout), Some(started_tick), Some(started_at)) =
        (core.timeout(), lifecycle.started_tick(), lifecycle.started_at())
    {
        if timeout.is_exhausted(started_tick, started_at, ctx.tick, ctx.now) {
            return Some(TIMEOUT_REASON.to_string());
        }
    }
    if let Some(limit) = core.inactivity_ticks() {
        if remaining_quiet_ticks(core.last_progress_tick, ctx.tick, limit).is_none() {
            return Some(format!("stalled: no progress for {limit} ticks"));
        }
    }
    None
}

/// Fire the terminal hook of `task` if one is owed. A child still attached
/// to a terminal parent is cancelled first so its own hooks run before the
/// parent's.
///
/// An action still in flight is not cancelled; the gate is lowered and its
/// completion is dropped as stale when it arrives.
fn settle(task: &mut dyn Task, ctx: &mut TaskContext<'_>) {
    let Some(state) = task.core_mut().lifecycle.take_hook() else {
        return;
    };
    task.core_mut().gate.clear();

    if let Some(mut child) = task.core_mut().child.take() {
        child.core_mut().fail(format!("cancelled: parent {state}"));
        settle(child.as_mut(), ctx);
    }

    let hook = match state {
        TaskState::Completed => {
            info!(task = %task.id(), ticks = task.core().ticks(), "completed");
            task.on_complete(ctx)
        }
        TaskState::Failed => {
            let reason = task.failure_reason().unwrap_or_default().to_string();
            warn!(task = %task.id(), %reason, "failed");
            task.on_fail(ctx, &reason)
        }
        TaskState::Pending | TaskState::Running => Ok(()),
    };
    if let Err(err) = hook {
        warn!(task = %task.id(), error = %err, "terminal hook failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::Timeout;
    use crate::core::gate::ActionTicket;
    use crate::test_support::{Harness, ProbeMove, ProbeTask, ScriptedExecutor};

    #[test]
    fn first_execute_starts_and_runs_handler() {
        let mut harness = Harness::new();
        let mut task = ProbeTask::new("p").at(1, ProbeMove::Complete);
        let log = task.log();

        let state = harness.execute(&mut task);

        assert_eq!(state, TaskState::Completed);
        assert_eq!(log.borrow().starts, 1);
        assert_eq!(log.borrow().handler_ticks, vec![1]);
        assert_eq!(log.borrow().hooks, vec!["complete".to_string()]);
    }

    #[test]
    fn gated_task_stays_pending() {
        let mut harness = Harness::new();
        let mut task = ProbeTask::new("p").gated(true);
        assert_eq!(harness.execute(&mut task), TaskState::Pending);
        assert_eq!(task.log().borrow().starts, 0);
    }

    #[test]
    fn handler_error_fails_task_with_error_prefix() {
        let mut harness = Harness::new();
        let mut task = ProbeTask::new("p").at(1, ProbeMove::Error("widget missing"));
        harness.execute(&mut task);
        assert_eq!(task.failure_reason(), Some("error: widget missing"));
        assert_eq!(task.log().borrow().hooks, vec!["fail:error: widget missing"]);
    }

    #[test]
    fn timeout_skips_handler_and_fires_fail_hook_once() {
        let mut harness = Harness::new();
        let mut task = ProbeTask::new("p");
        task.core_mut().set_timeout(Some(Timeout::Ticks(2)));
        let log = task.log();

        harness.execute(&mut task);
        harness.execute(&mut task);
        let state = harness.execute(&mut task);
        harness.execute(&mut task);

        assert_eq!(state, TaskState::Failed);
        assert_eq!(task.failure_reason(), Some(TIMEOUT_REASON));
        assert_eq!(log.borrow().handler_ticks, vec![1, 2]);
        assert_eq!(log.borrow().hooks, vec!["fail:timeout".to_string()]);
    }

    #[test]
    fn inactivity_limit_fails_quiet_task() {
        let mut harness = Harness::new();
        let mut task = ProbeTask::new("p");
        task.core_mut().set_inactivity_ticks(Some(2));
        for _ in 0..4 {
            harness.execute(&mut task);
        }
        assert_eq!(
            task.failure_reason(),
            Some("stalled: no progress for 2 ticks")
        );
        assert_eq!(task.log().borrow().handler_ticks, vec![1, 2, 3]);
    }

    #[test]
    fn terminal_parent_cancels_child_before_own_hook() {
        let mut harness = Harness::new();
        let child = ProbeTask::new("child");
        let child_log = child.log();
        let mut parent = ProbeTask::new("parent").at(1, ProbeMove::delegate(child));
        parent.core_mut().set_timeout(Some(Timeout::Ticks(3)));

        for _ in 0..4 {
            harness.execute(&mut parent);
        }

        assert_eq!(parent.failure_reason(), Some(TIMEOUT_REASON));
        assert!(!parent.core().has_child());
        assert_eq!(
            child_log.borrow().hooks,
            vec!["fail:cancelled: parent failed".to_string()]
        );
    }

    #[test]
    fn deliver_drops_completion_for_previous_generation() {
        let mut harness = Harness::new();
        let mut task = ProbeTask::new("p").at(1, ProbeMove::issue_click("door"));
        harness.execute(&mut task);
        let old = task.core().gate().outstanding().expect("ticket");

        abort_task(&mut task, &mut harness.context(), "operator");
        task.reset().expect("reset");

        let delivery = harness.deliver(&mut task, old, Ok(Default::default()));
        assert_eq!(delivery, Delivery::Stale(Stale::Generation { current: 1 }));
        assert!(task.log().borrow().resolved.is_empty());
    }

    #[test]
    fn timeout_lowers_gate_and_late_completion_is_stale() {
        let mut harness = Harness::with_executor(ScriptedExecutor::new(10));
        let mut task = ProbeTask::new("p").at(1, ProbeMove::issue_click("door"));
        task.core_mut().set_timeout(Some(Timeout::Ticks(2)));
        harness.execute(&mut task);
        let ticket = task.core().gate().outstanding().expect("ticket");

        harness.execute(&mut task);
        assert_eq!(harness.execute(&mut task), TaskState::Failed);

        assert!(!task.core().is_pending());
        assert!(crate::core::invariants::check_tree(&task).is_empty());
        assert_eq!(
            harness.deliver(&mut task, ticket, Ok(Default::default())),
            Delivery::Stale(Stale::Terminal(TaskState::Failed))
        );
        assert!(task.log().borrow().resolved.is_empty());
    }

    #[test]
    fn deliver_reports_unknown_task() {
        let mut harness = Harness::new();
        let mut task = ProbeTask::new("p");
        let ticket = ActionTicket {
            task: crate::core::types::TaskId(u64::MAX),
            generation: 0,
            seq: 1,
        };
        assert_eq!(
            harness.deliver(&mut task, ticket, Ok(Default::default())),
            Delivery::Unknown
        );
    }
}
