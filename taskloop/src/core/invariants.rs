//! Structural invariants of a live task tree.

use std::collections::HashSet;

use crate::core::types::TaskState;
use crate::task::Task;

/// Check invariants the engine maintains between ticks:
/// - No duplicate ids in the delegation chain
/// - Terminal tasks own no child
/// - An action is outstanding only while running, and only for the current attempt
/// - A failure reason is present exactly when the task failed
pub fn check_tree(root: &dyn Task) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    check_task(root, &mut seen, &mut errors, &root.id().to_string());
    errors
}

fn check_task(
    task: &dyn Task,
    seen: &mut HashSet<u64>,
    errors: &mut Vec<String>,
    path: &str,
) {
    let core = task.core();
    let state = core.state();

    if !seen.insert(task.id().0) {
        errors.push(format!("duplicate task id {} at {}", task.id(), path));
        return;
    }

    if state.is_terminal() && core.has_child() {
        errors.push(format!("{}: {} task still owns a child", path, state));
    }

    if let Some(ticket) = core.gate().outstanding() {
        if state != TaskState::Running {
            errors.push(format!("{}: action {} pending while {}", path, ticket, state));
        }
        if ticket.generation != core.lifecycle().generation() {
            errors.push(format!(
                "{}: action {} belongs to generation {}, task is on {}",
                path,
                ticket,
                ticket.generation,
                core.lifecycle().generation()
            ));
        }
    }

    match (state, core.failure_reason()) {
        (TaskState::Failed, None) => errors.push(format!("{}: failed without a reason", path)),
        (TaskState::Failed, Some(_)) | (_, None) => {}
        (other, Some(reason)) => errors.push(format!(
            "{}: failure reason '{}' set while {}",
            path, reason, other
        )),
    }

    if let Some(child) = core.child() {
        let child_path = format!("{}/{}", path, child.id());
        check_task(child, seen, errors, &child_path);
    }
}

/// Check that observed states of one attempt follow
/// `Pending -> Running -> (Completed | Failed)`, allowing repeats and skipped
/// observations but never a step backwards or a change after a terminal state.
pub fn check_lifecycle_trace(trace: &[TaskState]) -> Result<(), String> {
    fn rank(state: TaskState) -> u8 {
        match state {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Completed | TaskState::Failed => 2,
        }
    }

    for pair in trace.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        if from.is_terminal() && from != to {
            return Err(format!("{} changed to {} without a reset", from, to));
        }
        if rank(to) < rank(from) {
            return Err(format!("{} went back to {}", from, to));
        }
    }
    Ok(())
}
