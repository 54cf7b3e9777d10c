//! Turn declarative `TaskSpec` trees into live tasks.

use anyhow::{Result, anyhow};

use crate::action::ActionRequest;
use crate::core::budget::Timeout;
use crate::io::scenario::{SequenceModeSpec, TaskKind, TaskSpec, check_scenario_task};
use crate::task::{Task, TaskFactory};
use crate::workflows::interact::DEFAULT_CONFIRM_WITHIN;
use crate::workflows::quota::DEFAULT_CONFIRM_WITHIN as DEFAULT_YIELD_WITHIN;
use crate::workflows::{Branch, Candidates, Interact, Quota, Sequence, SequenceMode, WaitFor};

/// Check `spec` and build the root task.
pub fn build_root(spec: &TaskSpec) -> Result<Box<dyn Task>> {
    let errors = check_scenario_task(spec);
    if !errors.is_empty() {
        return Err(anyhow!("invalid task spec: {}", errors.join("; ")));
    }
    Ok(build_task(spec))
}

/// Factory producing a fresh instance of `spec` on every call.
pub fn factory(spec: &TaskSpec) -> TaskFactory {
    let spec = spec.clone();
    Box::new(move || build_task(&spec))
}

/// Build a task from an already checked spec.
pub fn build_task(spec: &TaskSpec) -> Box<dyn Task> {
    let mut task: Box<dyn Task> = match &spec.kind {
        TaskKind::Wait {
            label,
            until,
            ticks,
            unless,
            idle_drift,
        } => {
            let mut wait = match (until, ticks) {
                (Some(condition), _) => {
                    let label = label.clone().unwrap_or_else(|| condition.label());
                    WaitFor::until(label, condition.to_predicate())
                }
                (None, ticks) => WaitFor::for_ticks(ticks.unwrap_or(1)),
            };
            if let Some(unless) = unless {
                wait = wait.unless(unless.to_predicate());
            }
            Box::new(wait.idle_drift(*idle_drift))
        }
        TaskKind::Interact {
            verb,
            target,
            max_attempts,
            confirm,
            confirm_within,
        } => {
            let mut interact =
                Interact::new(ActionRequest::pointer(verb, target)).max_attempts(*max_attempts);
            if let Some(confirm) = confirm {
                interact = interact.confirm(
                    confirm.to_predicate(),
                    confirm_within.unwrap_or(DEFAULT_CONFIRM_WITHIN),
                );
            }
            Box::new(interact)
        }
        TaskKind::Sequence {
            label,
            steps,
            mode,
            max_iterations,
            until,
            on_failure,
        } => {
            let factories = steps.iter().map(factory).collect();
            let mode = match mode {
                SequenceModeSpec::Once => SequenceMode::Once,
                SequenceModeSpec::Loop => SequenceMode::Loop {
                    max_iterations: *max_iterations,
                    until: until.as_ref().map(|condition| condition.to_predicate()),
                },
            };
            Box::new(
                Sequence::new(label, factories)
                    .with_mode(mode)
                    .with_policy(*on_failure),
            )
        }
        TaskKind::Branch {
            label,
            when,
            then,
            otherwise,
        } => {
            let mut branch = Branch::new(label, when.to_predicate(), factory(then));
            if let Some(otherwise) = otherwise {
                branch = branch.otherwise(factory(otherwise));
            }
            Box::new(branch)
        }
        TaskKind::Quota {
            label,
            verb,
            units,
            candidates,
            candidates_list,
            yield_counter,
            confirm_within,
            select_wait,
            exclusion,
            restock_flag,
            restock,
        } => {
            let source = match (candidates, candidates_list) {
                (_, Some(list)) => Candidates::FromList(list.clone()),
                (items, None) => Candidates::Fixed(items.clone().unwrap_or_default()),
            };
            let mut quota = Quota::new(label, verb, source, *units);
            if let Some(counter) = yield_counter {
                quota = quota.confirm_by(counter, confirm_within.unwrap_or(DEFAULT_YIELD_WITHIN));
            }
            if let Some(ticks) = select_wait {
                quota = quota.select_wait(*ticks);
            }
            if let Some(policy) = exclusion {
                quota = quota.exclusion_policy(*policy);
            }
            if let (Some(flag), Some(restock)) = (restock_flag, restock) {
                quota = quota.restock_when(flag, factory(restock));
            }
            Box::new(quota)
        }
    };

    let core = task.core_mut();
    if let Some(ticks) = spec.timeout_ticks {
        core.set_timeout(Some(Timeout::Ticks(ticks)));
    }
    if let Some(secs) = spec.timeout_secs {
        core.set_timeout(Some(Timeout::from_secs(secs)));
    }
    if spec.inactivity_ticks.is_some() {
        core.set_inactivity_ticks(spec.inactivity_ticks);
    }
    if spec.max_retries.is_some() {
        core.set_max_retries(spec.max_retries);
    }
    task
}
