//! Pick one of two sub-workflows based on the world at start.

use anyhow::Result;
use serde_json::{Value, json};

use crate::task::{ChildReport, Task, TaskContext, TaskCore, TaskFactory};
use crate::world::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchPhase {
    Decide,
    Running,
}

/// Evaluates its condition once, on the first tick, then delegates to the
/// chosen branch and mirrors its outcome. No matching branch completes.
pub struct Branch {
    core: TaskCore,
    label: String,
    condition: Predicate,
    then: TaskFactory,
    otherwise: Option<TaskFactory>,
    phase: BranchPhase,
    taken: Option<bool>,
    child_output: Option<Value>,
}

impl Branch {
    pub fn new(label: impl Into<String>, condition: Predicate, then: TaskFactory) -> Self {
        Self {
            core: TaskCore::new(),
            label: label.into(),
            condition,
            then,
            otherwise: None,
            phase: BranchPhase::Decide,
            taken: None,
            child_output: None,
        }
    }

    pub fn otherwise(mut self, otherwise: TaskFactory) -> Self {
        self.otherwise = Some(otherwise);
        self
    }

    fn branch_name(&self) -> Option<&'static str> {
        self.taken.map(|taken| if taken { "then" } else { "else" })
    }
}

impl Task for Branch {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn description(&self) -> String {
        format!("branch {}", self.label)
    }

    fn phase_name(&self) -> &'static str {
        match self.phase {
            BranchPhase::Decide => "decide",
            BranchPhase::Running => "running",
        }
    }

    fn output(&self) -> Option<Value> {
        Some(json!({
            "branch": self.branch_name(),
            "child": self.child_output,
        }))
    }

    fn step(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        if self.phase == BranchPhase::Running {
            return Ok(());
        }
        let taken = (self.condition)(ctx.world);
        self.taken = Some(taken);
        let factory = if taken {
            Some(&self.then)
        } else {
            self.otherwise.as_ref()
        };
        match factory {
            Some(factory) => {
                self.core.delegate(factory())?;
                self.phase = BranchPhase::Running;
            }
            None => {
                self.core.complete();
            }
        }
        Ok(())
    }

    fn on_child_finished(&mut self, _ctx: &mut TaskContext<'_>, child: ChildReport) -> Result<()> {
        self.child_output = child.output.clone();
        if child.succeeded() {
            self.core.complete();
        } else {
            let branch = self.branch_name().unwrap_or("then");
            self.core
                .fail(format!("{branch} branch failed: {}", child.reason()));
        }
        Ok(())
    }

    fn reset_attempt(&mut self) {
        self.phase = BranchPhase::Decide;
        self.taken = None;
        self.child_output = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskState;
    use crate::test_support::{Harness, ProbeMove, ProbeTask};
    use crate::workflows::wait::WaitFor;
    use crate::world::predicate;

    fn short_wait() -> TaskFactory {
        Box::new(|| Box::new(WaitFor::for_ticks(1).idle_drift(false)) as Box<dyn Task>)
    }

    #[test]
    fn takes_then_branch_when_condition_holds() {
        let mut harness = Harness::new();
        harness.world.set_flag("has_axe", true);
        let mut branch = Branch::new("axe", predicate(|world| world.flag("has_axe")), short_wait());
        assert_eq!(harness.run(&mut branch, 5), TaskState::Completed);
        assert_eq!(branch.output().expect("output")["branch"], "then");
    }

    #[test]
    fn missing_else_branch_completes_immediately() {
        let mut harness = Harness::new();
        let mut branch = Branch::new("axe", predicate(|world| world.flag("has_axe")), short_wait());
        assert_eq!(harness.execute(&mut branch), TaskState::Completed);
        assert_eq!(branch.output().expect("output")["branch"], "else");
    }

    #[test]
    fn condition_is_not_reevaluated_after_start() {
        let mut harness = Harness::new();
        let fail = Box::new(|| {
            Box::new(ProbeTask::new("fetch").at_any(ProbeMove::Fail("no bank"))) as Box<dyn Task>
        });
        let mut branch = Branch::new("axe", predicate(|world| world.flag("has_axe")), short_wait())
            .otherwise(fail);

        harness.execute(&mut branch);
        harness.world.set_flag("has_axe", true);
        harness.run(&mut branch, 5);

        assert_eq!(branch.failure_reason(), Some("else branch failed: no bank"));
    }
}
