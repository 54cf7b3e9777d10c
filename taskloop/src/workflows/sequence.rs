//! Run child tasks one after another, optionally in a loop.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::core::wait::PhaseState;
use crate::task::{ChildReport, Task, TaskContext, TaskCore, TaskFactory};
use crate::world::{Predicate, WorldView};

/// How a failed step affects the sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the whole sequence.
    #[default]
    FailFast,
    /// Move on to the next step.
    Skip,
    /// Rebuild and rerun the step up to `max` more times, then fail.
    Retry { max: u32 },
}

pub enum SequenceMode {
    Once,
    /// Repeat the steps until `until` holds at the start of a pass or
    /// `max_iterations` passes completed. At least one bound must be set.
    Loop {
        max_iterations: Option<u32>,
        until: Option<Predicate>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequencePhase {
    Next,
    Running,
}

/// Ordered steps built from factories, so every run gets a fresh child.
pub struct Sequence {
    core: TaskCore,
    label: String,
    steps: Vec<TaskFactory>,
    mode: SequenceMode,
    policy: FailurePolicy,
    phase: PhaseState<SequencePhase>,
    index: usize,
    step_retries: u32,
    iteration: u32,
    steps_completed: u64,
    steps_skipped: u64,
}

impl Sequence {
    pub fn new(label: impl Into<String>, steps: Vec<TaskFactory>) -> Self {
        Self {
            core: TaskCore::new(),
            label: label.into(),
            steps,
            mode: SequenceMode::Once,
            policy: FailurePolicy::default(),
            phase: PhaseState::new(SequencePhase::Next, 0),
            index: 0,
            step_retries: 0,
            iteration: 0,
            steps_completed: 0,
            steps_skipped: 0,
        }
    }

    pub fn with_mode(mut self, mode: SequenceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Completed passes in the current attempt.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Steps completed across every attempt.
    pub fn steps_completed(&self) -> u64 {
        self.steps_completed
    }

    fn should_stop(&self, world: &dyn WorldView) -> bool {
        match &self.mode {
            SequenceMode::Once => self.iteration >= 1,
            SequenceMode::Loop {
                max_iterations,
                until,
            } => {
                max_iterations.is_some_and(|max| self.iteration >= max)
                    || until.as_ref().is_some_and(|until| until(world))
            }
        }
    }

    fn advance(&mut self, tick: u64) {
        self.index += 1;
        self.step_retries = 0;
        if self.index >= self.steps.len() {
            self.index = 0;
            self.iteration += 1;
            debug!(label = %self.label, iteration = self.iteration, "pass finished");
        }
        self.phase.set(SequencePhase::Next, tick);
    }

    fn step_failed(&mut self, tick: u64, child: &ChildReport) {
        let position = self.index + 1;
        match self.policy {
            FailurePolicy::FailFast => {
                self.core.fail(format!(
                    "step {position} ({}) failed: {}",
                    child.description,
                    child.reason()
                ));
            }
            FailurePolicy::Skip => {
                info!(step = position, reason = child.reason(), "skipping failed step");
                self.steps_skipped += 1;
                self.advance(tick);
            }
            FailurePolicy::Retry { max } if self.step_retries < max => {
                self.step_retries += 1;
                info!(step = position, retry = self.step_retries, "retrying failed step");
                self.phase.set(SequencePhase::Next, tick);
            }
            FailurePolicy::Retry { max } => {
                self.core.fail(format!(
                    "step {position} ({}) failed after {max} retries: {}",
                    child.description,
                    child.reason()
                ));
            }
        }
    }
}

impl Task for Sequence {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn description(&self) -> String {
        format!("sequence {}", self.label)
    }

    fn phase_name(&self) -> &'static str {
        match self.phase.current() {
            SequencePhase::Next => "next",
            SequencePhase::Running => "running",
        }
    }

    fn output(&self) -> Option<Value> {
        Some(json!({
            "iterations": self.iteration,
            "steps_completed": self.steps_completed,
            "steps_skipped": self.steps_skipped,
        }))
    }

    fn step(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        match self.phase.current() {
            SequencePhase::Next => {
                if self.steps.is_empty() || (self.index == 0 && self.should_stop(ctx.world)) {
                    self.core.complete();
                    return Ok(());
                }
                let child = (self.steps[self.index])();
                self.core.delegate(child)?;
                self.phase.set(SequencePhase::Running, ctx.tick);
            }
            // Control stays with the child until it turns terminal.
            SequencePhase::Running => {}
        }
        Ok(())
    }

    fn on_child_finished(&mut self, ctx: &mut TaskContext<'_>, child: ChildReport) -> Result<()> {
        if child.succeeded() {
            self.steps_completed += 1;
            self.advance(ctx.tick);
        } else {
            self.step_failed(ctx.tick, &child);
        }
        Ok(())
    }

    fn reset_attempt(&mut self) {
        self.phase.reset();
        self.index = 0;
        self.step_retries = 0;
        self.iteration = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskState;
    use crate::test_support::{Harness, ProbeMove, ProbeTask};
    use crate::workflows::wait::WaitFor;
    use crate::world::predicate;

    fn ticks_step(ticks: u64) -> TaskFactory {
        Box::new(move || Box::new(WaitFor::for_ticks(ticks).idle_drift(false)) as Box<dyn Task>)
    }

    fn failing_step() -> TaskFactory {
        Box::new(|| Box::new(ProbeTask::new("bad").at_any(ProbeMove::Fail("nope"))) as Box<dyn Task>)
    }

    #[test]
    fn once_runs_each_step_then_completes() {
        let mut harness = Harness::new();
        let mut sequence = Sequence::new("two", vec![ticks_step(1), ticks_step(2)]);

        let state = harness.run(&mut sequence, 20);

        assert_eq!(state, TaskState::Completed);
        assert_eq!(sequence.steps_completed(), 2);
        assert_eq!(sequence.iteration(), 1);
        // delegate, child 1, delegate, child 2 (two ticks), then complete.
        assert_eq!(harness.tick, 6);
    }

    #[test]
    fn fail_fast_reports_step_position() {
        let mut harness = Harness::new();
        let mut sequence = Sequence::new("s", vec![ticks_step(1), failing_step()]);
        harness.run(&mut sequence, 20);
        assert_eq!(
            sequence.failure_reason(),
            Some("step 2 (probe bad) failed: nope")
        );
    }

    #[test]
    fn skip_policy_moves_past_failures() {
        let mut harness = Harness::new();
        let mut sequence = Sequence::new("s", vec![failing_step(), ticks_step(1)])
            .with_policy(FailurePolicy::Skip);
        assert_eq!(harness.run(&mut sequence, 20), TaskState::Completed);
        assert_eq!(sequence.steps_completed(), 1);
    }

    #[test]
    fn retry_policy_rebuilds_step_then_gives_up() {
        let mut harness = Harness::new();
        let mut sequence = Sequence::new("s", vec![failing_step()])
            .with_policy(FailurePolicy::Retry { max: 2 });
        harness.run(&mut sequence, 30);
        assert_eq!(
            sequence.failure_reason(),
            Some("step 1 (probe bad) failed after 2 retries: nope")
        );
    }

    #[test]
    fn loop_stops_at_max_iterations() {
        let mut harness = Harness::new();
        let mut sequence = Sequence::new("l", vec![ticks_step(1)]).with_mode(SequenceMode::Loop {
            max_iterations: Some(3),
            until: None,
        });
        assert_eq!(harness.run(&mut sequence, 50), TaskState::Completed);
        assert_eq!(sequence.iteration(), 3);
        assert_eq!(sequence.steps_completed(), 3);
    }

    #[test]
    fn loop_checks_until_before_each_pass() {
        let mut harness = Harness::new();
        harness.world.set_flag("full", true);
        let mut sequence = Sequence::new("l", vec![ticks_step(1)]).with_mode(SequenceMode::Loop {
            max_iterations: None,
            until: Some(predicate(|world| world.flag("full"))),
        });
        assert_eq!(harness.execute(&mut sequence), TaskState::Completed);
        assert_eq!(sequence.steps_completed(), 0);
    }
}
