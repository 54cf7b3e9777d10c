//! Repeat a unit of work on candidates until a quota of units is reached.
//!
//! Each unit picks the first candidate not currently excluded, engages it
//! through one action and optionally confirms the unit by watching a yield
//! counter grow. Failing candidates are excluded for a while; a raised
//! restock flag interrupts the loop with a delegated restock workflow.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::action::{ActionRequest, ActionResult};
use crate::core::exclusion::{ExclusionPolicy, ExclusionSet};
use crate::core::wait::{PhaseState, WaitStatus};
use crate::task::{ChildReport, Task, TaskContext, TaskCore, TaskFactory};
use crate::world::WorldView;

/// Ticks `Select` may find nothing before escalating.
pub const DEFAULT_SELECT_WAIT: u32 = 10;
/// Ticks `Confirm` waits for the yield counter to grow.
pub const DEFAULT_CONFIRM_WITHIN: u32 = 5;
/// Consecutive restock failures that fail the quota.
pub const MAX_RESTOCK_FAILURES: u32 = 2;

/// Where the candidate list comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Candidates {
    Fixed(Vec<String>),
    /// Read the named world list every time a unit starts.
    FromList(String),
}

impl Candidates {
    fn resolve(&self, world: &dyn WorldView) -> Vec<String> {
        match self {
            Candidates::Fixed(items) => items.clone(),
            Candidates::FromList(key) => world.list(key),
        }
    }
}

struct Restock {
    flag: String,
    factory: TaskFactory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuotaPhase {
    Select,
    Engage,
    Engaging,
    Confirm,
    Restock,
}

pub struct Quota {
    core: TaskCore,
    label: String,
    verb: String,
    candidates: Candidates,
    target_units: u64,
    yield_counter: Option<String>,
    confirm_within: u32,
    restock: Option<Restock>,
    exclusions: ExclusionSet,
    select_wait: u32,
    phase: PhaseState<QuotaPhase>,
    selected: Option<String>,
    baseline: i64,
    restock_failures: u32,
    /// Across every attempt.
    units_completed: u64,
    engagements: u64,
}

impl Quota {
    pub fn new(
        label: impl Into<String>,
        verb: impl Into<String>,
        candidates: Candidates,
        target_units: u64,
    ) -> Self {
        Self {
            core: TaskCore::new(),
            label: label.into(),
            verb: verb.into(),
            candidates,
            target_units,
            yield_counter: None,
            confirm_within: DEFAULT_CONFIRM_WITHIN,
            restock: None,
            exclusions: ExclusionSet::new(ExclusionPolicy::default()),
            select_wait: DEFAULT_SELECT_WAIT,
            phase: PhaseState::new(QuotaPhase::Select, DEFAULT_SELECT_WAIT),
            selected: None,
            baseline: 0,
            restock_failures: 0,
            units_completed: 0,
            engagements: 0,
        }
    }

    /// Confirm each unit by `counter` growing within `within` ticks.
    pub fn confirm_by(mut self, counter: impl Into<String>, within: u32) -> Self {
        self.yield_counter = Some(counter.into());
        self.confirm_within = within;
        self
    }

    /// Run `factory` whenever `flag` is raised at the start of a unit.
    pub fn restock_when(mut self, flag: impl Into<String>, factory: TaskFactory) -> Self {
        self.restock = Some(Restock {
            flag: flag.into(),
            factory,
        });
        self
    }

    pub fn exclusion_policy(mut self, policy: ExclusionPolicy) -> Self {
        self.exclusions = ExclusionSet::new(policy);
        self
    }

    pub fn select_wait(mut self, ticks: u32) -> Self {
        self.select_wait = ticks;
        self.phase = PhaseState::new(QuotaPhase::Select, ticks);
        self
    }

    pub fn units_completed(&self) -> u64 {
        self.units_completed
    }

    pub fn engagements(&self) -> u64 {
        self.engagements
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    fn back_to_select(&mut self, tick: u64) {
        self.selected = None;
        self.phase
            .set_with_limit(QuotaPhase::Select, tick, self.select_wait);
    }

    fn finish_unit(&mut self, tick: u64) {
        self.units_completed += 1;
        if let Some(candidate) = &self.selected {
            self.exclusions.record_success(candidate);
        }
        debug!(label = %self.label, units = self.units_completed, "unit finished");
        self.back_to_select(tick);
    }

    fn unit_failed(&mut self, tick: u64, why: &str) {
        if let Some(candidate) = self.selected.clone() {
            if self.exclusions.record_failure(&candidate, tick) {
                info!(label = %self.label, %candidate, %why, "candidate excluded");
            } else {
                debug!(label = %self.label, %candidate, %why, "unit failed");
            }
        }
        self.back_to_select(tick);
    }

    fn select(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        if self.units_completed >= self.target_units {
            self.core.complete();
            return Ok(());
        }
        if let Some(restock) = &self.restock {
            if ctx.world.flag(&restock.flag) {
                info!(label = %self.label, flag = %restock.flag, "restocking");
                let child = (restock.factory)();
                self.core.delegate(child)?;
                self.phase.set(QuotaPhase::Restock, ctx.tick);
                return Ok(());
            }
        }

        let released = self.exclusions.sweep(ctx.tick);
        if released > 0 {
            debug!(label = %self.label, released, "exclusions expired");
        }
        let candidates = self.candidates.resolve(ctx.world);
        let chosen = self
            .exclusions
            .first_selectable(&candidates, ctx.tick)
            .map(str::to_string);
        match chosen {
            Some(candidate) => {
                self.selected = Some(candidate);
                self.phase.set(QuotaPhase::Engage, ctx.tick);
            }
            None => {
                if self.phase.wait_tick() == WaitStatus::Exceeded {
                    let cleared = self.exclusions.clear();
                    if cleared == 0 {
                        self.core.fail(format!(
                            "no selectable candidate for {} after {} ticks",
                            self.label,
                            self.phase.wait().limit()
                        ));
                    } else {
                        warn!(label = %self.label, cleared, "nothing selectable, clearing exclusions");
                        self.phase.progressed();
                    }
                }
            }
        }
        Ok(())
    }

    fn engage(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        let Some(candidate) = self.selected.clone() else {
            self.back_to_select(ctx.tick);
            return Ok(());
        };
        if let Some(counter) = &self.yield_counter {
            self.baseline = ctx.world.counter(counter);
        }
        self.core
            .issue_action(ctx, ActionRequest::pointer(self.verb.clone(), candidate))?;
        self.phase.set(QuotaPhase::Engaging, ctx.tick);
        Ok(())
    }

    fn confirm(&mut self, ctx: &mut TaskContext<'_>) {
        let grown = self
            .yield_counter
            .as_ref()
            .is_none_or(|counter| ctx.world.counter(counter) > self.baseline);
        if grown {
            self.finish_unit(ctx.tick);
        } else if self.phase.wait_tick() == WaitStatus::Exceeded {
            self.unit_failed(ctx.tick, "no yield");
        }
    }
}

impl Task for Quota {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn description(&self) -> String {
        format!(
            "quota {} {}/{}",
            self.label, self.units_completed, self.target_units
        )
    }

    fn phase_name(&self) -> &'static str {
        match self.phase.current() {
            QuotaPhase::Select => "select",
            QuotaPhase::Engage => "engage",
            QuotaPhase::Engaging => "engaging",
            QuotaPhase::Confirm => "confirm",
            QuotaPhase::Restock => "restock",
        }
    }

    fn output(&self) -> Option<Value> {
        Some(json!({
            "units_completed": self.units_completed,
            "target_units": self.target_units,
            "engagements": self.engagements,
            "excluded": self.exclusions.excluded_count(),
        }))
    }

    fn step(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        match self.phase.current() {
            QuotaPhase::Select => self.select(ctx)?,
            QuotaPhase::Engage => self.engage(ctx)?,
            // A resolved action always moves the phase on.
            QuotaPhase::Engaging => self.back_to_select(ctx.tick),
            QuotaPhase::Confirm => self.confirm(ctx),
            // The restock child runs until it settles.
            QuotaPhase::Restock => {}
        }
        Ok(())
    }

    fn on_action_resolved(&mut self, ctx: &mut TaskContext<'_>, result: ActionResult) -> Result<()> {
        self.engagements += 1;
        match result {
            Ok(_) if self.yield_counter.is_some() => {
                self.phase
                    .set_with_limit(QuotaPhase::Confirm, ctx.tick, self.confirm_within);
            }
            Ok(_) => self.finish_unit(ctx.tick),
            Err(err) => self.unit_failed(ctx.tick, &err.to_string()),
        }
        Ok(())
    }

    fn on_child_finished(&mut self, ctx: &mut TaskContext<'_>, child: ChildReport) -> Result<()> {
        if child.succeeded() {
            self.restock_failures = 0;
        } else {
            self.restock_failures += 1;
            warn!(label = %self.label, reason = child.reason(), failures = self.restock_failures, "restock failed");
            if self.restock_failures >= MAX_RESTOCK_FAILURES {
                self.core.fail(format!(
                    "restock failed {} times: {}",
                    self.restock_failures,
                    child.reason()
                ));
                return Ok(());
            }
        }
        self.back_to_select(ctx.tick);
        Ok(())
    }

    fn reset_attempt(&mut self) {
        self.phase = PhaseState::new(QuotaPhase::Select, self.select_wait);
        self.exclusions.clear();
        self.selected = None;
        self.baseline = 0;
        self.restock_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionError;
    use crate::core::types::TaskState;
    use crate::step::abort_task;
    use crate::test_support::{Harness, ProbeMove, ProbeTask, ScriptedExecutor};

    fn trees(names: &[&str]) -> Candidates {
        Candidates::Fixed(names.iter().map(|name| name.to_string()).collect())
    }

    #[test]
    fn completes_after_target_units() {
        let mut harness = Harness::new();
        let mut quota = Quota::new("chop", "chop", trees(&["oak_1"]), 2);

        let state = harness.run(&mut quota, 20);

        assert_eq!(state, TaskState::Completed);
        assert_eq!(quota.units_completed(), 2);
        assert_eq!(harness.executor.submitted().borrow().len(), 2);
        // select, engage, resolve + select, engage, resolve + complete.
        assert_eq!(harness.tick, 5);
    }

    #[test]
    fn failing_candidate_is_excluded_after_three_failures() {
        let executor = ScriptedExecutor::new(1).script([
            Err(ActionError::transient("moved")),
            Err(ActionError::transient("moved")),
            Err(ActionError::transient("moved")),
        ]);
        let mut harness = Harness::with_executor(executor);
        let mut quota = Quota::new("chop", "chop", trees(&["oak_1", "oak_2"]), 1);

        assert_eq!(harness.run(&mut quota, 20), TaskState::Completed);

        let submitted = harness.executor.submitted();
        let targets: Vec<String> = submitted
            .borrow()
            .iter()
            .filter_map(|entry| entry.request.target().map(str::to_string))
            .collect();
        assert_eq!(targets, vec!["oak_1", "oak_1", "oak_1", "oak_2"]);
        assert!(quota.exclusions().is_excluded("oak_1", harness.tick));
    }

    #[test]
    fn candidates_come_from_world_list() {
        let mut harness = Harness::new();
        harness.world.push("rocks", "iron_1");
        let mut quota = Quota::new("mine", "mine", Candidates::FromList("rocks".into()), 1);
        assert_eq!(harness.run(&mut quota, 10), TaskState::Completed);
        assert_eq!(
            harness.executor.submitted().borrow()[0].request,
            ActionRequest::pointer("mine", "iron_1")
        );
    }

    #[test]
    fn empty_candidates_fail_after_select_wait() {
        let mut harness = Harness::new();
        let mut quota = Quota::new("chop", "chop", trees(&[]), 1).select_wait(3);

        harness.run(&mut quota, 20);

        assert_eq!(
            quota.failure_reason(),
            Some("no selectable candidate for chop after 3 ticks")
        );
        assert_eq!(harness.tick, 4);
    }

    #[test]
    fn unit_needs_yield_counter_to_grow() {
        let mut harness = Harness::new();
        let mut quota = Quota::new("chop", "chop", trees(&["oak_1"]), 1).confirm_by("logs", 5);

        harness.execute(&mut quota);
        harness.execute(&mut quota);
        harness.execute(&mut quota);
        assert_eq!(quota.phase_name(), "confirm");
        harness.execute(&mut quota);
        assert_eq!(quota.units_completed(), 0);

        harness.world.add("logs", 1);
        harness.execute(&mut quota);
        assert_eq!(quota.units_completed(), 1);
        assert_eq!(harness.execute(&mut quota), TaskState::Completed);
    }

    #[test]
    fn restock_runs_before_next_unit() {
        let mut harness = Harness::new();
        harness.world.set_flag("inventory_full", true);
        let restock: TaskFactory = Box::new(|| {
            Box::new(ProbeTask::new("bank").at_any(ProbeMove::Complete)) as Box<dyn Task>
        });
        let mut quota =
            Quota::new("chop", "chop", trees(&["oak_1"]), 1).restock_when("inventory_full", restock);

        harness.execute(&mut quota);
        assert_eq!(quota.phase_name(), "restock");
        harness.world.set_flag("inventory_full", false);

        assert_eq!(harness.run(&mut quota, 10), TaskState::Completed);
        assert_eq!(quota.units_completed(), 1);
    }

    #[test]
    fn repeated_restock_failure_fails_quota() {
        let mut harness = Harness::new();
        harness.world.set_flag("inventory_full", true);
        let restock: TaskFactory = Box::new(|| {
            Box::new(ProbeTask::new("bank").at_any(ProbeMove::Fail("bank closed"))) as Box<dyn Task>
        });
        let mut quota =
            Quota::new("chop", "chop", trees(&["oak_1"]), 1).restock_when("inventory_full", restock);

        harness.run(&mut quota, 20);

        assert_eq!(
            quota.failure_reason(),
            Some("restock failed 2 times: bank closed")
        );
    }

    #[test]
    fn reset_keeps_units_and_clears_exclusions() {
        let executor = ScriptedExecutor::new(1).script([
            Ok(Default::default()),
            Err(ActionError::transient("moved")),
            Err(ActionError::transient("moved")),
            Err(ActionError::transient("moved")),
        ]);
        let mut harness = Harness::with_executor(executor);
        let mut quota = Quota::new("chop", "chop", trees(&["oak_1"]), 5)
            .select_wait(1)
            .exclusion_policy(ExclusionPolicy {
                threshold: 3,
                clear_interval: 100,
            });

        harness.run(&mut quota, 9);
        assert_eq!(quota.units_completed(), 1);
        assert_eq!(quota.exclusions().excluded_count(), 1);

        let mut ctx = harness.context();
        assert!(abort_task(&mut quota, &mut ctx, "operator"));
        quota.reset().expect("reset");
        assert_eq!(quota.units_completed(), 1);
        assert_eq!(quota.exclusions().excluded_count(), 0);
        assert_eq!(quota.phase_name(), "select");
    }
}
