//! Wait until a world condition holds.

use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::action::{ActionRequest, ActionResult};
use crate::core::budget::Timeout;
use crate::task::{Task, TaskContext, TaskCore};
use crate::world::Predicate;

/// Default overall budget for a wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

const DRIFT_INTERVAL_TICKS: (u64, u64) = (5, 15);
const DRIFT_CHANCE: f64 = 0.6;
const DRIFT_RADIUS: i32 = 40;

enum Until {
    Condition(Predicate),
    Ticks(u64),
}

/// Waits for a condition, counting one wait tick per execute.
///
/// Checks run in this order every tick: early-exit condition (fails the
/// task), completion condition, then optional idle pointer drift. Drift goes
/// through the action gate but is irrelevant to completion: while it is in
/// flight the conditions are still checked.
pub struct WaitFor {
    core: TaskCore,
    label: String,
    until: Until,
    unless: Option<Predicate>,
    idle_drift: bool,
    wait_ticks: u64,
    next_drift_tick: Option<u64>,
    /// Condition evaluations across every attempt.
    evaluations: u64,
}

impl WaitFor {
    /// Complete once `condition` holds.
    pub fn until(label: impl Into<String>, condition: Predicate) -> Self {
        Self::with(label.into(), Until::Condition(condition))
    }

    /// Complete after `ticks` executes.
    pub fn for_ticks(ticks: u64) -> Self {
        Self::with(format!("{ticks} ticks"), Until::Ticks(ticks))
    }

    fn with(label: String, until: Until) -> Self {
        Self {
            core: TaskCore::new().with_timeout(Timeout::Wall(DEFAULT_WAIT_TIMEOUT)),
            label,
            until,
            unless: None,
            idle_drift: true,
            wait_ticks: 0,
            next_drift_tick: None,
            evaluations: 0,
        }
    }

    /// Fail early when `condition` holds.
    pub fn unless(mut self, condition: Predicate) -> Self {
        self.unless = Some(condition);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Timeout>) -> Self {
        self.core.set_timeout(timeout);
        self
    }

    pub fn idle_drift(mut self, enabled: bool) -> Self {
        self.idle_drift = enabled;
        self
    }

    pub fn wait_ticks(&self) -> u64 {
        self.wait_ticks
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Shared by `step` and `while_pending`. Returns true once decided.
    fn check(&mut self, ctx: &mut TaskContext<'_>) -> bool {
        self.wait_ticks += 1;
        if let Some(unless) = &self.unless {
            if unless(ctx.world) {
                self.core.fail(format!("early exit while waiting for {}", self.label));
                return true;
            }
        }
        let done = match &self.until {
            Until::Condition(condition) => {
                self.evaluations += 1;
                condition(ctx.world)
            }
            Until::Ticks(ticks) => self.wait_ticks >= *ticks,
        };
        if done {
            debug!(label = %self.label, wait_ticks = self.wait_ticks, "wait satisfied");
            self.core.complete();
            return true;
        }
        trace!(label = %self.label, wait_ticks = self.wait_ticks, "still waiting");
        false
    }

    fn maybe_drift(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        if !self.idle_drift {
            return Ok(());
        }
        let (low, high) = DRIFT_INTERVAL_TICKS;
        let due = *self
            .next_drift_tick
            .get_or_insert_with(|| ctx.tick + ctx.timing.uniform(low..=high));
        if ctx.tick < due {
            return Ok(());
        }
        self.next_drift_tick = Some(ctx.tick + ctx.timing.uniform(low..=high));
        if ctx.timing.chance(DRIFT_CHANCE) {
            let request = ActionRequest::Drift {
                dx: ctx.timing.offset(DRIFT_RADIUS),
                dy: ctx.timing.offset(DRIFT_RADIUS),
            };
            self.core.issue_action(ctx, request)?;
        }
        Ok(())
    }
}

impl Task for WaitFor {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn description(&self) -> String {
        format!("wait for {}", self.label)
    }

    fn phase_name(&self) -> &'static str {
        "waiting"
    }

    fn output(&self) -> Option<Value> {
        Some(json!({ "wait_ticks": self.wait_ticks }))
    }

    fn step(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        if self.check(ctx) {
            return Ok(());
        }
        self.maybe_drift(ctx)
    }

    fn while_pending(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        self.check(ctx);
        Ok(())
    }

    /// Drift failures do not matter.
    fn on_action_resolved(&mut self, _ctx: &mut TaskContext<'_>, result: ActionResult) -> Result<()> {
        if let Err(err) = result {
            debug!(error = %err, "idle drift failed");
        }
        Ok(())
    }

    fn reset_attempt(&mut self) {
        self.wait_ticks = 0;
        self.next_drift_tick = None;
    }
}
