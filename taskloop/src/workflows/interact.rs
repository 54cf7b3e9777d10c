//! A single input action with bounded retries and optional confirmation.

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::action::{ActionRequest, ActionResult};
use crate::core::wait::{PhaseState, WaitStatus};
use crate::task::{Task, TaskContext, TaskCore};
use crate::world::Predicate;

/// Ticks to wait for confirmation when none is configured.
pub const DEFAULT_CONFIRM_WITHIN: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InteractPhase {
    Act,
    Acting,
    Confirm,
}

/// Issues one action. Transient errors and missing confirmation count as
/// failed attempts and are retried on the next tick until `max_attempts`;
/// a rejected action fails the task at once.
pub struct Interact {
    core: TaskCore,
    request: ActionRequest,
    max_attempts: u32,
    confirm: Option<Predicate>,
    confirm_within: u32,
    phase: PhaseState<InteractPhase>,
    attempts: u32,
    /// Confirmed or accepted interactions across every attempt.
    interactions: u64,
}

impl Interact {
    pub fn new(request: ActionRequest) -> Self {
        Self {
            core: TaskCore::new(),
            request,
            max_attempts: 3,
            confirm: None,
            confirm_within: DEFAULT_CONFIRM_WITHIN,
            phase: PhaseState::new(InteractPhase::Act, 0),
            attempts: 0,
            interactions: 0,
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Require `condition` to hold within `within` ticks of a successful action.
    pub fn confirm(mut self, condition: Predicate, within: u32) -> Self {
        self.confirm = Some(condition);
        self.confirm_within = within;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interactions(&self) -> u64 {
        self.interactions
    }

    fn attempt_failed(&mut self, tick: u64, message: &str) {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            self.core.fail(format!(
                "{} failed after {} attempts: {}",
                self.request, self.attempts, message
            ));
            return;
        }
        info!(request = %self.request, attempt = self.attempts, %message, "retrying");
        self.phase.set(InteractPhase::Act, tick);
    }

    fn succeeded(&mut self) {
        self.interactions += 1;
        self.core.complete();
    }
}

impl Task for Interact {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn description(&self) -> String {
        format!("interact {}", self.request)
    }

    fn phase_name(&self) -> &'static str {
        match self.phase.current() {
            InteractPhase::Act => "act",
            InteractPhase::Acting => "acting",
            InteractPhase::Confirm => "confirm",
        }
    }

    fn output(&self) -> Option<Value> {
        Some(json!({
            "attempts": self.attempts,
            "interactions": self.interactions,
        }))
    }

    fn step(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        match self.phase.current() {
            InteractPhase::Act => {
                self.core.issue_action(ctx, self.request.clone())?;
                self.phase.set(InteractPhase::Acting, ctx.tick);
            }
            // Only reachable if a continuation never set the next phase.
            InteractPhase::Acting => {
                self.phase.set(InteractPhase::Act, ctx.tick);
            }
            InteractPhase::Confirm => {
                let confirmed = self
                    .confirm
                    .as_ref()
                    .is_none_or(|condition| condition(ctx.world));
                if confirmed {
                    debug!(request = %self.request, "confirmed");
                    self.succeeded();
                    return Ok(());
                }
                if self.phase.wait_tick() == WaitStatus::Exceeded {
                    let message = format!("not confirmed within {} ticks", self.confirm_within);
                    self.attempt_failed(ctx.tick, &message);
                }
            }
        }
        Ok(())
    }

    fn on_action_resolved(&mut self, ctx: &mut TaskContext<'_>, result: ActionResult) -> Result<()> {
        match result {
            Ok(_) if self.confirm.is_some() => {
                self.phase
                    .set_with_limit(InteractPhase::Confirm, ctx.tick, self.confirm_within);
            }
            Ok(_) => self.succeeded(),
            Err(err) if err.is_rejected() => {
                self.core
                    .fail(format!("{} rejected: {}", self.request, err.message));
            }
            Err(err) => self.attempt_failed(ctx.tick, &err.message),
        }
        Ok(())
    }

    fn reset_attempt(&mut self) {
        self.phase.reset();
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionError;
    use crate::core::types::TaskState;
    use crate::test_support::{Harness, ScriptedExecutor};
    use crate::world::predicate;

    fn click(target: &str) -> ActionRequest {
        ActionRequest::pointer("click", target)
    }

    #[test]
    fn success_without_confirmation_completes_in_continuation() {
        let mut harness = Harness::new();
        let mut interact = Interact::new(click("door"));
        harness.execute(&mut interact);
        assert_eq!(interact.phase_name(), "acting");
        harness.execute(&mut interact);
        assert_eq!(interact.state(), TaskState::Completed);
        assert_eq!(interact.interactions(), 1);
    }

    #[test]
    fn transient_errors_retry_until_max_attempts() {
        let executor = ScriptedExecutor::new(1).script([
            Err(ActionError::transient("misclick")),
            Err(ActionError::transient("misclick")),
        ]);
        let mut harness = Harness::with_executor(executor);
        let mut interact = Interact::new(click("door")).max_attempts(2);

        harness.run(&mut interact, 10);

        assert_eq!(
            interact.failure_reason(),
            Some("click door failed after 2 attempts: misclick")
        );
        assert_eq!(harness.executor.submitted().borrow().len(), 2);
    }

    #[test]
    fn rejected_error_fails_immediately() {
        let executor = ScriptedExecutor::new(1).script([Err(ActionError::rejected("no door"))]);
        let mut harness = Harness::with_executor(executor);
        let mut interact = Interact::new(click("door"));
        harness.run(&mut interact, 10);
        assert_eq!(interact.failure_reason(), Some("click door rejected: no door"));
        assert_eq!(harness.executor.submitted().borrow().len(), 1);
    }

    #[test]
    fn missing_confirmation_counts_as_failed_attempt() {
        let mut harness = Harness::new();
        let mut interact = Interact::new(click("door"))
            .max_attempts(1)
            .confirm(predicate(|world| world.flag("door_open")), 2);

        harness.run(&mut interact, 20);

        assert_eq!(
            interact.failure_reason(),
            Some("click door failed after 1 attempts: not confirmed within 2 ticks")
        );
    }

    #[test]
    fn confirmation_completes_task() {
        let mut harness = Harness::new();
        let mut interact = Interact::new(click("door"))
            .confirm(predicate(|world| world.flag("door_open")), 5);
        harness.execute(&mut interact);
        harness.execute(&mut interact);
        assert_eq!(interact.phase_name(), "confirm");
        harness.world.set_flag("door_open", true);
        assert_eq!(harness.execute(&mut interact), TaskState::Completed);
    }
}
