//! The task contract and the state every task embeds.
//!
//! A concrete task type keeps its own private phase enum and implements
//! [`Task::step`] as the dispatch over it. Everything that is the same for all
//! task types (lifecycle, timeout, the action gate, the delegated child) lives
//! in [`TaskCore`] and is driven by [`crate::step::execute_task`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{ActionExecutor, ActionRequest, ActionResult, CompletionSender};
use crate::core::budget::Timeout;
use crate::core::gate::{ActionGate, ActionTicket};
use crate::core::lifecycle::{Lifecycle, LifecycleError};
use crate::core::types::{Priority, TaskId, TaskState};
use crate::timing::Humanizer;
use crate::world::WorldView;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate the next process-unique id.
    pub fn allocate() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Everything a task may touch during one execute call.
pub struct TaskContext<'a> {
    pub tick: u64,
    pub now: Instant,
    pub world: &'a dyn WorldView,
    pub timing: &'a mut Humanizer,
    actions: &'a mut dyn ActionExecutor,
    reply: CompletionSender,
}

impl<'a> TaskContext<'a> {
    pub fn new(
        tick: u64,
        now: Instant,
        world: &'a dyn WorldView,
        timing: &'a mut Humanizer,
        actions: &'a mut dyn ActionExecutor,
        reply: CompletionSender,
    ) -> Self {
        Self {
            tick,
            now,
            world,
            timing,
            actions,
            reply,
        }
    }
}

/// Terminal outcome of a delegated child, handed to its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildReport {
    pub id: TaskId,
    pub state: TaskState,
    pub failure_reason: Option<String>,
    pub description: String,
    pub output: Option<Value>,
}

impl ChildReport {
    pub fn from_task(task: &dyn Task) -> Self {
        Self {
            id: task.id(),
            state: task.state(),
            failure_reason: task.failure_reason().map(str::to_string),
            description: task.description(),
            output: task.output(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Completed
    }

    /// Failure reason, or the state name when there is none.
    pub fn reason(&self) -> &str {
        self.failure_reason
            .as_deref()
            .unwrap_or_else(|| self.state.as_str())
    }
}

/// State shared by every task type.
pub struct TaskCore {
    id: TaskId,
    pub(crate) lifecycle: Lifecycle,
    timeout: Option<Timeout>,
    inactivity_ticks: Option<u64>,
    pub(crate) child: Option<Box<dyn Task>>,
    pub(crate) gate: ActionGate,
    pub(crate) ticks: u64,
    pub(crate) last_progress_tick: u64,
    max_retries: Option<u32>,
    priority: Priority,
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("state", &self.lifecycle.state())
            .field("timeout", &self.timeout)
            .field("child", &self.child.as_ref().map(|child| child.id()))
            .field("gate", &self.gate)
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl Default for TaskCore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskCore {
    pub fn new() -> Self {
        Self {
            id: TaskId::allocate(),
            lifecycle: Lifecycle::new(),
            timeout: None,
            inactivity_ticks: None,
            child: None,
            gate: ActionGate::default(),
            ticks: 0,
            last_progress_tick: 0,
            max_retries: None,
            priority: Priority::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.lifecycle.state()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.lifecycle.failure_reason()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn gate(&self) -> &ActionGate {
        &self.gate
    }

    pub fn is_pending(&self) -> bool {
        self.gate.is_pending()
    }

    pub fn child(&self) -> Option<&dyn Task> {
        self.child.as_deref()
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// Ticks executed in the current attempt.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn timeout(&self) -> Option<Timeout> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Timeout>) {
        self.timeout = timeout;
    }

    /// Ticks without progress after which the supervisor fails the task.
    pub fn inactivity_ticks(&self) -> Option<u64> {
        self.inactivity_ticks
    }

    pub fn set_inactivity_ticks(&mut self, limit: Option<u64>) {
        self.inactivity_ticks = limit.filter(|limit| *limit > 0);
    }

    /// Retry budget requested by the task; the scheduler default applies when unset.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn set_max_retries(&mut self, retries: Option<u32>) {
        self.max_retries = retries;
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// Decide `Completed`. A second decision is logged and ignored.
    pub fn complete(&mut self) -> bool {
        if self.lifecycle.complete() {
            debug!(task = %self.id, "running -> completed");
            return true;
        }
        warn!(
            task = %self.id,
            state = %self.state(),
            "ignoring complete on a task that is not running"
        );
        false
    }

    /// Decide `Failed`. A second decision is logged and ignored; the first
    /// reason is kept.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let from = self.state();
        if self.lifecycle.fail(reason.as_str()) {
            debug!(task = %self.id, %from, %reason, "-> failed");
            return true;
        }
        warn!(
            task = %self.id,
            state = %from,
            %reason,
            "ignoring fail on a terminal task"
        );
        false
    }

    /// Hand control to a freshly built child until it turns terminal.
    pub fn delegate(&mut self, child: Box<dyn Task>) -> Result<()> {
        if let Some(existing) = &self.child {
            bail!(
                "{} already delegates to {}; cannot delegate to {}",
                self.id,
                existing.id(),
                child.id()
            );
        }
        if child.id() == self.id {
            bail!("{} cannot delegate to itself", self.id);
        }
        debug!(task = %self.id, child = %child.id(), description = %child.description(), "delegate");
        self.child = Some(child);
        Ok(())
    }

    /// Send `request` to the executor. Fails when an action is already
    /// outstanding; the caller's `step` should propagate that error.
    pub fn issue_action(
        &mut self,
        ctx: &mut TaskContext<'_>,
        request: ActionRequest,
    ) -> Result<ActionTicket> {
        let ticket = self.gate.open(self.id, self.lifecycle.generation())?;
        debug!(%ticket, %request, tick = ctx.tick, "issue action");
        if let Err(err) = ctx.actions.submit(ticket, request, ctx.reply.clone()) {
            self.gate.clear();
            return Err(err).with_context(|| format!("submit action {ticket}"));
        }
        Ok(ticket)
    }

    pub(crate) fn mark_progress(&mut self, tick: u64) {
        self.last_progress_tick = tick;
    }

    /// Archive the terminal attempt and clear everything attempt-scoped.
    pub(crate) fn reset(&mut self) -> Result<(), LifecycleError> {
        self.lifecycle.reset(self.ticks)?;
        self.child = None;
        self.gate.clear();
        self.ticks = 0;
        self.last_progress_tick = 0;
        Ok(())
    }
}

/// Lifecycle contract of a task.
///
/// Hooks return `Result`; an `Err` from `step`, `on_start` or a continuation
/// fails the task with `"error: ..."`. Errors from `on_complete`/`on_fail`
/// are logged since the outcome is already decided.
pub trait Task {
    fn core(&self) -> &TaskCore;
    fn core_mut(&mut self) -> &mut TaskCore;

    /// Human-readable label for logs and reports.
    fn description(&self) -> String;

    /// Name of the current private phase.
    fn phase_name(&self) -> &'static str;

    /// Result value a parent may inspect after completion.
    fn output(&self) -> Option<Value> {
        None
    }

    /// Gate checked before the first execute. Must not have side effects.
    fn can_execute(&self, _ctx: &TaskContext<'_>) -> bool {
        true
    }

    fn on_start(&mut self, _ctx: &mut TaskContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Run the handler for the current phase.
    fn step(&mut self, ctx: &mut TaskContext<'_>) -> Result<()>;

    /// Runs instead of `step` while an action is outstanding. It may observe
    /// the world and decide the outcome but cannot issue another action.
    fn while_pending(&mut self, _ctx: &mut TaskContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Continuation for the outstanding action. The gate is already cleared.
    fn on_action_resolved(&mut self, _ctx: &mut TaskContext<'_>, result: ActionResult) -> Result<()> {
        if let Err(err) = result {
            self.core_mut().fail(format!("action failed: {err}"));
        }
        Ok(())
    }

    /// The delegated child turned terminal and has been detached.
    fn on_child_finished(&mut self, _ctx: &mut TaskContext<'_>, child: ChildReport) -> Result<()> {
        debug!(task = %self.id(), child = %child.id, state = %child.state, "child finished");
        Ok(())
    }

    /// Restore ephemeral fields for a new attempt. Cumulative counters stay.
    fn reset_attempt(&mut self) {}

    fn on_complete(&mut self, _ctx: &mut TaskContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_fail(&mut self, _ctx: &mut TaskContext<'_>, _reason: &str) -> Result<()> {
        Ok(())
    }

    fn id(&self) -> TaskId {
        self.core().id()
    }

    fn state(&self) -> TaskState {
        self.core().state()
    }

    fn failure_reason(&self) -> Option<&str> {
        self.core().failure_reason()
    }

    /// Start a new attempt. Only legal from a terminal state.
    fn reset(&mut self) -> Result<(), LifecycleError> {
        self.core_mut().reset()?;
        self.reset_attempt();
        debug!(task = %self.id(), generation = self.core().lifecycle().generation(), "reset");
        Ok(())
    }
}

/// Builds a fresh task instance each time a workflow needs one.
pub type TaskFactory = Box<dyn Fn() -> Box<dyn Task>>;
