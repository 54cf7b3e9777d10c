//! Cooperative tick driver for top-level tasks.
//!
//! Exactly one top-level task is active at a time. Each tick the scheduler
//! lets the executor release due results, applies completions, picks the next
//! queued task when idle, and executes the active one once. Failed tasks are
//! reset and retried with exponential backoff until their retry budget runs
//! out.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::action::{ActionCompletion, ActionExecutor, CompletionSender, completion_channel};
use crate::core::budget::backoff_ticks;
use crate::core::gate::ActionTicket;
use crate::core::invariants::check_tree;
use crate::core::selector::active_path;
use crate::core::types::{Priority, TaskId, TaskState};
use crate::step::{Delivery, abort_task, deliver, execute_task};
use crate::task::{Task, TaskContext};
use crate::timing::Humanizer;
use crate::world::{WorldSource, WorldView};

/// Scheduler tunables, usually derived from `EngineConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub max_retries_default: u32,
    /// Base backoff; doubled for every further retry of the same task.
    pub retry_backoff_ticks: u64,
    /// Applied to tasks that set no inactivity limit themselves. 0 disables.
    pub inactivity_ticks: u64,
    pub queue_limit: usize,
    pub check_invariants: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_retries_default: 3,
            retry_backoff_ticks: 2,
            inactivity_ticks: 0,
            queue_limit: 1_000,
            check_invariants: true,
        }
    }
}

/// Returned by `submit` when the queue is at its limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFullError {
    pub limit: usize,
    pub rejected: TaskId,
}

impl fmt::Display for QueueFullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task queue is full ({} queued); rejected {}",
            self.limit, self.rejected
        )
    }
}

impl Error for QueueFullError {}

/// Notable things that happened during one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    Started {
        task: TaskId,
        description: String,
        attempt: u32,
    },
    /// `can_execute` refused to let a pending task start.
    Gated { task: TaskId },
    Completed { task: TaskId, ticks: u64 },
    Failed {
        task: TaskId,
        reason: String,
        will_retry: bool,
    },
    RetryScheduled {
        task: TaskId,
        retry: u32,
        resume_at: u64,
    },
    StaleCompletion { ticket: ActionTicket, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    /// Labels from the active top-level task down to the leaf in control.
    pub active_path: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SchedulerEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

/// Final record of one top-level task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task: TaskId,
    pub description: String,
    pub state: TaskState,
    pub failure_reason: Option<String>,
    pub attempts: u32,
    /// Ticks executed by the final attempt.
    pub ticks: u64,
    pub finished_tick: u64,
    pub output: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every submitted task completed.
    Completed,
    /// At least one task failed after exhausting its retries.
    Failed,
    /// The tick budget ran out with work remaining.
    Exhausted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub ticks: u64,
    pub outcomes: Vec<TaskOutcome>,
    pub stale_completions: u64,
    pub violations: Vec<String>,
}

/// Supplies a task when the queue runs dry.
pub type IdleSupplier = Box<dyn FnMut(u64) -> Option<Box<dyn Task>>>;

struct Queued {
    priority: Priority,
    seq: u64,
    task: Box<dyn Task>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        (self.priority, self.seq) == (other.priority, other.seq)
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `BinaryHeap` pops the greatest element; urgent and older entries rank higher.
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Active {
    task: Box<dyn Task>,
    retries: u32,
    max_retries: u32,
    resume_at: Option<u64>,
    announced: bool,
}

pub struct Scheduler {
    settings: SchedulerSettings,
    executor: Box<dyn ActionExecutor>,
    timing: Humanizer,
    reply: CompletionSender,
    completions: Receiver<ActionCompletion>,
    queue: BinaryHeap<Queued>,
    next_seq: u64,
    current: Option<Active>,
    idle_supplier: Option<IdleSupplier>,
    tick: u64,
    outcomes: Vec<TaskOutcome>,
    stale_completions: u64,
    violations: Vec<String>,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        executor: Box<dyn ActionExecutor>,
        timing: Humanizer,
    ) -> Self {
        let (reply, completions) = completion_channel();
        Self {
            settings,
            executor,
            timing,
            reply,
            completions,
            queue: BinaryHeap::new(),
            next_seq: 0,
            current: None,
            idle_supplier: None,
            tick: 0,
            outcomes: Vec::new(),
            stale_completions: 0,
            violations: Vec::new(),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn current(&self) -> Option<&dyn Task> {
        self.current.as_ref().map(|active| active.task.as_ref())
    }

    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    /// No active task and nothing queued.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    pub fn set_idle_supplier(&mut self, supplier: IdleSupplier) {
        self.idle_supplier = Some(supplier);
    }

    /// Queue a top-level task.
    pub fn submit(&mut self, mut task: Box<dyn Task>, priority: Priority) -> Result<TaskId> {
        let id = task.id();
        if self.queue.len() >= self.settings.queue_limit {
            return Err(QueueFullError {
                limit: self.settings.queue_limit,
                rejected: id,
            }
            .into());
        }
        let core = task.core_mut();
        core.set_priority(priority);
        if core.inactivity_ticks().is_none() && self.settings.inactivity_ticks > 0 {
            core.set_inactivity_ticks(Some(self.settings.inactivity_ticks));
        }
        self.next_seq += 1;
        debug!(task = %id, ?priority, description = %task.description(), "queued");
        self.queue.push(Queued {
            priority,
            seq: self.next_seq,
            task,
        });
        Ok(id)
    }

    /// Drop every queued task that has not started. Returns how many.
    pub fn clear_queue(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// Fail the active task with `"aborted: <reason>"` without retrying it.
    pub fn abort_current(&mut self, world: &dyn WorldView, reason: &str) -> bool {
        let Some(mut active) = self.current.take() else {
            return false;
        };
        let mut ctx = TaskContext::new(
            self.tick,
            Instant::now(),
            world,
            &mut self.timing,
            self.executor.as_mut(),
            self.reply.clone(),
        );
        let aborted = abort_task(active.task.as_mut(), &mut ctx, reason);
        self.record(active);
        aborted
    }

    /// Run one tick against the given snapshot.
    #[instrument(skip_all, fields(tick = self.tick + 1))]
    pub fn tick(&mut self, world: &dyn WorldView) -> TickReport {
        self.tick += 1;
        let tick = self.tick;
        let now = Instant::now();
        let mut events = Vec::new();

        self.executor.on_tick(tick);
        let completions: Vec<ActionCompletion> = self.completions.try_iter().collect();
        for completion in completions {
            self.route(completion, world, now, &mut events);
        }

        if self.current.is_none() {
            self.current = self.next_active(tick);
        }

        if let Some(active) = self.current.as_mut() {
            let ready = active.resume_at.is_none_or(|at| tick >= at);
            if ready {
                active.resume_at = None;
                let mut ctx = TaskContext::new(
                    tick,
                    now,
                    world,
                    &mut self.timing,
                    self.executor.as_mut(),
                    self.reply.clone(),
                );
                let task = active.task.as_mut();
                let was_pending = task.state() == TaskState::Pending;
                let state = execute_task(task, &mut ctx);
                if was_pending && state == TaskState::Pending {
                    events.push(SchedulerEvent::Gated { task: task.id() });
                } else if !active.announced {
                    active.announced = true;
                    events.push(SchedulerEvent::Started {
                        task: task.id(),
                        description: task.description(),
                        attempt: active.retries + 1,
                    });
                }
            }
        }

        let active_path = self
            .current
            .as_ref()
            .map(|active| active_path(active.task.as_ref()))
            .unwrap_or_default();
        let violations = self.check();
        self.finish_if_terminal(tick, &mut events);

        TickReport {
            tick,
            active_path,
            events,
            violations,
        }
    }

    /// Tick until idle or `max_ticks` more ticks have run, advancing `source`
    /// before every tick.
    pub fn run<F>(
        &mut self,
        source: &mut dyn WorldSource,
        max_ticks: u64,
        mut on_tick: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(&TickReport) -> Result<()>,
    {
        let first_tick = self.tick;
        let mut exhausted = false;
        while !self.is_idle() || self.idle_supplier.is_some() {
            if self.tick - first_tick >= max_ticks {
                exhausted = true;
                break;
            }
            source.advance(self.tick + 1)?;
            let report = self.tick(source.view());
            on_tick(&report)?;
        }
        if exhausted {
            info!(ticks = self.tick - first_tick, "tick budget exhausted");
        }
        Ok(self.summary(exhausted))
    }

    pub fn summary(&self, exhausted: bool) -> RunSummary {
        let status = if exhausted && !self.is_idle() {
            RunStatus::Exhausted
        } else if self
            .outcomes
            .iter()
            .any(|outcome| outcome.state == TaskState::Failed)
        {
            RunStatus::Failed
        } else if exhausted {
            RunStatus::Exhausted
        } else {
            RunStatus::Completed
        };
        RunSummary {
            status,
            ticks: self.tick,
            outcomes: self.outcomes.clone(),
            stale_completions: self.stale_completions,
            violations: self.violations.clone(),
        }
    }

    fn route(
        &mut self,
        completion: ActionCompletion,
        world: &dyn WorldView,
        now: Instant,
        events: &mut Vec<SchedulerEvent>,
    ) {
        let ticket = completion.ticket;
        let delivery = match self.current.as_mut() {
            Some(active) => {
                let mut ctx = TaskContext::new(
                    self.tick,
                    now,
                    world,
                    &mut self.timing,
                    self.executor.as_mut(),
                    self.reply.clone(),
                );
                deliver(active.task.as_mut(), completion, &mut ctx)
            }
            None => Delivery::Unknown,
        };
        let reason = match delivery {
            Delivery::Applied => return,
            Delivery::Stale(stale) => stale.to_string(),
            Delivery::Unknown => {
                warn!(%ticket, "dropping completion for a task that is no longer live");
                "owner is no longer live".to_string()
            }
        };
        self.stale_completions += 1;
        events.push(SchedulerEvent::StaleCompletion { ticket, reason });
    }

    fn next_active(&mut self, tick: u64) -> Option<Active> {
        let task = match self.queue.pop() {
            Some(queued) => queued.task,
            None => {
                let supplier = self.idle_supplier.as_mut()?;
                let task = supplier(tick)?;
                debug!(task = %task.id(), "idle supplier provided a task");
                task
            }
        };
        let max_retries = task
            .core()
            .max_retries()
            .unwrap_or(self.settings.max_retries_default);
        Some(Active {
            task,
            retries: 0,
            max_retries,
            resume_at: None,
            announced: false,
        })
    }

    fn finish_if_terminal(&mut self, tick: u64, events: &mut Vec<SchedulerEvent>) {
        let Some(active) = self.current.as_mut() else {
            return;
        };
        let task_id = active.task.id();
        match active.task.state() {
            TaskState::Completed => {
                events.push(SchedulerEvent::Completed {
                    task: task_id,
                    ticks: active.task.core().ticks(),
                });
            }
            TaskState::Failed => {
                let reason = active.task.failure_reason().unwrap_or_default().to_string();
                let will_retry = active.retries < active.max_retries;
                events.push(SchedulerEvent::Failed {
                    task: task_id,
                    reason,
                    will_retry,
                });
                if will_retry {
                    match active.task.reset() {
                        Ok(()) => {
                            active.retries += 1;
                            active.announced = false;
                            let resume_at =
                                tick + backoff_ticks(self.settings.retry_backoff_ticks, active.retries);
                            active.resume_at = Some(resume_at);
                            info!(task = %task_id, retry = active.retries, resume_at, "retry scheduled");
                            events.push(SchedulerEvent::RetryScheduled {
                                task: task_id,
                                retry: active.retries,
                                resume_at,
                            });
                            return;
                        }
                        Err(err) => warn!(task = %task_id, error = %err, "reset for retry rejected"),
                    }
                }
            }
            TaskState::Pending | TaskState::Running => return,
        }
        if let Some(active) = self.current.take() {
            self.record(active);
        }
    }

    fn record(&mut self, active: Active) {
        let task = active.task.as_ref();
        self.outcomes.push(TaskOutcome {
            task: task.id(),
            description: task.description(),
            state: task.state(),
            failure_reason: task.failure_reason().map(str::to_string),
            attempts: active.retries + 1,
            ticks: task.core().ticks(),
            finished_tick: self.tick,
            output: task.output(),
        });
    }

    fn check(&mut self) -> Vec<String> {
        if !self.settings.check_invariants {
            return Vec::new();
        }
        let Some(active) = self.current.as_ref() else {
            return Vec::new();
        };
        let violations = check_tree(active.task.as_ref());
        for violation in &violations {
            error!(tick = self.tick, %violation, "invariant violated");
        }
        self.violations.extend(violations.iter().cloned());
        violations
    }
}
