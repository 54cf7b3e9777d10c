//! Lifecycle transitions shared by every task.
//!
//! The lifecycle is a one-way state machine. Terminal outcomes are decided at
//! most once per attempt; a new attempt starts only through `reset`, which
//! archives the previous outcome instead of overwriting it.

use std::error::Error;
use std::fmt;
use std::time::Instant;

use crate::core::types::{AttemptRecord, TaskState};

/// Rejected lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleError {
    pub from: TaskState,
    pub operation: &'static str,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} a task in state {}", self.operation, self.from)
    }
}

impl Error for LifecycleError {}

/// Per-task lifecycle bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    state: TaskState,
    failure_reason: Option<String>,
    started_at: Option<Instant>,
    started_tick: Option<u64>,
    generation: u32,
    history: Vec<AttemptRecord>,
    hook_pending: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: TaskState::Pending,
            failure_reason: None,
            started_at: None,
            started_tick: None,
            generation: 0,
            history: Vec::new(),
            hook_pending: false,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn started_tick(&self) -> Option<u64> {
        self.started_tick
    }

    /// Attempt counter; bumped by every `reset`.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Archived outcomes of previous attempts, oldest first.
    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    /// `Pending -> Running`, capturing the start instant and tick.
    pub fn start(&mut self, tick: u64, now: Instant) -> Result<(), LifecycleError> {
        if self.state != TaskState::Pending {
            return Err(LifecycleError {
                from: self.state,
                operation: "start",
            });
        }
        self.state = TaskState::Running;
        self.started_at = Some(now);
        self.started_tick = Some(tick);
        Ok(())
    }

    /// Decide `Completed`. Returns `false` (and changes nothing) when the
    /// attempt is not running.
    pub fn complete(&mut self) -> bool {
        if self.state != TaskState::Running {
            return false;
        }
        self.state = TaskState::Completed;
        self.hook_pending = true;
        true
    }

    /// Decide `Failed` with `reason`. Allowed from `Pending` (abort before
    /// start) and `Running`; a decided outcome is never overwritten.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TaskState::Failed;
        self.failure_reason = Some(reason.into());
        self.hook_pending = true;
        true
    }

    /// Return the terminal state whose hook has not fired yet, exactly once.
    pub fn take_hook(&mut self) -> Option<TaskState> {
        if !self.hook_pending {
            return None;
        }
        self.hook_pending = false;
        Some(self.state)
    }

    /// Archive the terminal attempt and return to `Pending`.
    pub fn reset(&mut self, ticks: u64) -> Result<(), LifecycleError> {
        if !self.state.is_terminal() {
            return Err(LifecycleError {
                from: self.state,
                operation: "reset",
            });
        }
        self.history.push(AttemptRecord {
            generation: self.generation,
            state: self.state,
            failure_reason: self.failure_reason.take(),
            ticks,
        });
        self.generation += 1;
        self.state = TaskState::Pending;
        self.started_at = None;
        self.started_tick = None;
        self.hook_pending = false;
        Ok(())
    }
}
