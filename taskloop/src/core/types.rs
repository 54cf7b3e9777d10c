//! Shared deterministic types for the engine core.
//!
//! These types define stable contracts between the lifecycle, the action gate
//! and the scheduler. They carry no behaviour beyond classification helpers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-unique task identifier, allocated in construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Lifecycle state shared by every task.
///
/// Legal transitions: `Pending -> Running -> (Completed | Failed)`, plus
/// `Pending -> Failed` for tasks aborted before they ever ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority for top-level tasks. Lower sorts first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

/// Terminal outcome of one attempt, archived by `reset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub generation: u32,
    pub state: TaskState,
    pub failure_reason: Option<String>,
    /// Ticks the attempt executed before it turned terminal.
    pub ticks: u64,
}

/// Failure reason used by the supervisor when the overall budget runs out.
pub const TIMEOUT_REASON: &str = "timeout";
