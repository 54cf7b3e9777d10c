//! Action requests, completions and the executor seam.
//!
//! The engine never performs input itself. Tasks hand an `ActionRequest` to an
//! `ActionExecutor` through their action gate; the executor reports back on a
//! channel and the scheduler applies the completion on a later tick.

use std::error::Error;
use std::fmt;
use std::sync::mpsc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::gate::ActionTicket;

/// Opaque input request. The engine only routes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionRequest {
    /// Pointer interaction (`verb` such as "click" or "use") on a named target.
    Pointer { verb: String, target: String },
    /// Single key press.
    Key { key: String },
    /// Idle pointer movement with no effect on the world.
    Drift { dx: i32, dy: i32 },
}

impl ActionRequest {
    pub fn pointer(verb: impl Into<String>, target: impl Into<String>) -> Self {
        ActionRequest::Pointer {
            verb: verb.into(),
            target: target.into(),
        }
    }

    pub fn verb(&self) -> &str {
        match self {
            ActionRequest::Pointer { verb, .. } => verb,
            ActionRequest::Key { .. } => "key",
            ActionRequest::Drift { .. } => "drift",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            ActionRequest::Pointer { target, .. } => Some(target),
            ActionRequest::Key { key } => Some(key),
            ActionRequest::Drift { .. } => None,
        }
    }
}

impl fmt::Display for ActionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRequest::Pointer { verb, target } => write!(f, "{verb} {target}"),
            ActionRequest::Key { key } => write!(f, "key {key}"),
            ActionRequest::Drift { dx, dy } => write!(f, "drift ({dx},{dy})"),
        }
    }
}

/// Executor-side hint about an action failure. The issuing handler decides
/// whether it is recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorKind {
    /// The attempt went wrong but may succeed if repeated (misclick, lag).
    Transient,
    /// The request cannot succeed as issued (target gone, invalid input).
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    pub kind: ActionErrorKind,
    pub message: String,
}

impl ActionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ActionErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: ActionErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.kind == ActionErrorKind::Rejected
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ActionErrorKind::Transient => write!(f, "transient: {}", self.message),
            ActionErrorKind::Rejected => write!(f, "rejected: {}", self.message),
        }
    }
}

impl Error for ActionError {}

/// Successful action report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Humanized delay spent before the action was performed.
    pub delay_ms: u64,
}

pub type ActionResult = Result<ActionOutcome, ActionError>;

/// Result of one action, addressed by its ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCompletion {
    pub ticket: ActionTicket,
    pub result: ActionResult,
}

/// Sending half of the completion channel. Cheap to clone and `Send`, so
/// executors can move it onto worker threads.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::Sender<ActionCompletion>,
}

impl CompletionSender {
    /// Report a completion. Returns `false` when the scheduler is gone.
    pub fn send(&self, ticket: ActionTicket, result: ActionResult) -> bool {
        match self.tx.send(ActionCompletion { ticket, result }) {
            Ok(()) => true,
            Err(_) => {
                warn!(%ticket, "completion receiver dropped");
                false
            }
        }
    }
}

/// Create the completion channel shared by one scheduler and its executor.
pub fn completion_channel() -> (CompletionSender, mpsc::Receiver<ActionCompletion>) {
    let (tx, rx) = mpsc::channel();
    (CompletionSender { tx }, rx)
}

/// Performs actions asynchronously relative to the tick that issued them.
///
/// `submit` must return promptly; the result is delivered later through
/// `reply`. Implementations never call back into tasks directly.
pub trait ActionExecutor {
    fn submit(
        &mut self,
        ticket: ActionTicket,
        request: ActionRequest,
        reply: CompletionSender,
    ) -> Result<()>;

    /// Called by the scheduler at the start of every tick, before completions
    /// are drained. Tick-clocked executors release due results here.
    fn on_tick(&mut self, _tick: u64) {}
}
