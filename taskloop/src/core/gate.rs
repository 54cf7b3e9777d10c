//! Single-outstanding-action discipline.
//!
//! A task holds at most one ticket. The ticket names the attempt
//! (`generation`) and the issue sequence, so completions that arrive after the
//! owner moved on can be recognised and dropped.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::{TaskId, TaskState};

/// Identity of one issued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionTicket {
    pub task: TaskId,
    pub generation: u32,
    pub seq: u64,
}

impl fmt::Display for ActionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/g{}/a{}", self.task, self.generation, self.seq)
    }
}

/// Attempt to issue while a ticket is outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateError {
    pub outstanding: ActionTicket,
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action {} is still pending", self.outstanding)
    }
}

impl Error for GateError {}

/// Why a completion was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stale {
    /// Nothing is outstanding (already resolved or cleared by reset).
    NotPending,
    /// Ticket belongs to an earlier attempt.
    Generation { current: u32 },
    /// Ticket was superseded by a later issue.
    Sequence { outstanding: u64 },
    /// Owner already decided its outcome.
    Terminal(TaskState),
}

impl fmt::Display for Stale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stale::NotPending => f.write_str("no action pending"),
            Stale::Generation { current } => write!(f, "owner is on generation {current}"),
            Stale::Sequence { outstanding } => write!(f, "owner is waiting on action {outstanding}"),
            Stale::Terminal(state) => write!(f, "owner is {state}"),
        }
    }
}

/// Per-task pending-action flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionGate {
    outstanding: Option<ActionTicket>,
    issued: u64,
}

impl ActionGate {
    pub fn is_pending(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn outstanding(&self) -> Option<ActionTicket> {
        self.outstanding
    }

    /// Total actions issued by the owner across all attempts.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Raise the pending flag and hand out a fresh ticket.
    pub fn open(&mut self, task: TaskId, generation: u32) -> Result<ActionTicket, GateError> {
        if let Some(outstanding) = self.outstanding {
            return Err(GateError { outstanding });
        }
        self.issued += 1;
        let ticket = ActionTicket {
            task,
            generation,
            seq: self.issued,
        };
        self.outstanding = Some(ticket);
        Ok(ticket)
    }

    /// Check a completion against the owner's current attempt. On success the
    /// pending flag is lowered.
    pub fn admit(
        &mut self,
        ticket: &ActionTicket,
        generation: u32,
        state: TaskState,
    ) -> Result<(), Stale> {
        if state.is_terminal() {
            return Err(Stale::Terminal(state));
        }
        if ticket.generation != generation {
            return Err(Stale::Generation {
                current: generation,
            });
        }
        let outstanding = self.outstanding.ok_or(Stale::NotPending)?;
        if outstanding.seq != ticket.seq {
            return Err(Stale::Sequence {
                outstanding: outstanding.seq,
            });
        }
        self.outstanding = None;
        Ok(())
    }

    /// Drop any outstanding ticket (used on settlement and by reset).
    pub fn clear(&mut self) {
        self.outstanding = None;
    }
}
