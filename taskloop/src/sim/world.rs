//! Simulated world: scenario facts, scheduled events and action effects.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::{debug, trace};

use crate::io::scenario::{Effect, WorldEvent};
use crate::world::{Facts, WorldSource, WorldView};

#[derive(Debug, Default)]
struct Mailbox {
    /// Effects keyed by the tick they apply at.
    due: BTreeMap<u64, Vec<Effect>>,
    snapshot: Facts,
}

/// Shared access to the simulated world for executors, which may live on
/// other threads. Effects are applied by the owning `SimWorld` when it
/// advances; the snapshot is the state as of the last advance.
#[derive(Debug, Clone, Default)]
pub struct WorldHandle {
    inner: Arc<Mutex<Mailbox>>,
}

impl WorldHandle {
    fn lock(&self) -> MutexGuard<'_, Mailbox> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `effects` when the world advances to `at` (or the next advance
    /// if `at` already passed).
    pub fn schedule(&self, at: u64, effects: Vec<Effect>) {
        if effects.is_empty() {
            return;
        }
        self.lock().due.entry(at).or_default().extend(effects);
    }

    pub fn snapshot(&self) -> Facts {
        self.lock().snapshot.clone()
    }

    fn take_due(&self, tick: u64) -> Vec<Effect> {
        let mut mailbox = self.lock();
        let later = mailbox.due.split_off(&(tick + 1));
        let due = std::mem::replace(&mut mailbox.due, later);
        due.into_values().flatten().collect()
    }

    fn publish(&self, facts: &Facts) {
        self.lock().snapshot = facts.clone();
    }
}

pub struct SimWorld {
    facts: Facts,
    events: Vec<WorldEvent>,
    next_event: usize,
    handle: WorldHandle,
    applied_effects: u64,
}

impl SimWorld {
    pub fn new(initial: Facts, mut events: Vec<WorldEvent>) -> Self {
        events.sort_by_key(|event| event.at);
        let handle = WorldHandle::default();
        handle.publish(&initial);
        Self {
            facts: initial,
            events,
            next_event: 0,
            handle,
            applied_effects: 0,
        }
    }

    pub fn handle(&self) -> WorldHandle {
        self.handle.clone()
    }

    pub fn facts(&self) -> &Facts {
        &self.facts
    }

    /// Effects applied so far, from events and actions.
    pub fn applied_effects(&self) -> u64 {
        self.applied_effects
    }

    fn apply(&mut self, effects: &[Effect]) {
        for effect in effects {
            trace!(?effect, "apply effect");
            effect.apply(&mut self.facts);
        }
        self.applied_effects += effects.len() as u64;
    }
}

impl WorldSource for SimWorld {
    fn advance(&mut self, tick: u64) -> Result<()> {
        while let Some(event) = self.events.get(self.next_event) {
            if event.at > tick {
                break;
            }
            let event = event.clone();
            debug!(at = event.at, note = event.note.as_deref().unwrap_or(""), "world event");
            self.apply(&event.effects);
            self.next_event += 1;
        }
        let due = self.handle.take_due(tick);
        self.apply(&due);
        self.handle.publish(&self.facts);
        Ok(())
    }

    fn view(&self) -> &dyn WorldView {
        &self.facts
    }
}
