//! Rule-driven action resolution for scenarios.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tracing::{debug, instrument};

use crate::action::{
    ActionError, ActionErrorKind, ActionExecutor, ActionOutcome, ActionRequest, ActionResult,
    CompletionSender,
};
use crate::core::gate::ActionTicket;
use crate::io::executor::ActionBackend;
use crate::io::scenario::{Effect, Rule};
use crate::sim::world::WorldHandle;
use crate::timing::Humanizer;
use crate::world::WorldView;

/// How one action turns out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub result: ActionResult,
    /// Applied to the world when the action resolves; empty on failure.
    pub effects: Vec<Effect>,
    pub delay_ticks: u64,
}

/// Scenario rules plus the randomness used to apply them.
pub struct RuleBook {
    rules: Vec<Rule>,
    matched: Vec<u32>,
    rng: Humanizer,
}

impl RuleBook {
    pub fn new(rules: Vec<Rule>, rng: Humanizer) -> Self {
        let matched = vec![0; rules.len()];
        Self {
            rules,
            matched,
            rng,
        }
    }

    /// First matching rule decides. Unmatched actions succeed after one tick
    /// with no effect.
    pub fn resolve(&mut self, request: &ActionRequest, world: &dyn WorldView) -> Resolution {
        let Some(index) = self.rules.iter().position(|rule| rule.matches(request)) else {
            return Resolution {
                result: Ok(ActionOutcome::default()),
                effects: Vec::new(),
                delay_ticks: 1,
            };
        };
        self.matched[index] += 1;
        let rule = &self.rules[index];
        let [min, max] = rule.delay_ticks;
        let delay_ticks = self.rng.uniform(min.max(1)..=max.max(1));

        let failure = if rule.requires.as_ref().is_some_and(|condition| !condition.holds(world)) {
            Some(ActionError::rejected(format!("{request}: precondition not met")))
        } else if self.matched[index] <= rule.fail_first || self.rng.chance(rule.fail_chance) {
            let message = rule.failure_message(request);
            Some(match rule.error {
                ActionErrorKind::Transient => ActionError::transient(message),
                ActionErrorKind::Rejected => ActionError::rejected(message),
            })
        } else {
            None
        };

        match failure {
            Some(err) => Resolution {
                result: Err(err),
                effects: Vec::new(),
                delay_ticks,
            },
            None => Resolution {
                result: Ok(ActionOutcome::default()),
                effects: rule.effects.clone(),
                delay_ticks,
            },
        }
    }

    /// Backend for `ThreadExecutor`: resolves against the latest snapshot
    /// and applies effects on the next world advance.
    pub fn into_backend(self, world: WorldHandle) -> ActionBackend {
        let book = Arc::new(Mutex::new(self));
        Arc::new(move |request: &ActionRequest| -> ActionResult {
            let snapshot = world.snapshot();
            let resolution = book
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .resolve(request, &snapshot);
            world.schedule(0, resolution.effects);
            resolution.result
        })
    }
}

struct InFlight {
    due: u64,
    ticket: ActionTicket,
    result: ActionResult,
    reply: CompletionSender,
}

/// Tick-clocked executor: every action resolves a rule-chosen number of
/// ticks after submission, with its effects landing on that same tick.
pub struct SimExecutor {
    book: RuleBook,
    world: WorldHandle,
    tick: u64,
    in_flight: Vec<InFlight>,
    submitted: u64,
}

impl SimExecutor {
    pub fn new(book: RuleBook, world: WorldHandle) -> Self {
        Self {
            book,
            world,
            tick: 0,
            in_flight: Vec::new(),
            submitted: 0,
        }
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl ActionExecutor for SimExecutor {
    #[instrument(skip_all, fields(%ticket, %request))]
    fn submit(
        &mut self,
        ticket: ActionTicket,
        request: ActionRequest,
        reply: CompletionSender,
    ) -> Result<()> {
        let snapshot = self.world.snapshot();
        let resolution = self.book.resolve(&request, &snapshot);
        let due = self.tick + resolution.delay_ticks;
        debug!(due, ok = resolution.result.is_ok(), "action scheduled");
        self.world.schedule(due, resolution.effects);
        self.in_flight.push(InFlight {
            due,
            ticket,
            result: resolution.result,
            reply,
        });
        self.submitted += 1;
        Ok(())
    }

    fn on_tick(&mut self, tick: u64) {
        self.tick = tick;
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|action| action.due <= tick);
        self.in_flight = waiting;
        for action in due {
            action.reply.send(action.ticket, action.result);
        }
    }
}
