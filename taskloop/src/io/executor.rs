//! Thread-backed action executor.
//!
//! Every submitted action runs on its own worker thread: it sleeps a
//! humanized delay, calls the backend, then reports through the completion
//! channel. The tick thread never waits on a worker.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::action::{ActionExecutor, ActionOutcome, ActionRequest, ActionResult, CompletionSender};
use crate::core::gate::ActionTicket;
use crate::timing::{DelayProfile, Humanizer};

/// Performs the actual input. Runs on a worker thread.
pub type ActionBackend = Arc<dyn Fn(&ActionRequest) -> ActionResult + Send + Sync>;

pub struct ThreadExecutor {
    backend: ActionBackend,
    timing: Humanizer,
    in_flight: Vec<thread::JoinHandle<()>>,
}

impl ThreadExecutor {
    pub fn new(backend: ActionBackend, timing: Humanizer) -> Self {
        Self {
            backend,
            timing,
            in_flight: Vec::new(),
        }
    }

    /// Worker threads that have not finished yet.
    pub fn in_flight(&mut self) -> usize {
        self.in_flight.retain(|handle| !handle.is_finished());
        self.in_flight.len()
    }

    fn delay_for(&mut self, request: &ActionRequest) -> Duration {
        let profile = match request {
            ActionRequest::Drift { .. } => DelayProfile::Idle,
            ActionRequest::Pointer { .. } | ActionRequest::Key { .. } => DelayProfile::Reaction,
        };
        self.timing.delay(profile) + self.timing.delay(DelayProfile::Action)
    }
}

impl ActionExecutor for ThreadExecutor {
    #[instrument(skip_all, fields(%ticket, %request))]
    fn submit(
        &mut self,
        ticket: ActionTicket,
        request: ActionRequest,
        reply: CompletionSender,
    ) -> Result<()> {
        let delay = self.delay_for(&request);
        let backend = Arc::clone(&self.backend);
        debug!(delay_ms = delay.as_millis() as u64, "spawning action worker");
        let handle = thread::Builder::new()
            .name(format!("action-{ticket}"))
            .spawn(move || {
                thread::sleep(delay);
                let result = backend(&request).map(|outcome| ActionOutcome {
                    delay_ms: outcome.delay_ms + delay.as_millis() as u64,
                });
                reply.send(ticket, result);
            })
            .context("spawn action worker")?;
        self.in_flight.push(handle);
        Ok(())
    }

    fn on_tick(&mut self, _tick: u64) {
        self.in_flight.retain(|handle| !handle.is_finished());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionError, completion_channel};
    use crate::core::types::TaskId;

    fn ticket(seq: u64) -> ActionTicket {
        ActionTicket {
            task: TaskId(1),
            generation: 0,
            seq,
        }
    }

    #[test]
    fn completion_arrives_on_channel_after_delay() {
        let backend: ActionBackend =
            Arc::new(|_request: &ActionRequest| -> ActionResult { Ok(ActionOutcome::default()) });
        let mut executor = ThreadExecutor::new(backend, Humanizer::new(Some(1), 0.01));
        let (reply, completions) = completion_channel();

        executor
            .submit(ticket(1), ActionRequest::pointer("click", "door"), reply)
            .expect("submit");

        let completion = completions
            .recv_timeout(Duration::from_secs(5))
            .expect("completion");
        assert_eq!(completion.ticket, ticket(1));
        assert!(completion.result.is_ok());
    }

    #[test]
    fn backend_errors_are_forwarded() {
        let backend: ActionBackend = Arc::new(|request: &ActionRequest| -> ActionResult {
            Err(ActionError::rejected(format!("no {}", request.target().unwrap_or("?"))))
        });
        let mut executor = ThreadExecutor::new(backend, Humanizer::new(Some(1), 0.0));
        let (reply, completions) = completion_channel();

        executor
            .submit(ticket(2), ActionRequest::pointer("click", "door"), reply)
            .expect("submit");

        let completion = completions
            .recv_timeout(Duration::from_secs(5))
            .expect("completion");
        assert_eq!(completion.result, Err(ActionError::rejected("no door")));
    }
}
