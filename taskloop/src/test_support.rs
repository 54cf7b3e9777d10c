//! Test-only helpers: a scriptable task, a scripted executor and a
//! single-task harness that ticks like the scheduler does.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::action::{
    ActionCompletion, ActionExecutor, ActionOutcome, ActionRequest, ActionResult,
    CompletionSender, completion_channel,
};
use crate::core::gate::ActionTicket;
use crate::core::types::TaskState;
use crate::step::{Delivery, deliver, execute_task};
use crate::task::{ChildReport, Task, TaskContext, TaskCore};
use crate::timing::Humanizer;
use crate::world::Facts;

/// One submitted action as seen by [`ScriptedExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub tick: u64,
    pub ticket: ActionTicket,
    pub request: ActionRequest,
}

/// Executor that resolves every action a fixed number of ticks after it was
/// submitted, with results taken from a script (success once exhausted).
#[derive(Debug)]
pub struct ScriptedExecutor {
    delay_ticks: u64,
    tick: u64,
    results: VecDeque<ActionResult>,
    in_flight: Vec<(u64, ActionTicket, ActionResult, CompletionSender)>,
    submitted: Rc<RefCell<Vec<Submitted>>>,
}

impl ScriptedExecutor {
    pub fn new(delay_ticks: u64) -> Self {
        Self {
            delay_ticks,
            tick: 0,
            results: VecDeque::new(),
            in_flight: Vec::new(),
            submitted: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Results for the next submissions, in order.
    pub fn script(mut self, results: impl IntoIterator<Item = ActionResult>) -> Self {
        self.results.extend(results);
        self
    }

    pub fn submitted(&self) -> Rc<RefCell<Vec<Submitted>>> {
        Rc::clone(&self.submitted)
    }
}

impl ActionExecutor for ScriptedExecutor {
    fn submit(
        &mut self,
        ticket: ActionTicket,
        request: ActionRequest,
        reply: CompletionSender,
    ) -> Result<()> {
        self.submitted.borrow_mut().push(Submitted {
            tick: self.tick,
            ticket,
            request,
        });
        let result = self
            .results
            .pop_front()
            .unwrap_or(Ok(ActionOutcome::default()));
        self.in_flight
            .push((self.tick + self.delay_ticks, ticket, result, reply));
        Ok(())
    }

    fn on_tick(&mut self, tick: u64) {
        self.tick = tick;
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|(at, ..)| *at <= tick);
        self.in_flight = waiting;
        for (_, ticket, result, reply) in due {
            reply.send(ticket, result);
        }
    }
}

/// Drives a single task tick by tick: executor tick, completion delivery,
/// then one execute call.
pub struct Harness {
    pub tick: u64,
    pub world: Facts,
    pub timing: Humanizer,
    pub executor: ScriptedExecutor,
    reply: CompletionSender,
    completions: Receiver<ActionCompletion>,
    pub deliveries: Vec<Delivery>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_executor(ScriptedExecutor::new(1))
    }

    pub fn with_executor(executor: ScriptedExecutor) -> Self {
        let (reply, completions) = completion_channel();
        Self {
            tick: 0,
            world: Facts::default(),
            timing: Humanizer::seeded(42),
            executor,
            reply,
            completions,
            deliveries: Vec::new(),
        }
    }

    /// Context for the current tick.
    pub fn context(&mut self) -> TaskContext<'_> {
        TaskContext::new(
            self.tick,
            Instant::now(),
            &self.world,
            &mut self.timing,
            &mut self.executor,
            self.reply.clone(),
        )
    }

    /// Advance one tick and execute `task`.
    pub fn execute(&mut self, task: &mut dyn Task) -> TaskState {
        self.tick += 1;
        self.executor.on_tick(self.tick);
        let completions: Vec<ActionCompletion> = self.completions.try_iter().collect();
        for completion in completions {
            let mut ctx = self.context();
            let delivery = deliver(task, completion, &mut ctx);
            self.deliveries.push(delivery);
        }
        let mut ctx = self.context();
        execute_task(task, &mut ctx)
    }

    /// Execute until `task` is terminal or `max_ticks` ticks have passed.
    pub fn run(&mut self, task: &mut dyn Task, max_ticks: u64) -> TaskState {
        for _ in 0..max_ticks {
            if self.execute(task).is_terminal() {
                break;
            }
        }
        task.state()
    }

    /// Deliver a hand-made completion at the current tick.
    pub fn deliver(
        &mut self,
        task: &mut dyn Task,
        ticket: ActionTicket,
        result: ActionResult,
    ) -> Delivery {
        let mut ctx = self.context();
        deliver(task, ActionCompletion { ticket, result }, &mut ctx)
    }
}

const ANY_TICK: u64 = 0;

/// What a [`ProbeTask`] does when its handler runs on a planned tick.
pub enum ProbeMove {
    Complete,
    Fail(&'static str),
    Error(&'static str),
    Issue(ActionRequest),
    Delegate(Box<dyn Task>),
}

impl ProbeMove {
    pub fn delegate(child: impl Task + 'static) -> Self {
        ProbeMove::Delegate(Box::new(child))
    }

    pub fn issue_click(target: &str) -> Self {
        ProbeMove::Issue(ActionRequest::pointer("click", target))
    }
}

/// Everything a probe observed, shared with the test through `Rc`.
#[derive(Debug, Default)]
pub struct ProbeLog {
    pub starts: u32,
    /// `can_execute` evaluations.
    pub gate_checks: u32,
    pub handler_ticks: Vec<u64>,
    pub pending_ticks: Vec<u64>,
    pub resolved: Vec<(u64, bool)>,
    pub children: Vec<(u64, ChildReport)>,
    pub hooks: Vec<String>,
    pub states: Vec<TaskState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbePhase {
    Idle,
    Acting,
    Resolved,
    Delegating,
    AfterChild,
}

/// Task whose handler follows a tick-indexed plan and records everything.
pub struct ProbeTask {
    core: TaskCore,
    name: String,
    gated: bool,
    plan: Vec<(u64, ProbeMove)>,
    phase: ProbePhase,
    /// Handler calls across every attempt.
    pub handled_total: u32,
    log: Rc<RefCell<ProbeLog>>,
}

impl ProbeTask {
    pub fn new(name: &str) -> Self {
        Self {
            core: TaskCore::new(),
            name: name.to_string(),
            gated: false,
            plan: Vec::new(),
            phase: ProbePhase::Idle,
            handled_total: 0,
            log: Rc::new(RefCell::new(ProbeLog::default())),
        }
    }

    /// Perform `step` when the handler runs on `tick`.
    pub fn at(mut self, tick: u64, step: ProbeMove) -> Self {
        self.plan.push((tick, step));
        self
    }

    /// Perform `step` on the next handler call, whatever the tick.
    pub fn at_any(mut self, step: ProbeMove) -> Self {
        self.plan.push((ANY_TICK, step));
        self
    }

    pub fn gated(mut self, gated: bool) -> Self {
        self.gated = gated;
        self
    }

    pub fn log(&self) -> Rc<RefCell<ProbeLog>> {
        Rc::clone(&self.log)
    }

    fn record_state(&self) {
        self.log.borrow_mut().states.push(self.state());
    }
}

impl Task for ProbeTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn description(&self) -> String {
        format!("probe {}", self.name)
    }

    fn phase_name(&self) -> &'static str {
        match self.phase {
            ProbePhase::Idle => "idle",
            ProbePhase::Acting => "acting",
            ProbePhase::Resolved => "resolved",
            ProbePhase::Delegating => "delegating",
            ProbePhase::AfterChild => "after_child",
        }
    }

    fn can_execute(&self, _ctx: &TaskContext<'_>) -> bool {
        self.log.borrow_mut().gate_checks += 1;
        !self.gated
    }

    fn on_start(&mut self, _ctx: &mut TaskContext<'_>) -> Result<()> {
        self.log.borrow_mut().starts += 1;
        self.record_state();
        Ok(())
    }

    fn step(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        self.handled_total += 1;
        self.log.borrow_mut().handler_ticks.push(ctx.tick);
        let planned = self
            .plan
            .iter()
            .position(|(tick, _)| *tick == ctx.tick || *tick == ANY_TICK);
        if let Some(index) = planned {
            let (_, step) = self.plan.remove(index);
            match step {
                ProbeMove::Complete => {
                    self.core.complete();
                }
                ProbeMove::Fail(reason) => {
                    self.core.fail(reason);
                }
                ProbeMove::Error(message) => return Err(anyhow!(message)),
                ProbeMove::Issue(request) => {
                    self.core.issue_action(ctx, request)?;
                    self.phase = ProbePhase::Acting;
                }
                ProbeMove::Delegate(child) => {
                    self.core.delegate(child)?;
                    self.phase = ProbePhase::Delegating;
                }
            }
        }
        self.record_state();
        Ok(())
    }

    fn while_pending(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        self.log.borrow_mut().pending_ticks.push(ctx.tick);
        Ok(())
    }

    fn on_action_resolved(&mut self, ctx: &mut TaskContext<'_>, result: ActionResult) -> Result<()> {
        self.log.borrow_mut().resolved.push((ctx.tick, result.is_ok()));
        match result {
            Ok(_) => self.phase = ProbePhase::Resolved,
            Err(err) if err.is_rejected() => {
                self.core.fail(format!("action failed: {err}"));
            }
            Err(_) => self.phase = ProbePhase::Idle,
        }
        Ok(())
    }

    fn on_child_finished(&mut self, ctx: &mut TaskContext<'_>, child: ChildReport) -> Result<()> {
        self.log.borrow_mut().children.push((ctx.tick, child));
        self.phase = ProbePhase::AfterChild;
        Ok(())
    }

    fn reset_attempt(&mut self) {
        self.phase = ProbePhase::Idle;
    }

    fn on_complete(&mut self, _ctx: &mut TaskContext<'_>) -> Result<()> {
        self.log.borrow_mut().hooks.push("complete".to_string());
        self.record_state();
        Ok(())
    }

    fn on_fail(&mut self, _ctx: &mut TaskContext<'_>, reason: &str) -> Result<()> {
        self.log.borrow_mut().hooks.push(format!("fail:{reason}"));
        self.record_state();
        Ok(())
    }
}

/// Write `body` as `scenario.toml` inside a fresh temp dir.
pub fn temp_scenario(body: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("scenario.toml");
    fs::write(&path, body).expect("write scenario");
    (dir, path)
}
