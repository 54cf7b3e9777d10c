//! Tick-driven task engine for automation agents.
//!
//! A task is a small state machine stepped once per tick. Tasks delegate to
//! child tasks, issue at most one input action at a time, and fail through
//! timeouts, inactivity and stuck-phase escalation instead of hanging. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (lifecycle, action gate, phase
//!   waits, exclusion, budgets, tree invariants). No I/O.
//! - **[`io`]**: Side-effecting operations (config and scenario files, run
//!   logs, thread-backed executor).
//!
//! [`task`], [`step`] and [`scheduler`] form the engine; [`workflows`] holds
//! reusable task types; [`sim`] drives them against a scripted world;
//! [`run`] and [`validate`] implement the CLI commands.

pub mod action;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
pub mod scheduler;
pub mod sim;
pub mod step;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod timing;
pub mod validate;
pub mod workflows;
pub mod world;
