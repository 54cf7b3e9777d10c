//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects and never read clocks on
//! their own. They operate on in-memory state and return deterministic
//! outputs suitable for tests.

pub mod budget;
pub mod exclusion;
pub mod gate;
pub mod invariants;
pub mod lifecycle;
pub mod selector;
pub mod types;
pub mod wait;
