//! Reusable workflows built on the task contract.
//!
//! Each workflow owns a private phase enum and composes others only through
//! delegation, so any of them can be nested inside a `Sequence` or `Branch`.

pub mod branch;
pub mod interact;
pub mod quota;
pub mod sequence;
pub mod wait;

pub use branch::Branch;
pub use interact::Interact;
pub use quota::{Candidates, Quota};
pub use sequence::{FailurePolicy, Sequence, SequenceMode};
pub use wait::WaitFor;
