//! Stable exit codes for `taskloop` commands.

use crate::scheduler::RunStatus;

/// Command succeeded; for `run`, every task completed.
pub const OK: i32 = 0;
/// Invalid scenario/config or any other error.
pub const INVALID: i32 = 1;
/// `taskloop run` finished with a task that exhausted its retries.
pub const FAILED: i32 = 2;
/// `taskloop run` hit its tick budget with work remaining.
pub const EXHAUSTED: i32 = 3;

pub fn for_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed => OK,
        RunStatus::Failed => FAILED,
        RunStatus::Exhausted => EXHAUSTED,
    }
}
