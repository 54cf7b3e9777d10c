use serde::{Deserialize, Serialize};
use taskloop::scheduler::RunStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Exhausted,
    Error,
}

/// `None` means the run never produced a summary (load or build error).
pub fn classify_outcome(status: Option<RunStatus>, violations: usize) -> Outcome {
    match status {
        Some(RunStatus::Completed) if violations == 0 => Outcome::Success,
        Some(RunStatus::Completed) | Some(RunStatus::Failed) => Outcome::Fail,
        Some(RunStatus::Exhausted) => Outcome::Exhausted,
        None => Outcome::Error,
    }
}
