//! Time budget helpers for the supervisor.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Overall budget for one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeout {
    /// Budget measured in executed ticks since start.
    Ticks(u64),
    /// Budget measured in wall-clock time since start.
    Wall(Duration),
}

impl Timeout {
    pub fn from_secs(secs: u64) -> Self {
        Timeout::Wall(Duration::from_secs(secs))
    }

    /// True once the budget is used up.
    ///
    /// `started_tick`/`started_at` are the values captured on the first
    /// execute; `tick`/`now` describe the current call.
    pub fn is_exhausted(self, started_tick: u64, started_at: Instant, tick: u64, now: Instant) -> bool {
        match self {
            Timeout::Ticks(budget) => tick.saturating_sub(started_tick) >= budget,
            Timeout::Wall(budget) => now.saturating_duration_since(started_at) >= budget,
        }
    }
}

/// Ticks left until `limit` given the last progress tick, or `None` when the
/// task already went quiet for longer than `limit`.
pub fn remaining_quiet_ticks(last_progress_tick: u64, tick: u64, limit: u64) -> Option<u64> {
    let quiet = tick.saturating_sub(last_progress_tick);
    if quiet > limit {
        return None;
    }
    Some(limit - quiet)
}

/// Exponential retry backoff in ticks: `base`, `2*base`, `4*base`, ...
pub fn backoff_ticks(base: u64, retry: u32) -> u64 {
    let exponent = retry.saturating_sub(1).min(16);
    base.saturating_mul(1u64 << exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_budget_is_exhausted_at_exact_budget() {
        let now = Instant::now();
        let timeout = Timeout::Ticks(5);
        assert!(!timeout.is_exhausted(1, now, 5, now));
        assert!(timeout.is_exhausted(1, now, 6, now));
    }

    #[test]
    fn wall_budget_uses_elapsed_time() {
        let start = Instant::now();
        let timeout = Timeout::Wall(Duration::from_secs(30));
        assert!(!timeout.is_exhausted(0, start, 0, start + Duration::from_secs(29)));
        assert!(timeout.is_exhausted(0, start, 0, start + Duration::from_secs(30)));
    }

    #[test]
    fn quiet_ticks_run_out_past_limit() {
        assert_eq!(remaining_quiet_ticks(10, 15, 10), Some(5));
        assert_eq!(remaining_quiet_ticks(10, 20, 10), Some(0));
        assert_eq!(remaining_quiet_ticks(10, 21, 10), None);
    }

    #[test]
    fn backoff_doubles_per_retry() {
        assert_eq!(backoff_ticks(2, 1), 2);
        assert_eq!(backoff_ticks(2, 2), 4);
        assert_eq!(backoff_ticks(2, 3), 8);
        assert_eq!(backoff_ticks(0, 3), 0);
    }
}
