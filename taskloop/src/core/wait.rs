//! Phase bookkeeping and stuck detection.
//!
//! Every task type owns its own phase enum; `PhaseState` only tracks which
//! value is current, when it was entered and how long the handler has been
//! waiting in it. Thresholds are per phase and checked by the handler.

use std::fmt::Debug;

/// Result of counting one more waiting tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Still within the bound; carries the current count.
    Waiting(u32),
    /// The count exceeded the bound on this tick. Reported once.
    Exceeded,
    /// Past the bound and already reported; carries the current count.
    Overdue(u32),
}

/// Counter of ticks spent without progress, with an escalation bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCounter {
    ticks: u32,
    limit: u32,
}

impl WaitCounter {
    pub fn new(limit: u32) -> Self {
        Self { ticks: 0, limit }
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count a waiting tick. `Exceeded` is returned exactly on the tick the
    /// count first goes above `limit`.
    pub fn tick(&mut self) -> WaitStatus {
        self.ticks = self.ticks.saturating_add(1);
        if self.ticks <= self.limit {
            WaitStatus::Waiting(self.ticks)
        } else if self.ticks == self.limit + 1 {
            WaitStatus::Exceeded
        } else {
            WaitStatus::Overdue(self.ticks)
        }
    }

    /// Progress was made; start counting from zero again.
    pub fn reset(&mut self) {
        self.ticks = 0;
    }

    pub fn with_limit(&mut self, limit: u32) {
        self.limit = limit;
        self.ticks = 0;
    }
}

/// Current phase of a task-type-private state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseState<P> {
    initial: P,
    current: P,
    entered_tick: u64,
    wait: WaitCounter,
    transitions: u32,
}

impl<P: Copy + Debug + Eq> PhaseState<P> {
    pub fn new(initial: P, wait_limit: u32) -> Self {
        Self {
            initial,
            current: initial,
            entered_tick: 0,
            wait: WaitCounter::new(wait_limit),
            transitions: 0,
        }
    }

    pub fn current(&self) -> P {
        self.current
    }

    pub fn is(&self, phase: P) -> bool {
        self.current == phase
    }

    pub fn entered_tick(&self) -> u64 {
        self.entered_tick
    }

    /// Ticks spent in the current phase as of `tick`.
    pub fn ticks_in_phase(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.entered_tick)
    }

    /// Number of phase changes in this attempt.
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    pub fn wait(&self) -> &WaitCounter {
        &self.wait
    }

    /// Count one waiting tick in the current phase.
    pub fn wait_tick(&mut self) -> WaitStatus {
        self.wait.tick()
    }

    /// Progress inside the phase without changing it.
    pub fn progressed(&mut self) {
        self.wait.reset();
    }

    /// Enter `next`, resetting the wait counter. Returns the previous phase
    /// when the phase actually changed.
    pub fn set(&mut self, next: P, tick: u64) -> Option<P> {
        self.wait.reset();
        if next == self.current {
            return None;
        }
        let previous = self.current;
        self.current = next;
        self.entered_tick = tick;
        self.transitions += 1;
        Some(previous)
    }

    /// Enter `next` with a phase-specific wait bound.
    pub fn set_with_limit(&mut self, next: P, tick: u64, wait_limit: u32) -> Option<P> {
        let previous = self.set(next, tick);
        self.wait.with_limit(wait_limit);
        previous
    }

    /// Back to the initial phase for a fresh attempt.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.entered_tick = 0;
        self.wait.reset();
        self.transitions = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        Find,
        Act,
    }

    #[test]
    fn exceeded_fires_once_on_first_tick_past_limit() {
        let mut counter = WaitCounter::new(3);
        let statuses: Vec<WaitStatus> = (0..6).map(|_| counter.tick()).collect();
        assert_eq!(
            statuses,
            vec![
                WaitStatus::Waiting(1),
                WaitStatus::Waiting(2),
                WaitStatus::Waiting(3),
                WaitStatus::Exceeded,
                WaitStatus::Overdue(5),
                WaitStatus::Overdue(6),
            ]
        );
    }

    #[test]
    fn zero_limit_exceeds_on_first_tick() {
        let mut counter = WaitCounter::new(0);
        assert_eq!(counter.tick(), WaitStatus::Exceeded);
    }

    #[test]
    fn set_resets_wait_and_records_transition() {
        let mut phase = PhaseState::new(Phase::Find, 5);
        phase.wait_tick();
        phase.wait_tick();

        assert_eq!(phase.set(Phase::Act, 10), Some(Phase::Find));
        assert_eq!(phase.wait().ticks(), 0);
        assert_eq!(phase.entered_tick(), 10);
        assert_eq!(phase.ticks_in_phase(13), 3);
        assert_eq!(phase.transitions(), 1);
    }

    #[test]
    fn set_same_phase_is_not_a_transition() {
        let mut phase = PhaseState::new(Phase::Find, 5);
        phase.wait_tick();
        assert_eq!(phase.set(Phase::Find, 4), None);
        assert_eq!(phase.transitions(), 0);
        assert_eq!(phase.wait().ticks(), 0);
    }

    #[test]
    fn reset_returns_to_initial_phase() {
        let mut phase = PhaseState::new(Phase::Find, 5);
        phase.set_with_limit(Phase::Act, 2, 1);
        phase.reset();
        assert!(phase.is(Phase::Find));
        assert_eq!(phase.transitions(), 0);
    }
}
