//! Transient exclusion of recently failing candidates.
//!
//! A candidate is excluded after `threshold` consecutive failures and becomes
//! selectable again `clear_interval` ticks after it was excluded. The set is
//! owned by one task instance; tasks that want a shared policy pass the same
//! `ExclusionPolicy` value explicitly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tunables for an exclusion set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionPolicy {
    /// Consecutive failures before a candidate is excluded.
    pub threshold: u32,
    /// Ticks an exclusion lasts.
    pub clear_interval: u64,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            clear_interval: 50,
        }
    }
}

/// Per-candidate failure streaks and active exclusions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    policy: ExclusionPolicy,
    streaks: BTreeMap<String, u32>,
    excluded_at: BTreeMap<String, u64>,
}

impl ExclusionSet {
    pub fn new(policy: ExclusionPolicy) -> Self {
        Self {
            policy,
            streaks: BTreeMap::new(),
            excluded_at: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> ExclusionPolicy {
        self.policy
    }

    /// Record a failed attempt on `candidate` at `tick`. Returns `true` when
    /// this failure caused the exclusion.
    pub fn record_failure(&mut self, candidate: &str, tick: u64) -> bool {
        let streak = self.streaks.entry(candidate.to_string()).or_insert(0);
        *streak += 1;
        if *streak < self.policy.threshold || self.excluded_at.contains_key(candidate) {
            return false;
        }
        self.streaks.remove(candidate);
        self.excluded_at.insert(candidate.to_string(), tick);
        true
    }

    /// A success breaks the failure streak.
    pub fn record_success(&mut self, candidate: &str) {
        self.streaks.remove(candidate);
    }

    pub fn failure_streak(&self, candidate: &str) -> u32 {
        self.streaks.get(candidate).copied().unwrap_or(0)
    }

    /// True while `candidate` is excluded as of `tick`.
    pub fn is_excluded(&self, candidate: &str, tick: u64) -> bool {
        match self.excluded_at.get(candidate) {
            Some(&at) => tick < at.saturating_add(self.policy.clear_interval),
            None => false,
        }
    }

    /// Drop exclusions whose interval elapsed by `tick`. Returns the number
    /// of candidates that became selectable again.
    pub fn sweep(&mut self, tick: u64) -> usize {
        let interval = self.policy.clear_interval;
        let before = self.excluded_at.len();
        self.excluded_at
            .retain(|_, at| tick < at.saturating_add(interval));
        before - self.excluded_at.len()
    }

    /// Forget every exclusion and streak.
    pub fn clear(&mut self) -> usize {
        let cleared = self.excluded_at.len();
        self.excluded_at.clear();
        self.streaks.clear();
        cleared
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded_at.len()
    }

    /// First candidate from `candidates` that is not excluded at `tick`.
    pub fn first_selectable<'a, I>(&self, candidates: I, tick: u64) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        candidates
            .into_iter()
            .map(String::as_str)
            .find(|candidate| !self.is_excluded(candidate, tick))
    }
}
