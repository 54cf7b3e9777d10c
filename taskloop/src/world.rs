//! Read-only world snapshot seam.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Synchronous query surface over facts about the current world.
///
/// Tasks read it during their own execute call and never keep answers past
/// the tick.
pub trait WorldView {
    fn flag(&self, key: &str) -> bool;
    fn counter(&self, key: &str) -> i64;
    fn list(&self, key: &str) -> Vec<String>;
}

/// Boolean query over a world snapshot, used by condition-driven tasks.
pub type Predicate = Box<dyn Fn(&dyn WorldView) -> bool>;

/// Box a closure as a [`Predicate`].
pub fn predicate<F>(condition: F) -> Predicate
where
    F: Fn(&dyn WorldView) -> bool + 'static,
{
    Box::new(condition)
}

/// Produces the snapshot for each tick.
pub trait WorldSource {
    /// Bring the world up to `tick` (apply due events and effects).
    fn advance(&mut self, tick: u64) -> Result<()>;
    fn view(&self) -> &dyn WorldView;
}

/// In-memory fact store. Missing keys read as `false`, `0` and empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Facts {
    pub flags: BTreeMap<String, bool>,
    pub counters: BTreeMap<String, i64>,
    pub lists: BTreeMap<String, Vec<String>>,
}

impl Facts {
    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.flags.insert(key.to_string(), value);
    }

    pub fn set_counter(&mut self, key: &str, value: i64) {
        self.counters.insert(key.to_string(), value);
    }

    pub fn add(&mut self, key: &str, by: i64) -> i64 {
        let value = self.counters.entry(key.to_string()).or_insert(0);
        *value = value.saturating_add(by);
        *value
    }

    pub fn push(&mut self, key: &str, item: &str) {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push(item.to_string());
    }

    /// Remove the first occurrence of `item`. Returns whether it was present.
    pub fn remove(&mut self, key: &str, item: &str) -> bool {
        let Some(items) = self.lists.get_mut(key) else {
            return false;
        };
        match items.iter().position(|existing| existing == item) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }
}

impl WorldView for Facts {
    fn flag(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }

    fn counter(&self, key: &str) -> i64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.lists.get(key).cloned().unwrap_or_default()
    }
}

/// A static fact set never changes between ticks.
impl WorldSource for Facts {
    fn advance(&mut self, _tick: u64) -> Result<()> {
        Ok(())
    }

    fn view(&self) -> &dyn WorldView {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_read_as_defaults() {
        let facts = Facts::default();
        assert!(!facts.flag("bank_open"));
        assert_eq!(facts.counter("logs"), 0);
        assert!(facts.list("trees").is_empty());
    }

    #[test]
    fn remove_drops_first_occurrence_only() {
        let mut facts = Facts::default();
        facts.push("trees", "oak");
        facts.push("trees", "oak");
        assert!(facts.remove("trees", "oak"));
        assert_eq!(facts.list("trees"), vec!["oak".to_string()]);
        assert!(!facts.remove("rocks", "iron"));
    }

    #[test]
    fn facts_parse_from_toml_tables() {
        let facts: Facts = toml::from_str(
            r#"
            [flags]
            bank_open = true
            [counters]
            logs = 3
            [lists]
            trees = ["oak_1", "oak_2"]
            "#,
        )
        .expect("parse");
        assert!(facts.flag("bank_open"));
        assert_eq!(facts.counter("logs"), 3);
        assert_eq!(facts.list("trees").len(), 2);
    }
}
