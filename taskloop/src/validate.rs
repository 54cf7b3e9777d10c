//! Validation for `taskloop validate`: config, scenario schema, scenario
//! invariants and a dry build of the task tree.

use std::path::Path;

use anyhow::{Context, Result};

use crate::io::config::load_config;
use crate::io::scenario::{TaskKind, TaskSpec, load_scenario};
use crate::sim::build_root;

/// What a valid scenario declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub name: String,
    /// Task nodes in the tree, root included.
    pub tasks: usize,
    pub rules: usize,
    pub events: usize,
}

pub fn validate_scenario(scenario_path: &Path, config_path: &Path) -> Result<ValidateOutcome> {
    let base = load_config(config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let scenario = load_scenario(scenario_path)?;
    scenario.engine_config(&base)?;
    build_root(&scenario.task)
        .with_context(|| format!("build task tree of {}", scenario.scenario.name))?;
    Ok(ValidateOutcome {
        name: scenario.scenario.name.clone(),
        tasks: count_tasks(&scenario.task),
        rules: scenario.rules.len(),
        events: scenario.events.len(),
    })
}

fn count_tasks(spec: &TaskSpec) -> usize {
    let nested = match &spec.kind {
        TaskKind::Sequence { steps, .. } => steps.iter().map(count_tasks).sum(),
        TaskKind::Branch {
            then, otherwise, ..
        } => count_tasks(then) + otherwise.as_deref().map_or(0, count_tasks),
        TaskKind::Quota { restock, .. } => restock.as_deref().map_or(0, count_tasks),
        TaskKind::Wait { .. } | TaskKind::Interact { .. } => 0,
    };
    1 + nested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_scenario;

    #[test]
    fn counts_nested_tasks() {
        let (dir, path) = temp_scenario(
            r#"
[scenario]
name = "nested"

[[rules]]
verb = "click"
target = "door"

[task]
type = "sequence"
label = "outer"

[[task.steps]]
type = "wait"
ticks = 2

[[task.steps]]
type = "branch"
label = "door?"
when = { flag = "door_open" }
then = { type = "wait", ticks = 1 }
else = { type = "interact", verb = "click", target = "door" }
"#,
        );
        let outcome =
            validate_scenario(&path, &dir.path().join("taskloop.toml")).expect("validate");
        assert_eq!(
            outcome,
            ValidateOutcome {
                name: "nested".to_string(),
                tasks: 5,
                rules: 1,
                events: 0,
            }
        );
    }

    #[test]
    fn bad_config_override_is_reported() {
        let (dir, path) = temp_scenario(
            r#"
[scenario]
name = "bad config"

[config]
queue_limit = 0

[task]
type = "wait"
ticks = 1
"#,
        );
        let err = validate_scenario(&path, &dir.path().join("taskloop.toml"))
            .expect_err("invalid config");
        assert!(format!("{err:#}").contains("queue_limit must be > 0"));
    }
}
