//! Scenario files: initial world, simulated action rules, scheduled events
//! and the task tree to run.
//!
//! Loading validates the file against the embedded JSON Schema first, then
//! deserializes it and checks the semantic invariants the schema cannot
//! express (mutually exclusive fields, bounded nesting, sane ranges).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{ActionErrorKind, ActionRequest};
use crate::core::exclusion::ExclusionPolicy;
use crate::io::config::EngineConfig;
use crate::workflows::sequence::FailurePolicy;
use crate::world::{Facts, Predicate, WorldView};

/// JSON Schema for scenario files (draft 2020-12).
pub const SCENARIO_SCHEMA: &str = include_str!("../../schemas/scenario/v1.schema.json");

/// Deepest task nesting a scenario may declare.
pub const MAX_TASK_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub scenario: ScenarioMeta,
    #[serde(default)]
    pub world: Facts,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub events: Vec<WorldEvent>,
    pub task: TaskSpec,
    /// Partial `EngineConfig` applied on top of the loaded config.
    #[serde(default)]
    pub config: Option<toml::Table>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Scenario {
    /// `base` with this scenario's `[config]` overrides applied.
    pub fn engine_config(&self, base: &EngineConfig) -> Result<EngineConfig> {
        match &self.config {
            Some(overrides) => base
                .merged(overrides)
                .with_context(|| format!("apply [config] of scenario {}", self.scenario.name)),
            None => Ok(base.clone()),
        }
    }
}

/// Boolean query over world facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    All {
        all: Vec<Condition>,
    },
    Any {
        any: Vec<Condition>,
    },
    Not {
        not: Box<Condition>,
    },
    Flag {
        flag: String,
        #[serde(default = "default_true")]
        is: bool,
    },
    Counter {
        counter: String,
        #[serde(default)]
        at_least: Option<i64>,
        #[serde(default)]
        at_most: Option<i64>,
    },
    List {
        list: String,
        #[serde(default)]
        empty: Option<bool>,
        #[serde(default)]
        contains: Option<String>,
    },
}

impl Condition {
    pub fn holds(&self, world: &dyn WorldView) -> bool {
        match self {
            Condition::All { all } => all.iter().all(|condition| condition.holds(world)),
            Condition::Any { any } => any.iter().any(|condition| condition.holds(world)),
            Condition::Not { not } => !not.holds(world),
            Condition::Flag { flag, is } => world.flag(flag) == *is,
            Condition::Counter {
                counter,
                at_least,
                at_most,
            } => {
                let value = world.counter(counter);
                at_least.is_none_or(|min| value >= min) && at_most.is_none_or(|max| value <= max)
            }
            Condition::List {
                list,
                empty,
                contains,
            } => {
                let items = world.list(list);
                empty.is_none_or(|empty| items.is_empty() == empty)
                    && contains
                        .as_ref()
                        .is_none_or(|item| items.iter().any(|existing| existing == item))
            }
        }
    }

    pub fn to_predicate(&self) -> Predicate {
        let condition = self.clone();
        Box::new(move |world| condition.holds(world))
    }

    /// Short human label, used in task descriptions.
    pub fn label(&self) -> String {
        match self {
            Condition::All { all } => join_labels(all, " and "),
            Condition::Any { any } => join_labels(any, " or "),
            Condition::Not { not } => format!("not ({})", not.label()),
            Condition::Flag { flag, is: true } => flag.clone(),
            Condition::Flag { flag, is: false } => format!("!{flag}"),
            Condition::Counter {
                counter,
                at_least,
                at_most,
            } => match (at_least, at_most) {
                (Some(min), Some(max)) => format!("{min}<={counter}<={max}"),
                (Some(min), None) => format!("{counter}>={min}"),
                (None, Some(max)) => format!("{counter}<={max}"),
                (None, None) => counter.clone(),
            },
            Condition::List { list, contains, .. } => match contains {
                Some(item) => format!("{item} in {list}"),
                None => list.clone(),
            },
        }
    }
}

fn join_labels(conditions: &[Condition], separator: &str) -> String {
    conditions
        .iter()
        .map(Condition::label)
        .collect::<Vec<_>>()
        .join(separator)
}

fn default_true() -> bool {
    true
}

/// Change to world facts applied by a rule or an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Effect {
    Set {
        flag: String,
        #[serde(default = "default_true")]
        value: bool,
    },
    Add {
        counter: String,
        #[serde(default = "default_add")]
        by: i64,
    },
    Push {
        list: String,
        item: String,
    },
    Remove {
        list: String,
        item: String,
    },
}

fn default_add() -> i64 {
    1
}

impl Effect {
    pub fn apply(&self, facts: &mut Facts) {
        match self {
            Effect::Set { flag, value } => facts.set_flag(flag, *value),
            Effect::Add { counter, by } => {
                facts.add(counter, *by);
            }
            Effect::Push { list, item } => facts.push(list, item),
            Effect::Remove { list, item } => {
                facts.remove(list, item);
            }
        }
    }
}

/// How the simulated executor answers actions matching `verb`/`target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub verb: String,
    /// Exact target, or a prefix when it ends with `*`. Absent matches any.
    #[serde(default)]
    pub target: Option<String>,
    /// The action is rejected unless this holds when it resolves.
    #[serde(default)]
    pub requires: Option<Condition>,
    #[serde(default)]
    pub fail_chance: f64,
    /// The first N matching actions fail regardless of `fail_chance`.
    #[serde(default)]
    pub fail_first: u32,
    #[serde(default = "default_error")]
    pub error: ActionErrorKind,
    #[serde(default)]
    pub message: Option<String>,
    /// Inclusive `[min, max]` ticks until the action resolves.
    #[serde(default = "default_delay_ticks")]
    pub delay_ticks: [u64; 2],
    #[serde(default)]
    pub effects: Vec<Effect>,
}

fn default_error() -> ActionErrorKind {
    ActionErrorKind::Transient
}

fn default_delay_ticks() -> [u64; 2] {
    [1, 3]
}

impl Rule {
    pub fn matches(&self, request: &ActionRequest) -> bool {
        if self.verb != request.verb() {
            return false;
        }
        match (&self.target, request.target()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(pattern), Some(target)) => match pattern.strip_suffix('*') {
                Some(prefix) => target.starts_with(prefix),
                None => pattern == target,
            },
        }
    }

    pub fn failure_message(&self, request: &ActionRequest) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("{request} failed"))
    }
}

/// Fact changes applied at the start of tick `at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldEvent {
    pub at: u64,
    #[serde(default)]
    pub note: Option<String>,
    pub effects: Vec<Effect>,
}

/// Declarative task tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(flatten)]
    pub kind: TaskKind,
    #[serde(default)]
    pub timeout_ticks: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub inactivity_ticks: Option<u64>,
    /// Scheduler retries; only meaningful on the root task.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceModeSpec {
    #[default]
    Once,
    Loop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    Wait {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        until: Option<Condition>,
        #[serde(default)]
        ticks: Option<u64>,
        #[serde(default)]
        unless: Option<Condition>,
        #[serde(default = "default_true")]
        idle_drift: bool,
    },
    Interact {
        verb: String,
        target: String,
        #[serde(default = "default_max_attempts")]
        max_attempts: u32,
        #[serde(default)]
        confirm: Option<Condition>,
        #[serde(default)]
        confirm_within: Option<u32>,
    },
    Sequence {
        label: String,
        steps: Vec<TaskSpec>,
        #[serde(default)]
        mode: SequenceModeSpec,
        #[serde(default)]
        max_iterations: Option<u32>,
        #[serde(default)]
        until: Option<Condition>,
        #[serde(default)]
        on_failure: FailurePolicy,
    },
    Branch {
        label: String,
        when: Condition,
        then: Box<TaskSpec>,
        #[serde(default, rename = "else")]
        otherwise: Option<Box<TaskSpec>>,
    },
    Quota {
        label: String,
        verb: String,
        units: u64,
        #[serde(default)]
        candidates: Option<Vec<String>>,
        #[serde(default)]
        candidates_list: Option<String>,
        #[serde(default)]
        yield_counter: Option<String>,
        #[serde(default)]
        confirm_within: Option<u32>,
        #[serde(default)]
        select_wait: Option<u32>,
        #[serde(default)]
        exclusion: Option<ExclusionPolicy>,
        #[serde(default)]
        restock_flag: Option<String>,
        #[serde(default)]
        restock: Option<Box<TaskSpec>>,
    },
}

fn default_max_attempts() -> u32 {
    3
}

impl TaskKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            TaskKind::Wait { .. } => "wait",
            TaskKind::Interact { .. } => "interact",
            TaskKind::Sequence { .. } => "sequence",
            TaskKind::Branch { .. } => "branch",
            TaskKind::Quota { .. } => "quota",
        }
    }
}

/// Read, schema-validate, deserialize and check a scenario file.
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read scenario {}", path.display()))?;
    parse_scenario(&contents).with_context(|| format!("load scenario {}", path.display()))
}

pub fn parse_scenario(contents: &str) -> Result<Scenario> {
    let raw: toml::Table = toml::from_str(contents).context("parse scenario toml")?;
    let value = serde_json::to_value(&raw).context("convert scenario to json")?;
    validate_schema(&value)?;
    let scenario: Scenario = toml::from_str(contents).context("deserialize scenario")?;
    let errors = check_scenario(&scenario);
    if !errors.is_empty() {
        return Err(anyhow!("scenario invariants failed: {}", errors.join("; ")));
    }
    Ok(scenario)
}

fn validate_schema(scenario: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(SCENARIO_SCHEMA).context("parse scenario schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(scenario) {
        let messages = compiled
            .iter_errors(scenario)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "scenario schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Semantic checks beyond the schema. Returns every violation found.
pub fn check_scenario(scenario: &Scenario) -> Vec<String> {
    let mut errors = Vec::new();
    if scenario.scenario.name.trim().is_empty() {
        errors.push("scenario.name must not be empty".to_string());
    }
    for (index, rule) in scenario.rules.iter().enumerate() {
        let path = format!("rules[{index}]");
        if !(0.0..=1.0).contains(&rule.fail_chance) {
            errors.push(format!("{path}.fail_chance must be within [0, 1]"));
        }
        let [min, max] = rule.delay_ticks;
        if min == 0 || min > max {
            errors.push(format!("{path}.delay_ticks must be [min, max] with 1 <= min <= max"));
        }
        if let Some(condition) = &rule.requires {
            check_condition(condition, &format!("{path}.requires"), &mut errors);
        }
    }
    for (index, event) in scenario.events.iter().enumerate() {
        if event.at == 0 {
            errors.push(format!("events[{index}].at must be >= 1"));
        }
    }
    errors.extend(check_scenario_task(&scenario.task));
    errors
}

/// Semantic checks for a task tree on its own.
pub fn check_scenario_task(spec: &TaskSpec) -> Vec<String> {
    let mut errors = Vec::new();
    check_task(spec, "task", 1, &mut errors);
    errors
}

fn check_task(spec: &TaskSpec, path: &str, depth: usize, errors: &mut Vec<String>) {
    if depth > MAX_TASK_DEPTH {
        errors.push(format!("{path}: tasks nest deeper than {MAX_TASK_DEPTH} levels"));
        return;
    }
    if spec.timeout_ticks.is_some() && spec.timeout_secs.is_some() {
        errors.push(format!("{path}: set timeout_ticks or timeout_secs, not both"));
    }
    if spec.timeout_ticks == Some(0) || spec.timeout_secs == Some(0) {
        errors.push(format!("{path}: timeout must be > 0"));
    }

    match &spec.kind {
        TaskKind::Wait {
            until,
            ticks,
            unless,
            ..
        } => {
            match (until, ticks) {
                (Some(_), Some(_)) | (None, None) => {
                    errors.push(format!("{path}: wait needs exactly one of until or ticks"));
                }
                (None, Some(0)) => errors.push(format!("{path}.ticks must be > 0")),
                _ => {}
            }
            if let Some(until) = until {
                check_condition(until, &format!("{path}.until"), errors);
            }
            if let Some(unless) = unless {
                check_condition(unless, &format!("{path}.unless"), errors);
            }
        }
        TaskKind::Interact {
            max_attempts,
            confirm,
            ..
        } => {
            if *max_attempts == 0 {
                errors.push(format!("{path}.max_attempts must be >= 1"));
            }
            if let Some(confirm) = confirm {
                check_condition(confirm, &format!("{path}.confirm"), errors);
            }
        }
        TaskKind::Sequence {
            steps,
            mode,
            max_iterations,
            until,
            ..
        } => {
            if steps.is_empty() {
                errors.push(format!("{path}.steps must not be empty"));
            }
            if *mode == SequenceModeSpec::Loop && max_iterations.is_none() && until.is_none() {
                errors.push(format!("{path}: loop needs max_iterations or until"));
            }
            if *max_iterations == Some(0) {
                errors.push(format!("{path}.max_iterations must be > 0"));
            }
            if let Some(until) = until {
                check_condition(until, &format!("{path}.until"), errors);
            }
            for (index, step) in steps.iter().enumerate() {
                check_task(step, &format!("{path}.steps[{index}]"), depth + 1, errors);
            }
        }
        TaskKind::Branch {
            when,
            then,
            otherwise,
            ..
        } => {
            check_condition(when, &format!("{path}.when"), errors);
            check_task(then, &format!("{path}.then"), depth + 1, errors);
            if let Some(otherwise) = otherwise {
                check_task(otherwise, &format!("{path}.else"), depth + 1, errors);
            }
        }
        TaskKind::Quota {
            units,
            candidates,
            candidates_list,
            exclusion,
            restock_flag,
            restock,
            ..
        } => {
            if *units == 0 {
                errors.push(format!("{path}.units must be > 0"));
            }
            match (candidates, candidates_list) {
                (Some(_), Some(_)) | (None, None) => errors.push(format!(
                    "{path}: quota needs exactly one of candidates or candidates_list"
                )),
                (Some(items), None) if items.is_empty() => {
                    errors.push(format!("{path}.candidates must not be empty"));
                }
                _ => {}
            }
            if exclusion.is_some_and(|policy| policy.threshold == 0) {
                errors.push(format!("{path}.exclusion.threshold must be >= 1"));
            }
            match (restock_flag, restock) {
                (Some(_), None) | (None, Some(_)) => errors.push(format!(
                    "{path}: restock_flag and restock must be set together"
                )),
                (Some(_), Some(restock)) => {
                    check_task(restock, &format!("{path}.restock"), depth + 1, errors);
                }
                (None, None) => {}
            }
        }
    }
}

fn check_condition(condition: &Condition, path: &str, errors: &mut Vec<String>) {
    match condition {
        Condition::All { all: items } | Condition::Any { any: items } => {
            if items.is_empty() {
                errors.push(format!("{path}: condition group must not be empty"));
            }
            for (index, item) in items.iter().enumerate() {
                check_condition(item, &format!("{path}[{index}]"), errors);
            }
        }
        Condition::Not { not } => check_condition(not, &format!("{path}.not"), errors),
        Condition::Counter {
            at_least, at_most, ..
        } => match (at_least, at_most) {
            (None, None) => errors.push(format!("{path}: counter needs at_least or at_most")),
            (Some(min), Some(max)) if min > max => {
                errors.push(format!("{path}: at_least must not exceed at_most"));
            }
            _ => {}
        },
        Condition::Flag { .. } | Condition::List { .. } => {}
    }
}
