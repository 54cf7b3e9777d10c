//! Scenario runner for `taskloop run`.
//!
//! Loads the config and scenario, wires the simulated world to an executor
//! and a scheduler, and ticks until the root task settles or the tick budget
//! runs out.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument};

use crate::action::ActionExecutor;
use crate::core::types::Priority;
use crate::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, load_config};
use crate::io::executor::ThreadExecutor;
use crate::io::run_log::{RunLog, RunLogPaths};
use crate::io::scenario::{Scenario, load_scenario};
use crate::scheduler::{RunSummary, Scheduler, TickReport};
use crate::sim::{RuleBook, SimExecutor, SimWorld, build_root};
use crate::timing::Humanizer;
use crate::world::Facts;

/// Added to the run seed for the rule book so rule dice and task timing
/// draw from independent streams.
const RULE_SEED_OFFSET: u64 = 1;
/// Added to the run seed for realtime executor delays.
const EXECUTOR_SEED_OFFSET: u64 = 2;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub scenario_path: PathBuf,
    /// Defaults to `taskloop.toml` in the working directory.
    pub config_path: Option<PathBuf>,
    /// Overrides `timing.seed`.
    pub seed: Option<u64>,
    /// Overrides `max_ticks`.
    pub max_ticks: Option<u64>,
    /// Run actions on worker threads and pace ticks by `tick_interval_ms`.
    pub realtime: bool,
    pub log_dir: Option<PathBuf>,
}

/// Written as `summary.json` and printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub seed: u64,
    pub realtime: bool,
    pub max_ticks: u64,
    #[serde(flatten)]
    pub summary: RunSummary,
    pub world: Facts,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub log: Option<RunLogPaths>,
}

/// Load config and scenario from disk, then run.
pub fn run_scenario<F: FnMut(&TickReport)>(options: &RunOptions, on_tick: F) -> Result<RunOutcome> {
    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let base = load_config(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let scenario = load_scenario(&options.scenario_path)?;
    run_loaded(&scenario, &base, options, on_tick)
}

/// Run an already loaded scenario on top of `base`.
#[instrument(skip_all, fields(scenario = %scenario.scenario.name, realtime = options.realtime))]
pub fn run_loaded<F: FnMut(&TickReport)>(
    scenario: &Scenario,
    base: &EngineConfig,
    options: &RunOptions,
    mut on_tick: F,
) -> Result<RunOutcome> {
    let mut cfg = scenario.engine_config(base)?;
    let seed = options
        .seed
        .or(cfg.timing.seed)
        .unwrap_or_else(rand::random);
    cfg.timing.seed = Some(seed);
    let max_ticks = options.max_ticks.unwrap_or(cfg.max_ticks);

    let mut world = SimWorld::new(scenario.world.clone(), scenario.events.clone());
    let book = RuleBook::new(
        scenario.rules.clone(),
        Humanizer::seeded(seed.wrapping_add(RULE_SEED_OFFSET)),
    );
    let executor: Box<dyn ActionExecutor> = if options.realtime {
        Box::new(ThreadExecutor::new(
            book.into_backend(world.handle()),
            Humanizer::new(
                Some(seed.wrapping_add(EXECUTOR_SEED_OFFSET)),
                cfg.timing.scale,
            ),
        ))
    } else {
        Box::new(SimExecutor::new(book, world.handle()))
    };

    let mut scheduler = Scheduler::new(cfg.scheduler_settings(), executor, cfg.humanizer());
    let root = build_root(&scenario.task)
        .with_context(|| format!("build task tree of {}", scenario.scenario.name))?;
    scheduler.submit(root, Priority::Normal)?;

    let mut log = options.log_dir.as_deref().map(RunLog::create).transpose()?;
    let interval = Duration::from_millis(cfg.tick_interval_ms);
    info!(seed, max_ticks, "run started");

    let summary = scheduler.run(&mut world, max_ticks, |report| {
        if let Some(log) = log.as_mut() {
            log.record_tick(report)?;
        }
        on_tick(report);
        if options.realtime {
            thread::sleep(interval);
        }
        Ok(())
    })?;
    info!(status = ?summary.status, ticks = summary.ticks, "run finished");

    let report = RunReport {
        scenario: scenario.scenario.name.clone(),
        seed,
        realtime: options.realtime,
        max_ticks,
        summary,
        world: world.facts().clone(),
    };
    let log = match log {
        Some(log) => Some(log.finish(&report)?),
        None => None,
    };
    Ok(RunOutcome { report, log })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::scenario::parse_scenario;
    use crate::scheduler::RunStatus;
    use crate::test_support::temp_scenario;

    const DOOR: &str = r#"
[scenario]
name = "door"

[world.flags]
door_open = false

[[rules]]
verb = "click"
target = "door"
delay_ticks = [2, 2]
effects = [{ op = "set", flag = "door_open" }]

[task]
type = "interact"
verb = "click"
target = "door"
confirm = { flag = "door_open" }
"#;

    fn options(seed: u64) -> RunOptions {
        RunOptions {
            seed: Some(seed),
            ..RunOptions::default()
        }
    }

    #[test]
    fn simulated_run_completes_and_reports_world() {
        let scenario = parse_scenario(DOOR).expect("scenario");
        let outcome =
            run_loaded(&scenario, &EngineConfig::default(), &options(7), |_| {}).expect("run");

        assert_eq!(outcome.report.summary.status, RunStatus::Completed);
        assert_eq!(outcome.report.seed, 7);
        assert!(outcome.report.world.flags["door_open"]);
        assert!(outcome.log.is_none());
    }

    #[test]
    fn same_seed_gives_same_tick_count() {
        let scenario = parse_scenario(DOOR).expect("scenario");
        let cfg = EngineConfig::default();
        let first = run_loaded(&scenario, &cfg, &options(11), |_| {}).expect("first");
        let second = run_loaded(&scenario, &cfg, &options(11), |_| {}).expect("second");
        assert_eq!(first.report.summary.ticks, second.report.summary.ticks);
        assert_eq!(first.report.world, second.report.world);
    }

    #[test]
    fn max_ticks_override_exhausts_run() {
        let scenario = parse_scenario(
            r#"
[scenario]
name = "long wait"

[task]
type = "wait"
ticks = 50
"#,
        )
        .expect("scenario");
        let run = RunOptions {
            max_ticks: Some(10),
            ..options(3)
        };
        let outcome = run_loaded(&scenario, &EngineConfig::default(), &run, |_| {}).expect("run");
        assert_eq!(outcome.report.summary.status, RunStatus::Exhausted);
        assert_eq!(outcome.report.summary.ticks, 10);
    }

    #[test]
    fn log_dir_receives_ticks_and_summary() {
        let (dir, path) = temp_scenario(DOOR);
        let run = RunOptions {
            scenario_path: path,
            config_path: Some(dir.path().join("missing.toml")),
            seed: Some(5),
            log_dir: Some(dir.path().join("logs")),
            ..RunOptions::default()
        };
        let mut ticks = 0u64;
        let outcome = run_scenario(&run, |_| ticks += 1).expect("run");

        let paths = outcome.log.expect("log paths");
        let lines = std::fs::read_to_string(&paths.ticks_path).expect("ticks");
        assert_eq!(lines.lines().count() as u64, ticks);
        let summary: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&paths.summary_path).expect("summary"),
        )
        .expect("summary json");
        assert_eq!(summary["status"], "completed");
        assert_eq!(summary["seed"], 5);
        assert_eq!(summary["scenario"], "door");
    }
}
