//! CLI command implementations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use taskloop::io::config::load_config;
use taskloop::io::scenario::load_scenario;
use tracing::info;

use crate::config::apply_overrides;
use crate::report::aggregate;
use crate::results::{RESULTS_DIR, file_sha256};
use crate::run::{SoakBatch, run_once};

/// Options for `soak run`.
#[derive(Debug, Clone, Default)]
pub struct SoakOptions {
    pub runs: u32,
    /// Seed of the first run; run `i` uses `seed + i`. Random when absent.
    pub seed: Option<u64>,
    /// Results name; defaults to the scenario file stem.
    pub name: Option<String>,
    /// Engine config file; `taskloop.toml` when absent.
    pub config: Option<std::path::PathBuf>,
    /// `key=value` engine config overrides.
    pub overrides: Vec<String>,
}

/// List result names that have at least one run.
pub fn list_results(repo_root: &Path) -> Result<()> {
    let base = repo_root.join(RESULTS_DIR);
    if !base.exists() {
        return Ok(());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(&base).with_context(|| format!("read {}", base.display()))? {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    for name in names {
        println!("{name}");
    }
    Ok(())
}

/// Run a scenario `runs` times with consecutive seeds.
pub fn run_scenario(repo_root: &Path, scenario_path: &Path, options: &SoakOptions) -> Result<()> {
    if options.runs == 0 {
        bail!("--runs must be at least 1");
    }
    let scenario = load_scenario(scenario_path).context("load scenario")?;
    let config_path = options
        .config
        .clone()
        .unwrap_or_else(|| repo_root.join(taskloop::io::config::DEFAULT_CONFIG_FILE));
    let base = load_config(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let config = apply_overrides(&base, &options.overrides)?;
    let name = match &options.name {
        Some(name) => name.clone(),
        None => default_name(scenario_path)?,
    };
    let scenario_hash = file_sha256(scenario_path)?;
    let first_seed = options.seed.unwrap_or_else(rand::random);
    let results_base = repo_root.join(RESULTS_DIR);

    let batch = SoakBatch {
        name: &name,
        scenario_path,
        scenario: &scenario,
        scenario_hash: &scenario_hash,
        config: &config,
        results_base: &results_base,
    };
    info!(name = %name, runs = options.runs, first_seed, "starting runs");
    for index in 1..=options.runs {
        let seed = first_seed.wrapping_add(u64::from(index - 1));
        let outcome = run_once(&batch, index, seed)?;
        println!(
            "run: name={} run_id={} seed={} outcome={:?} ticks={} results={}",
            name,
            outcome.run_id,
            seed,
            outcome.outcome,
            outcome
                .ticks
                .map_or_else(|| "-".to_string(), |ticks| ticks.to_string()),
            outcome.results_dir.display()
        );
    }
    Ok(())
}

/// Show aggregated results for a name.
pub fn report(repo_root: &Path, name: &str) -> Result<()> {
    let results_dir = repo_root.join(RESULTS_DIR).join(name);
    let (summary, warnings) = aggregate(&results_dir)?;
    println!("report: name={} runs={}", name, summary.runs);
    println!(
        "report: success={} ({:.1}%) fail={} ({:.1}%) exhausted={} ({:.1}%) error={} ({:.1}%)",
        summary.success,
        summary.rate(summary.success),
        summary.fail,
        summary.rate(summary.fail),
        summary.exhausted,
        summary.rate(summary.exhausted),
        summary.error,
        summary.rate(summary.error)
    );
    if let Some(mean) = summary.mean_ticks {
        println!("report: mean_ticks={:.1}", mean);
    }
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.3}", avg);
    }
    for (reason, count) in &summary.failure_reasons {
        println!("report: reason {:?} x{}", reason, count);
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove all results for a name.
pub fn clean(repo_root: &Path, name: &str) -> Result<()> {
    let results_dir = repo_root.join(RESULTS_DIR).join(name);
    if results_dir.exists() {
        fs::remove_dir_all(&results_dir)
            .with_context(|| format!("remove {}", results_dir.display()))?;
    }
    println!("clean: name={} results={}", name, results_dir.display());
    Ok(())
}

fn default_name(scenario_path: &Path) -> Result<String> {
    scenario_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .with_context(|| format!("no file name in {}", scenario_path.display()))
}
