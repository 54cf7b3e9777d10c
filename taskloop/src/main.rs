//! Tick-driven task engine CLI.
//!
//! Runs declarative scenarios (`*.toml`) against a simulated world and
//! reports how the task tree settled.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use taskloop::exit_codes;
use taskloop::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, write_config};
use taskloop::logging;
use taskloop::run::{RunOptions, run_scenario};
use taskloop::validate::validate_scenario;

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Tick-driven task engine for automation agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario until its task settles or the tick budget runs out.
    Run {
        scenario: PathBuf,
        /// Engine config (defaults to `taskloop.toml` if present).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Seed for timing and rule dice; random when omitted.
        #[arg(long)]
        seed: Option<u64>,
        /// Override `max_ticks`.
        #[arg(long)]
        max_ticks: Option<u64>,
        /// Pace ticks by `tick_interval_ms` and run actions on worker threads.
        #[arg(long)]
        realtime: bool,
        /// Write `ticks.jsonl` and `summary.json` here.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Check a scenario against the schema and semantic invariants.
    Validate {
        scenario: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a default `taskloop.toml`.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            scenario,
            config,
            seed,
            max_ticks,
            realtime,
            log_dir,
        } => cmd_run(RunOptions {
            scenario_path: scenario,
            config_path: config,
            seed,
            max_ticks,
            realtime,
            log_dir,
        }),
        Command::Validate { scenario, config } => cmd_validate(&scenario, config),
        Command::InitConfig { force } => cmd_init_config(force),
    }
}

fn cmd_run(options: RunOptions) -> Result<i32> {
    let outcome = run_scenario(&options, |_| {})?;
    let report = &outcome.report;
    println!(
        "{}: {} after {} ticks (seed {})",
        report.scenario,
        report.summary.status.as_str(),
        report.summary.ticks,
        report.seed
    );
    for task in &report.summary.outcomes {
        match &task.failure_reason {
            Some(reason) => println!("  {} failed: {}", task.description, reason),
            None => println!("  {} completed", task.description),
        }
    }
    for violation in &report.summary.violations {
        eprintln!("invariant violation: {violation}");
    }
    if let Some(log) = &outcome.log {
        println!("run log: {}", log.dir.display());
    }
    Ok(exit_codes::for_status(report.summary.status))
}

fn cmd_validate(scenario: &Path, config: Option<PathBuf>) -> Result<i32> {
    let config = config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let outcome = validate_scenario(scenario, &config)?;
    println!(
        "{}: ok ({} tasks, {} rules, {} events)",
        outcome.name, outcome.tasks, outcome.rules, outcome.events
    );
    Ok(exit_codes::OK)
}

fn cmd_init_config(force: bool) -> Result<i32> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &EngineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}
