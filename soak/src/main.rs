//! Repeated-run harness for taskloop scenarios.
//!
//! Runs one scenario many times with consecutive seeds, keeps per-run logs
//! and metadata under `soak-results/`, and aggregates outcome rates.

mod cli;
mod config;
mod outcome;
mod report;
mod results;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::cli::SoakOptions;

#[derive(Parser)]
#[command(name = "soak", version, about = "Repeated-run harness for taskloop scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List result names under `soak-results/`.
    List,
    Run {
        scenario: PathBuf,
        #[arg(long, default_value_t = 1)]
        runs: u32,
        /// Seed of the first run; later runs add their index.
        #[arg(long)]
        seed: Option<u64>,
        /// Results name (defaults to the scenario file stem).
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Engine config override, e.g. `--set max_ticks=500`.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    Report {
        name: String,
    },
    Clean {
        name: String,
    },
}

fn main() -> Result<()> {
    taskloop::logging::init();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Command::List => cli::list_results(&repo_root),
        Command::Run {
            scenario,
            runs,
            seed,
            name,
            config,
            overrides,
        } => cli::run_scenario(
            &repo_root,
            &scenario,
            &SoakOptions {
                runs,
                seed,
                name,
                config,
                overrides,
            },
        ),
        Command::Report { name } => cli::report(&repo_root, &name),
        Command::Clean { name } => cli::clean(&repo_root, &name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "soak",
            "run",
            "door.toml",
            "--runs",
            "20",
            "--set",
            "max_ticks=50",
            "--set",
            "timing.scale=0",
        ]);
        match cli.command {
            Command::Run {
                runs, overrides, ..
            } => {
                assert_eq!(runs, 20);
                assert_eq!(overrides, vec!["max_ticks=50", "timing.scale=0"]);
            }
            _ => panic!("expected run"),
        }
    }
}
