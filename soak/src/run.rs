//! Single soak run: execute the scenario in-process with one seed and
//! persist its logs and metadata.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use taskloop::io::config::EngineConfig;
use taskloop::io::scenario::Scenario;
use taskloop::run::{RunOptions, run_loaded};
use tracing::{debug, info, instrument, warn};

use crate::outcome::{Outcome, classify_outcome};
use crate::results::{RunStamp, SoakMeta, results_dir, run_id, write_meta};

/// Everything shared by the runs of one batch.
#[derive(Debug)]
pub struct SoakBatch<'a> {
    pub name: &'a str,
    pub scenario_path: &'a Path,
    pub scenario: &'a Scenario,
    pub scenario_hash: &'a str,
    pub config: &'a EngineConfig,
    pub results_base: &'a Path,
}

/// Result of one soak run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub results_dir: PathBuf,
    pub outcome: Outcome,
    pub ticks: Option<u64>,
}

/// Run the scenario once with `seed`. Engine errors are recorded as an
/// `error` outcome rather than aborting the batch.
#[instrument(skip_all, fields(name = %batch.name, seed))]
pub fn run_once(batch: &SoakBatch<'_>, index: u32, seed: u64) -> Result<RunOutcome> {
    let started_at = Utc::now();
    let run_id = run_id(started_at, index);
    let dir = results_dir(batch.results_base, batch.name, &run_id);
    fs::create_dir_all(&dir).with_context(|| format!("create results dir {}", dir.display()))?;

    let options = RunOptions {
        scenario_path: batch.scenario_path.to_path_buf(),
        seed: Some(seed),
        log_dir: Some(dir.clone()),
        ..RunOptions::default()
    };
    debug!(run_id, "run started");
    let result = run_loaded(batch.scenario, batch.config, &options, |_| {});
    let stamp = RunStamp {
        started_at,
        finished_at: Utc::now(),
    };

    let (outcome, ticks, failure_reason, violations, error) = match &result {
        Ok(run) => {
            let summary = &run.report.summary;
            let failure_reason = summary
                .outcomes
                .iter()
                .find_map(|task| task.failure_reason.clone());
            (
                classify_outcome(Some(summary.status), summary.violations.len()),
                Some(summary.ticks),
                failure_reason,
                summary.violations.len(),
                None,
            )
        }
        Err(err) => {
            warn!(run_id, error = %format!("{err:#}"), "run errored");
            (classify_outcome(None, 0), None, None, 0, Some(format!("{err:#}")))
        }
    };

    let meta = SoakMeta {
        name: batch.name.to_string(),
        run_id: run_id.clone(),
        scenario: batch.scenario_path.display().to_string(),
        scenario_hash: batch.scenario_hash.to_string(),
        seed,
        outcome,
        start_time: stamp.started_at.to_rfc3339(),
        end_time: stamp.finished_at.to_rfc3339(),
        duration_secs: stamp.duration_secs(),
        ticks,
        failure_reason,
        violations,
        error,
    };
    write_meta(&dir.join("meta.json"), &meta)?;
    info!(run_id, outcome = ?outcome, ticks = ?ticks, "run recorded");

    Ok(RunOutcome {
        run_id,
        results_dir: dir,
        outcome,
        ticks,
    })
}
