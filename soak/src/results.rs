//! Per-run result persistence.
//!
//! Every soak run gets `soak-results/<name>/<run-id>/` holding the engine's
//! run log (`ticks.jsonl`, `summary.json`) and a `meta.json` describing the
//! run for later aggregation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::outcome::Outcome;

/// Root directory for soak results, relative to the working directory.
pub const RESULTS_DIR: &str = "soak-results";

/// Metadata for one soak run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SoakMeta {
    pub name: String,
    pub run_id: String,
    pub scenario: String,
    /// SHA-256 of the scenario file, so reports can tell edited scenarios apart.
    pub scenario_hash: String,
    pub seed: u64,
    pub outcome: Outcome,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    /// Ticks the run took; absent when it errored before ticking.
    pub ticks: Option<u64>,
    pub failure_reason: Option<String>,
    pub violations: usize,
    pub error: Option<String>,
}

/// Timing and identity of a finished run, before its outcome is known.
#[derive(Debug, Clone)]
pub struct RunStamp {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunStamp {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

pub fn results_dir(base_dir: &Path, name: &str, run_id: &str) -> PathBuf {
    base_dir.join(name).join(run_id)
}

/// Run ids sort by start time; `index` keeps runs of one batch apart.
pub fn run_id(started_at: DateTime<Utc>, index: u32) -> String {
    format!("run-{}-{index:04}", started_at.format("%Y%m%d_%H%M%S"))
}

pub fn write_meta(path: &Path, meta: &SoakMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    debug!(path = %path.display(), outcome = ?meta.outcome, "meta written");
    Ok(())
}

pub fn read_meta(path: &Path) -> Result<SoakMeta> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).context("parse meta")
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}
