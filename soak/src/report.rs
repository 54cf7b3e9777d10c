use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::outcome::Outcome;
use crate::results::read_meta;

#[derive(Debug, Default, PartialEq)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub exhausted: usize,
    pub error: usize,
    /// Mean ticks over runs that produced a summary.
    pub mean_ticks: Option<f64>,
    pub avg_duration_secs: Option<f64>,
    /// Distinct scenario hashes seen; more than one means the file changed
    /// between batches.
    pub scenario_hashes: usize,
    pub failure_reasons: BTreeMap<String, usize>,
}

impl ReportSummary {
    /// Share of runs with `count` as a percentage.
    pub fn rate(&self, count: usize) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        count as f64 * 100.0 / self.runs as f64
    }
}

pub fn load_run_dirs(name_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !name_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(name_results_dir)
        .with_context(|| format!("read {}", name_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(name_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut hashes = Vec::new();
    let mut tick_runs = 0usize;

    for run_dir in load_run_dirs(name_results_dir)? {
        let meta = match read_meta(&run_dir.join("meta.json")) {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        match meta.outcome {
            Outcome::Success => summary.success += 1,
            Outcome::Fail => summary.fail += 1,
            Outcome::Exhausted => summary.exhausted += 1,
            Outcome::Error => summary.error += 1,
        }

        summary.avg_duration_secs = Some(running_mean(
            summary.avg_duration_secs,
            meta.duration_secs,
            summary.runs,
        ));
        if let Some(ticks) = meta.ticks {
            tick_runs += 1;
            summary.mean_ticks = Some(running_mean(summary.mean_ticks, ticks as f64, tick_runs));
        }

        if !hashes.contains(&meta.scenario_hash) {
            hashes.push(meta.scenario_hash.clone());
        }
        let reason = meta.failure_reason.or(meta.error);
        if let Some(reason) = reason {
            *summary.failure_reasons.entry(reason).or_insert(0) += 1;
        }
    }

    summary.scenario_hashes = hashes.len();
    if summary.scenario_hashes > 1 {
        warnings.push(format!(
            "runs cover {} different versions of the scenario file",
            summary.scenario_hashes
        ));
    }
    Ok((summary, warnings))
}

fn running_mean(mean: Option<f64>, value: f64, count: usize) -> f64 {
    match mean {
        None => value,
        Some(mean) => (mean * (count as f64 - 1.0) + value) / count as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{SoakMeta, write_meta};
    use tempfile::tempdir;

    fn meta(outcome: Outcome, ticks: Option<u64>, reason: Option<&str>, hash: &str) -> SoakMeta {
        SoakMeta {
            name: "door".to_string(),
            run_id: "run".to_string(),
            scenario: "door.toml".to_string(),
            scenario_hash: hash.to_string(),
            seed: 1,
            outcome,
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: 1.0,
            ticks,
            failure_reason: reason.map(str::to_string),
            violations: 0,
            error: None,
        }
    }

    fn write_run(base: &Path, dir: &str, meta: &SoakMeta) {
        let run = base.join(dir);
        fs::create_dir_all(&run).expect("run dir");
        write_meta(&run.join("meta.json"), meta).expect("write meta");
    }

    #[test]
    fn aggregates_outcomes_and_mean_ticks() {
        let temp = tempdir().expect("tempdir");
        write_run(temp.path(), "run1", &meta(Outcome::Success, Some(10), None, "a"));
        write_run(temp.path(), "run2", &meta(Outcome::Fail, Some(30), Some("timeout"), "a"));
        write_run(temp.path(), "run3", &meta(Outcome::Exhausted, Some(50), None, "a"));
        write_run(temp.path(), "run4", &meta(Outcome::Error, None, None, "a"));

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");

        assert!(warnings.is_empty());
        assert_eq!(summary.runs, 4);
        assert_eq!(
            (summary.success, summary.fail, summary.exhausted, summary.error),
            (1, 1, 1, 1)
        );
        assert_eq!(summary.mean_ticks, Some(30.0));
        assert_eq!(summary.rate(summary.success), 25.0);
        assert_eq!(summary.failure_reasons.get("timeout"), Some(&1));
    }

    #[test]
    fn broken_meta_is_skipped_with_warning() {
        let temp = tempdir().expect("tempdir");
        write_run(temp.path(), "run1", &meta(Outcome::Success, Some(4), None, "a"));
        fs::create_dir_all(temp.path().join("run2")).expect("run2");
        fs::write(temp.path().join("run2/meta.json"), "{").expect("broken meta");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.runs, 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("meta.json invalid"));
    }

    #[test]
    fn changed_scenario_is_flagged() {
        let temp = tempdir().expect("tempdir");
        write_run(temp.path(), "run1", &meta(Outcome::Success, Some(4), None, "a"));
        write_run(temp.path(), "run2", &meta(Outcome::Success, Some(4), None, "b"));

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.scenario_hashes, 2);
        assert!(warnings[0].contains("2 different versions"));
    }

    #[test]
    fn missing_dir_gives_empty_report() {
        let temp = tempdir().expect("tempdir");
        let (summary, warnings) = aggregate(&temp.path().join("nothing")).expect("aggregate");
        assert_eq!(summary, ReportSummary::default());
        assert!(warnings.is_empty());
    }
}
