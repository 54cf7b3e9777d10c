//! Run artifacts written by `taskloop run --log-dir`.
//!
//! `ticks.jsonl` gets one [`TickReport`] per line while the run progresses;
//! `summary.json` is written once at the end. Both are independent of the
//! tracing output.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::scheduler::TickReport;

#[derive(Debug, Clone)]
pub struct RunLogPaths {
    pub dir: PathBuf,
    pub ticks_path: PathBuf,
    pub summary_path: PathBuf,
}

impl RunLogPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            ticks_path: dir.join("ticks.jsonl"),
            summary_path: dir.join("summary.json"),
        }
    }
}

/// Appends tick reports as JSON lines.
pub struct RunLog {
    paths: RunLogPaths,
    ticks: BufWriter<File>,
    written: u64,
}

impl RunLog {
    /// Create `dir` and truncate any previous `ticks.jsonl` in it.
    pub fn create(dir: &Path) -> Result<Self> {
        let paths = RunLogPaths::new(dir);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create run log dir {}", paths.dir.display()))?;
        let file = File::create(&paths.ticks_path)
            .with_context(|| format!("create {}", paths.ticks_path.display()))?;
        Ok(Self {
            paths,
            ticks: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn paths(&self) -> &RunLogPaths {
        &self.paths
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn record_tick(&mut self, report: &TickReport) -> Result<()> {
        let line = serde_json::to_string(report).context("serialize tick report")?;
        writeln!(self.ticks, "{line}")
            .with_context(|| format!("append {}", self.paths.ticks_path.display()))?;
        self.written += 1;
        Ok(())
    }

    /// Flush the tick stream and write `summary.json`.
    pub fn finish<T: Serialize>(mut self, summary: &T) -> Result<RunLogPaths> {
        self.ticks
            .flush()
            .with_context(|| format!("flush {}", self.paths.ticks_path.display()))?;
        write_json(&self.paths.summary_path, summary)?;
        Ok(self.paths)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
