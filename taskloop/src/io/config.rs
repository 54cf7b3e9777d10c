//! Engine configuration stored as TOML (default `taskloop.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::scheduler::SchedulerSettings;
use crate::timing::Humanizer;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "taskloop.toml";

/// Engine configuration (TOML).
///
/// Edited by humans and overridden per scenario through a `[config]` table.
/// Missing fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Retries the scheduler grants a failed top-level task.
    pub max_retries_default: u32,

    /// Backoff before the first retry; doubled for every further retry.
    pub retry_backoff_ticks: u64,

    /// Fail a task after this many ticks without progress. `0` disables.
    pub inactivity_ticks: u64,

    pub queue_limit: usize,

    /// Tick budget for a single `run`.
    pub max_ticks: u64,

    /// Wall-clock length of one tick when running in realtime mode.
    pub tick_interval_ms: u64,

    /// Check tree invariants after every tick.
    pub check_invariants: bool,

    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Fixed seed for reproducible runs; random when absent.
    pub seed: Option<u64>,
    /// Multiplier applied to every humanized delay.
    pub scale: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            seed: None,
            scale: 1.0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries_default: 3,
            retry_backoff_ticks: 2,
            inactivity_ticks: 0,
            queue_limit: 1000,
            max_ticks: 10_000,
            tick_interval_ms: 600,
            check_invariants: true,
            timing: TimingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_limit == 0 {
            return Err(anyhow!("queue_limit must be > 0"));
        }
        if self.max_ticks == 0 {
            return Err(anyhow!("max_ticks must be > 0"));
        }
        if self.tick_interval_ms == 0 {
            return Err(anyhow!("tick_interval_ms must be > 0"));
        }
        if !self.timing.scale.is_finite() || self.timing.scale < 0.0 {
            return Err(anyhow!("timing.scale must be a finite number >= 0"));
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            max_retries_default: self.max_retries_default,
            retry_backoff_ticks: self.retry_backoff_ticks,
            inactivity_ticks: self.inactivity_ticks,
            queue_limit: self.queue_limit,
            check_invariants: self.check_invariants,
        }
    }

    pub fn humanizer(&self) -> Humanizer {
        Humanizer::new(self.timing.seed, self.timing.scale)
    }

    /// Apply a partial TOML table on top of this config.
    pub fn merged(&self, overrides: &toml::Table) -> Result<Self> {
        let mut base = toml::Table::try_from(self).context("serialize config")?;
        merge_tables(&mut base, overrides);
        let merged: EngineConfig = base.try_into().context("apply config overrides")?;
        merged.validate()?;
        Ok(merged)
    }
}

fn merge_tables(base: &mut toml::Table, overrides: &toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("taskloop.toml");
        let cfg = EngineConfig {
            inactivity_ticks: 40,
            timing: TimingConfig {
                seed: Some(7),
                scale: 0.5,
            },
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn rejects_zero_queue_limit() {
        let cfg = EngineConfig {
            queue_limit: 0,
            ..EngineConfig::default()
        };
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("queue_limit"));
    }

    #[test]
    fn overrides_merge_nested_tables() {
        let overrides: toml::Table = toml::from_str(
            r#"
            max_ticks = 50
            [timing]
            seed = 9
            "#,
        )
        .expect("parse");
        let merged = EngineConfig::default().merged(&overrides).expect("merge");
        assert_eq!(merged.max_ticks, 50);
        assert_eq!(merged.timing.seed, Some(9));
        assert_eq!(merged.timing.scale, 1.0);
        assert_eq!(merged.queue_limit, 1000);
    }
}
