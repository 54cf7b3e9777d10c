//! Engine config overrides given on the command line as `key=value`.
//!
//! Values use TOML syntax and keys may be dotted (`timing.scale=0.5`).

use anyhow::{Context, Result, anyhow};
use taskloop::io::config::EngineConfig;

/// Parse `key=value` pairs into one TOML table.
pub fn parse_overrides(pairs: &[String]) -> Result<toml::Table> {
    let mut document = String::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("override {pair:?} must look like key=value"))?;
        document.push_str(&format!("{} = {}\n", key.trim(), value.trim()));
    }
    toml::from_str(&document).context("parse config overrides")
}

/// Apply command-line overrides on top of the base engine config.
pub fn apply_overrides(base: &EngineConfig, pairs: &[String]) -> Result<EngineConfig> {
    if pairs.is_empty() {
        return Ok(base.clone());
    }
    let overrides = parse_overrides(pairs)?;
    base.merged(&overrides)
}
