//! Engine configuration stored at `<home>/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::durable::write_atomic;

/// Engine configuration (TOML).
///
/// Human-edited; missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Pause between two runs of the same workflow.
    pub idle_interval_ms: u64,

    /// A workflow loop stops after this many failures in a row.
    pub max_consecutive_failures: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 1_000,
            max_consecutive_failures: 5,
        }
    }
}

impl WorkflowConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.logging.default_filter.trim().is_empty() {
            return Err(anyhow!("logging.default_filter must not be empty"));
        }
        if self.workflow.idle_interval_ms == 0 {
            return Err(anyhow!("workflow.idle_interval_ms must be > 0"));
        }
        if self.workflow.max_consecutive_failures == 0 {
            return Err(anyhow!("workflow.max_consecutive_failures must be > 0"));
        }
        Ok(())
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
    write_atomic(path, buf.as_bytes()).with_context(|| format!("replace config {}", path.display()))
}
