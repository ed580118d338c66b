//! Board configuration stored under `.sprintboard/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::ports::PortPlan;
use crate::io::write_atomic;

/// Board configuration (TOML).
///
/// Edited by humans; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BoardConfig {
    /// Markdown backlog imported when the board is first created.
    pub backlog_path: String,

    /// Directory (relative to the project root) holding working copies.
    pub worktree_root: String,

    /// Prefix for managed story branches.
    pub branch_prefix: String,

    /// Sessions idle longer than this are reported as stale.
    pub stale_after_hours: u32,

    pub lock: LockConfig,
    pub ports: PortsConfig,
    pub containers: ContainersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// Acquisition attempts before giving up with a lock timeout.
    pub attempts: u32,
    /// Fixed wait between attempts.
    pub retry_interval_ms: u64,
    /// A lock older than this may be taken over.
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortsConfig {
    pub enabled: bool,
    pub base: u32,
    pub step: u32,
    pub max_worktrees: u16,
    /// Generated per-session env file, relative to the working copy.
    pub env_file: String,
    /// Service name to port offset within a slot.
    pub services: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainersConfig {
    pub enabled: bool,
    pub project_prefix: String,
    /// Compose invocation, e.g. `["docker", "compose"]`.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            backlog_path: "docs/epics.md".to_string(),
            worktree_root: ".worktrees".to_string(),
            branch_prefix: "story/".to_string(),
            stale_after_hours: 4,
            lock: LockConfig::default(),
            ports: PortsConfig::default(),
            containers: ContainersConfig::default(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            retry_interval_ms: 200,
            stale_after_secs: 30,
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base: 10200,
            step: 10,
            max_worktrees: 9,
            env_file: ".env.ports".to_string(),
            services: BTreeMap::new(),
        }
    }
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project_prefix: "sb".to_string(),
            command: vec!["docker".to_string(), "compose".to_string()],
            timeout_secs: 120,
        }
    }
}

impl BoardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lock.attempts == 0 {
            return Err(anyhow!("lock.attempts must be > 0"));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(anyhow!("branch_prefix must be non-empty"));
        }
        if self.worktree_root.trim().is_empty() {
            return Err(anyhow!("worktree_root must be non-empty"));
        }
        if self.stale_after_hours == 0 {
            return Err(anyhow!("stale_after_hours must be > 0"));
        }
        if self.ports.step == 0 {
            return Err(anyhow!("ports.step must be > 0"));
        }
        if self.ports.env_file.trim().is_empty() {
            return Err(anyhow!("ports.env_file must be non-empty"));
        }
        if let Some((name, offset)) = self
            .ports
            .services
            .iter()
            .find(|(_, offset)| **offset >= self.ports.step)
        {
            return Err(anyhow!(
                "ports.services.{name} offset {offset} does not fit in step {}",
                self.ports.step
            ));
        }
        if self.containers.command.is_empty() || self.containers.command[0].trim().is_empty() {
            return Err(anyhow!("containers.command must be a non-empty array"));
        }
        if self.containers.project_prefix.trim().is_empty() {
            return Err(anyhow!("containers.project_prefix must be non-empty"));
        }
        Ok(())
    }

    pub fn port_plan(&self) -> PortPlan {
        PortPlan {
            base: self.ports.base,
            step: self.ports.step,
            max_worktrees: self.ports.max_worktrees,
        }
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.stale_after_hours))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BoardConfig::default()`.
pub fn load_config(path: &Path) -> Result<BoardConfig> {
    if !path.exists() {
        let cfg = BoardConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BoardConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BoardConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
