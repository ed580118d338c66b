//! Container runtime adapter (compose projects, one per session).
//!
//! Isolation is best effort: when the runtime is unavailable sessions run
//! without containers and the reconciler skips the container audit.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::io::config::ContainersConfig;
use crate::io::process::{DEFAULT_OUTPUT_LIMIT_BYTES, run_checked, run_command_with_timeout};

/// Start, stop and list compose projects.
pub trait ContainerRuntime {
    /// Whether the runtime answers at all.
    fn is_available(&self) -> bool;
    /// Names of projects with at least one container, running or stopped.
    fn running_projects(&self) -> Result<BTreeSet<String>>;
    fn start_project(&self, project: &str, workdir: &Path, env_file: Option<&Path>) -> Result<()>;
    /// Stop and remove a project's containers. Unknown projects are a no-op.
    fn stop_project(&self, project: &str) -> Result<()>;
}

/// `docker compose` (or any CLI with the same verbs).
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    command: Vec<String>,
    timeout: Duration,
}

/// One row of `compose ls --format json`.
#[derive(Debug, Deserialize)]
struct ProjectRow {
    #[serde(rename = "Name")]
    name: String,
}

impl ComposeRuntime {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(cfg: &ContainersConfig) -> Self {
        Self::new(cfg.command.clone(), Duration::from_secs(cfg.timeout_secs))
    }

    fn base_command(&self) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("container command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(cmd)
    }
}

impl ContainerRuntime for ComposeRuntime {
    fn is_available(&self) -> bool {
        let Ok(mut cmd) = self.base_command() else {
            return false;
        };
        cmd.arg("version");
        match run_command_with_timeout(cmd, self.timeout, DEFAULT_OUTPUT_LIMIT_BYTES) {
            Ok(out) => out.success(),
            Err(err) => {
                debug!(err = %err, "container runtime not available");
                false
            }
        }
    }

    #[instrument(skip_all)]
    fn running_projects(&self) -> Result<BTreeSet<String>> {
        let mut cmd = self.base_command()?;
        cmd.args(["ls", "--all", "--format", "json"]);
        let out = run_checked(cmd, self.timeout, "container ls")?;
        parse_project_list(&out.stdout_text())
    }

    #[instrument(skip_all, fields(project))]
    fn start_project(&self, project: &str, workdir: &Path, env_file: Option<&Path>) -> Result<()> {
        let mut cmd = self.base_command()?;
        cmd.current_dir(workdir).args(["-p", project]);
        if let Some(env_file) = env_file {
            cmd.arg("--env-file").arg(env_file);
        }
        cmd.args(["up", "-d"]);
        run_checked(cmd, self.timeout, "container up")?;
        info!(project, "containers started");
        Ok(())
    }

    #[instrument(skip_all, fields(project))]
    fn stop_project(&self, project: &str) -> Result<()> {
        let mut cmd = self.base_command()?;
        cmd.args(["-p", project, "down", "--remove-orphans"]);
        run_checked(cmd, self.timeout, "container down")?;
        info!(project, "containers stopped");
        Ok(())
    }
}

fn parse_project_list(json: &str) -> Result<BTreeSet<String>> {
    if json.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    let rows: Vec<ProjectRow> =
        serde_json::from_str(json).context("parse container project list")?;
    Ok(rows.into_iter().map(|row| row.name).collect())
}
