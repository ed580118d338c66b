//! Reconciler run: observe, audit, select, remediate.
//!
//! Observation and the audit run without the board lock so a slow container
//! runtime never blocks claims. Each target is re-checked against a fresh
//! board and a fresh observation before anything is removed, and the board
//! repair itself runs under the lock.

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::ports;
use crate::core::reconcile::{
    FORCE_CONFIRMATION, Finding, GcMode, Observed, Step, Target, audit, plan_target,
    select_targets, settle_findings,
};
use crate::core::naming::Naming;
use crate::core::registry::SessionRegistry;
use crate::core::stale::{StaleFinding, find_stale};
use crate::core::story;
use crate::core::types::{Board, StoryStatus};
use crate::error::BoardError;
use crate::io::containers::ContainerRuntime;
use crate::io::env_file;
use crate::io::lock::BoardLock;
use crate::io::store::BoardBackend;
use crate::io::workspace::Workspace;
use crate::session::Coordinator;

/// What happened to one planned step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// Dry run: would have run.
    Planned,
    Done,
    Failed(String),
    /// An earlier step of the same target failed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: Step,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub key: String,
    pub session_id: Option<String>,
    /// Set when the fresh re-check found nothing left to do.
    pub skipped: Option<String>,
    pub steps: Vec<StepOutcome>,
}

impl TargetOutcome {
    pub fn failed(&self) -> bool {
        self.steps
            .iter()
            .any(|outcome| matches!(outcome.status, StepStatus::Failed(_)))
    }
}

/// Full result of a reconciler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub dry_run: bool,
    pub findings: Vec<Finding>,
    pub stale: Vec<StaleFinding>,
    /// `false` when the container runtime could not be queried.
    pub containers_observed: bool,
    pub targets: Vec<TargetOutcome>,
}

impl GcReport {
    pub fn has_failures(&self) -> bool {
        self.targets.iter().any(TargetOutcome::failed)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.containers_observed {
            out.push_str("containers: not observed (disabled or unavailable)\n");
        }
        if self.findings.is_empty() {
            out.push_str("findings: none\n");
        }
        for finding in &self.findings {
            out.push_str(&format!("finding: {finding}\n"));
        }
        for stale in &self.stale {
            out.push_str(&format!(
                "stale: session {} on {} idle {}h (reclaim with --mode select --select {})\n",
                stale.session_id,
                stale.story_key,
                stale.age.num_hours(),
                stale.session_id
            ));
        }
        for target in &self.targets {
            out.push_str(&format!("target {}", target.key));
            if let Some(id) = &target.session_id {
                out.push_str(&format!(" (session {id})"));
            }
            out.push('\n');
            if let Some(reason) = &target.skipped {
                out.push_str(&format!("  skipped: {reason}\n"));
            }
            for outcome in &target.steps {
                let status = match &outcome.status {
                    StepStatus::Planned => "would".to_string(),
                    StepStatus::Done => "done".to_string(),
                    StepStatus::Failed(err) => format!("FAILED ({err})"),
                    StepStatus::Skipped => "skipped".to_string(),
                };
                out.push_str(&format!("  {status}: {}\n", outcome.step));
            }
        }
        out
    }
}

/// Snapshot the managed resources that exist right now.
pub fn observe<B, L, W, C>(coord: &Coordinator<B, L, W, C>) -> Result<Observed>
where
    B: BoardBackend,
    L: BoardLock,
    W: Workspace,
    C: ContainerRuntime,
{
    let naming = coord.naming();
    let working_copies = coord.workspace().list_working_copies()?;
    let branches = coord.workspace().list_branches()?;
    let containers = if coord.containers_usable() {
        match coord.containers().running_projects() {
            Ok(projects) => Some(
                projects
                    .into_iter()
                    .filter(|project| naming.is_managed_project(project))
                    .collect::<BTreeSet<_>>(),
            ),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "cannot list containers; skipping container audit");
                None
            }
        }
    } else {
        None
    };
    Ok(Observed {
        working_copies,
        branches,
        containers,
    })
}

/// Audit and, unless `dry_run`, remediate the targets selected by `mode`.
///
/// Within a target a failed step stops the remaining steps; other targets
/// still run. Rerunning after a complete pass finds nothing.
#[instrument(skip_all, fields(dry_run))]
pub fn run<B, L, W, C>(
    coord: &Coordinator<B, L, W, C>,
    mode: &GcMode,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<GcReport>
where
    B: BoardBackend,
    L: BoardLock,
    W: Workspace,
    C: ContainerRuntime,
{
    if let GcMode::Force { confirm } = mode
        && confirm != FORCE_CONFIRMATION
    {
        return Err(BoardError::ConfirmationRequired {
            expected: FORCE_CONFIRMATION.to_string(),
        }
        .into());
    }
    let observed = observe(coord)?;
    let board = coord.store().read()?;
    let findings = settle_findings(&board, audit(&board, &observed, coord.naming()), now);
    let stale = find_stale(&board, now, coord.config().stale_threshold());
    debug!(findings = findings.len(), stale = stale.len(), "audit complete");

    let targets = select_targets(&board, &findings, mode)?;
    let env_file = &coord.config().ports.env_file;
    let mut outcomes = Vec::new();

    for target in targets {
        let key = target.key.clone();
        let session_id = target.session.as_ref().map(|s| s.id.clone());
        let observed = observe(coord)?;
        let fresh = coord.store().read()?;
        let Some(target) = recheck(&fresh, &observed, coord.naming(), target, mode, now) else {
            info!(story = %key, "target changed since audit; skipped");
            outcomes.push(TargetOutcome {
                key,
                session_id,
                skipped: Some("changed since audit".to_string()),
                steps: Vec::new(),
            });
            continue;
        };
        let steps = plan_target(&target, &observed, env_file);
        let steps = if dry_run {
            steps
                .into_iter()
                .map(|step| StepOutcome {
                    step,
                    status: StepStatus::Planned,
                })
                .collect()
        } else {
            execute_steps(coord, steps)
        };
        outcomes.push(TargetOutcome {
            key: target.key.clone(),
            session_id: target.session.as_ref().map(|s| s.id.clone()),
            skipped: None,
            steps,
        });
    }

    Ok(GcReport {
        dry_run,
        findings,
        stale,
        containers_observed: observed.containers.is_some(),
        targets: outcomes,
    })
}

/// Rebuild `target` from a fresh board read and a fresh observation.
///
/// In orphan mode a target whose findings disappeared (for example because
/// a session claimed the story meanwhile) is dropped.
fn recheck(
    fresh: &Board,
    observed: &Observed,
    naming: &Naming,
    target: Target,
    mode: &GcMode,
    now: DateTime<Utc>,
) -> Option<Target> {
    let findings: Vec<Finding> = settle_findings(fresh, audit(fresh, observed, naming), now)
        .into_iter()
        .filter(|finding| {
            finding.story_key.as_deref().unwrap_or(finding.resource.as_str()) == target.key
        })
        .collect();
    let session = fresh.session_for_story(&target.key).cloned();
    let same_session = match (&target.session, &session) {
        (Some(before), Some(after)) => before.id == after.id,
        (None, Some(_)) => false,
        _ => true,
    };
    if !same_session {
        return None;
    }
    if findings.is_empty() && (matches!(mode, GcMode::Orphans) || session.is_none()) {
        return None;
    }
    Some(Target {
        key: target.key,
        session,
        findings,
        reclaim: target.reclaim,
    })
}

fn execute_steps<B, L, W, C>(coord: &Coordinator<B, L, W, C>, steps: Vec<Step>) -> Vec<StepOutcome>
where
    B: BoardBackend,
    L: BoardLock,
    W: Workspace,
    C: ContainerRuntime,
{
    let mut outcomes = Vec::with_capacity(steps.len());
    let mut failed = false;
    for step in steps {
        let status = if failed {
            StepStatus::Skipped
        } else {
            match execute_step(coord, &step) {
                Ok(()) => StepStatus::Done,
                Err(err) => {
                    failed = true;
                    warn!(err = %format!("{err:#}"), step = %step, "remediation step failed");
                    StepStatus::Failed(format!("{err:#}"))
                }
            }
        };
        outcomes.push(StepOutcome { step, status });
    }
    outcomes
}

/// Run one teardown step. Every step tolerates its resource being gone.
pub fn execute_step<B, L, W, C>(coord: &Coordinator<B, L, W, C>, step: &Step) -> Result<()>
where
    B: BoardBackend,
    L: BoardLock,
    W: Workspace,
    C: ContainerRuntime,
{
    debug!(step = %step, "executing");
    match step {
        Step::StopContainers { project } => coord.containers().stop_project(project),
        Step::DeleteEnvFile { path } => env_file::remove(path),
        Step::RemoveWorkingCopy { path } => coord.workspace().remove_working_copy(path),
        Step::DeleteBranch { branch } => coord.workspace().delete_branch(branch),
        Step::RepairBoard {
            session_id,
            story_key,
        } => coord
            .store()
            .transact(|board| repair_board(board, session_id.as_deref(), story_key)),
    }
}

/// Remove the session and return its story to `ready-for-dev` when the story
/// is still held by that session or by no live session at all.
fn repair_board(board: &mut Board, session_id: Option<&str>, story_key: &str) -> Result<()> {
    if let Some(id) = session_id {
        ports::release(board, id);
        if SessionRegistry::new(board).remove(id).is_some() {
            info!(session = id, "session removed");
        }
    }
    let Some(story) = board.stories.get(story_key) else {
        return Ok(());
    };
    let held_by_removed = session_id.is_some_and(|id| story.claimed_by == id);
    let dangling = story.is_claimed() && !board.sessions.contains_key(&story.claimed_by);
    if story.status != StoryStatus::Done
        && story.status != StoryStatus::ReadyForDev
        && (held_by_removed || dangling)
        && story::force_reset(board, story_key)?
    {
        info!(story = story_key, "story reset to ready-for-dev");
    }
    Ok(())
}
