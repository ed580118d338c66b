//! Resource reconciliation: audit the board against observed resources and
//! plan remediation.
//!
//! The audit is table-driven. Each [`AuditRule`] names a resource kind, how to
//! enumerate what exists, which session field claims it, and which side of the
//! mismatch counts as the orphan. Adding a resource kind means adding a row.
//!
//! Everything here is pure. `crate::gc` gathers [`Observed`], runs the audit,
//! and executes the planned [`Step`]s.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use crate::core::naming::Naming;
use crate::core::types::{Board, Session, StoryStatus};
use crate::error::BoardError;

/// Token the operator must pass to force-remediate everything.
pub const FORCE_CONFIRMATION: &str = "force-all";

/// A claim commits its session before the working copy exists. Sessions
/// younger than this are not reported as missing their working copy.
pub const SESSION_SETUP_GRACE_SECS: i64 = 300;

/// Resource kinds covered by the audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKind {
    WorkingCopy,
    BoardSession,
    ContainerProject,
    Branch,
    /// Story claimed by a session that no longer exists.
    Claim,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::WorkingCopy => "working-copy",
            ResourceKind::BoardSession => "board-session",
            ResourceKind::ContainerProject => "container-project",
            ResourceKind::Branch => "branch",
            ResourceKind::Claim => "claim",
        };
        f.write_str(label)
    }
}

/// Snapshot of managed resources that currently exist.
///
/// `containers` is `None` when the container runtime cannot be queried; the
/// container rule is skipped rather than reporting every session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    pub working_copies: BTreeSet<PathBuf>,
    pub branches: BTreeSet<String>,
    pub containers: Option<BTreeSet<String>>,
}

impl Observed {
    fn has_working_copy(&self, path: &Path) -> bool {
        self.working_copies.contains(path)
    }

    fn has_branch(&self, branch: &str) -> bool {
        self.branches.contains(branch)
    }

    fn has_container(&self, project: &str) -> bool {
        self.containers
            .as_ref()
            .is_some_and(|running| running.contains(project))
    }
}

/// One disagreement between the board and reality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Finding {
    pub kind: ResourceKind,
    /// Resource name (path, branch, project) or session id for board findings.
    pub resource: String,
    /// Story the resource belongs to, derived from its managed name.
    pub story_key: Option<String>,
    pub session_id: Option<String>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.resource)?;
        if let Some(id) = &self.session_id {
            write!(f, " (session {})", id)?;
        }
        Ok(())
    }
}

/// Which side of the comparison is the orphan.
#[derive(Debug, Clone, Copy)]
enum Orphan {
    /// Resource exists, no session claims it.
    Resource,
    /// Session exists, its resource does not.
    Session,
}

/// Row of the audit table.
struct AuditRule {
    kind: ResourceKind,
    orphan: Orphan,
    enumerate: fn(&Observed) -> Option<Vec<String>>,
    claimed_by: fn(&Session) -> Option<String>,
    story_key: fn(&Naming, &str) -> Option<String>,
}

const AUDIT_RULES: &[AuditRule] = &[
    AuditRule {
        kind: ResourceKind::WorkingCopy,
        orphan: Orphan::Resource,
        enumerate: enumerate_working_copies,
        claimed_by: session_working_copy,
        story_key: key_of_working_copy,
    },
    AuditRule {
        kind: ResourceKind::BoardSession,
        orphan: Orphan::Session,
        enumerate: enumerate_working_copies,
        claimed_by: session_working_copy,
        story_key: key_of_working_copy,
    },
    AuditRule {
        kind: ResourceKind::ContainerProject,
        orphan: Orphan::Resource,
        enumerate: |observed| {
            observed
                .containers
                .as_ref()
                .map(|running| running.iter().cloned().collect())
        },
        claimed_by: |session| session.compose_project.clone(),
        story_key: |naming, project| naming.story_key_of_project(project),
    },
    AuditRule {
        kind: ResourceKind::Branch,
        orphan: Orphan::Resource,
        enumerate: |observed| Some(observed.branches.iter().cloned().collect()),
        claimed_by: |session| Some(session.branch.clone()),
        story_key: |naming, branch| naming.story_key_of_branch(branch),
    },
];

fn enumerate_working_copies(observed: &Observed) -> Option<Vec<String>> {
    Some(
        observed
            .working_copies
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect(),
    )
}

fn session_working_copy(session: &Session) -> Option<String> {
    Some(session.working_copy.to_string_lossy().into_owned())
}

fn key_of_working_copy(naming: &Naming, path: &str) -> Option<String> {
    naming.story_key_of_working_copy(Path::new(path))
}

/// Cross-reference the board against observed resources.
///
/// Never fails: every disagreement is a finding. Output is sorted.
pub fn audit(board: &Board, observed: &Observed, naming: &Naming) -> Vec<Finding> {
    let mut findings = Vec::new();

    for rule in AUDIT_RULES {
        let Some(existing) = (rule.enumerate)(observed) else {
            continue;
        };
        let existing: BTreeSet<String> = existing.into_iter().collect();
        let claimed: BTreeMap<String, &Session> = board
            .sessions
            .values()
            .filter_map(|session| (rule.claimed_by)(session).map(|name| (name, session)))
            .collect();

        match rule.orphan {
            Orphan::Resource => {
                for name in existing.iter().filter(|name| !claimed.contains_key(*name)) {
                    findings.push(Finding {
                        kind: rule.kind,
                        resource: name.clone(),
                        story_key: (rule.story_key)(naming, name),
                        session_id: None,
                    });
                }
            }
            Orphan::Session => {
                for (name, session) in claimed.iter().filter(|(name, _)| !existing.contains(*name)) {
                    findings.push(Finding {
                        kind: rule.kind,
                        resource: name.clone(),
                        story_key: Some(session.story_key.clone()),
                        session_id: Some(session.id.clone()),
                    });
                }
            }
        }
    }

    findings.extend(dangling_claims(board));
    findings.sort();
    findings
}

/// Drop board-session findings for sessions still inside their setup grace
/// period, so a claim in progress is never mistaken for a ghost.
pub fn settle_findings(board: &Board, findings: Vec<Finding>, now: DateTime<Utc>) -> Vec<Finding> {
    findings
        .into_iter()
        .filter(|finding| {
            finding.kind != ResourceKind::BoardSession
                || finding
                    .session_id
                    .as_ref()
                    .and_then(|id| board.sessions.get(id))
                    .is_none_or(|session| {
                        now - session.started_at >= Duration::seconds(SESSION_SETUP_GRACE_SECS)
                    })
        })
        .collect()
}

/// In-flight stories whose `claimed_by` session is gone (a lost update).
fn dangling_claims(board: &Board) -> Vec<Finding> {
    board
        .stories
        .values()
        .filter(|story| {
            story.is_claimed()
                && story.status != StoryStatus::Done
                && !board.sessions.contains_key(&story.claimed_by)
        })
        .map(|story| Finding {
            kind: ResourceKind::Claim,
            resource: story.key.clone(),
            story_key: Some(story.key.clone()),
            session_id: None,
        })
        .collect()
}

/// Everything to clean up for one story: its session (if any) and findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Story key, or the raw resource name when none can be derived.
    pub key: String,
    pub session: Option<Session>,
    pub findings: Vec<Finding>,
    /// The operator asked for the session itself to go (selected or forced).
    pub reclaim: bool,
}

impl Target {
    fn new(key: String) -> Self {
        Self {
            key,
            session: None,
            findings: Vec::new(),
            reclaim: false,
        }
    }

    fn matches(&self, id: &str) -> bool {
        self.key == id
            || self.session.as_ref().is_some_and(|s| s.id == id)
            || self.findings.iter().any(|f| f.resource == id)
    }

    /// Whether the attached session is torn down with the orphans.
    ///
    /// A live session sharing a story key with an orphan resource is kept
    /// unless it was selected, forced, or is itself a ghost.
    pub fn reclaims_session(&self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        self.reclaim
            || self.findings.iter().any(|f| {
                f.kind == ResourceKind::BoardSession
                    && f.session_id.as_deref() == Some(session.id.as_str())
            })
    }
}

/// Group findings by story, attaching the board session for that story.
pub fn group_targets(board: &Board, findings: &[Finding]) -> Vec<Target> {
    let mut targets: BTreeMap<String, Target> = BTreeMap::new();
    for finding in findings {
        let key = finding
            .story_key
            .clone()
            .unwrap_or_else(|| finding.resource.clone());
        targets
            .entry(key.clone())
            .or_insert_with(|| Target::new(key))
            .findings
            .push(finding.clone());
    }
    for target in targets.values_mut() {
        target.session = board.session_for_story(&target.key).cloned();
    }
    targets.into_values().collect()
}

/// Operator-selected remediation scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcMode {
    /// Every target with at least one finding.
    Orphans,
    /// Targets named by story key, session id, or resource name, including
    /// sessions with no finding (e.g. confirmed stale sessions).
    Selected(Vec<String>),
    /// Every finding and every session on the board.
    Force { confirm: String },
}

/// Resolve the mode into the concrete targets to remediate.
pub fn select_targets(
    board: &Board,
    findings: &[Finding],
    mode: &GcMode,
) -> Result<Vec<Target>, BoardError> {
    let mut targets = group_targets(board, findings);
    match mode {
        GcMode::Orphans => Ok(targets),
        GcMode::Selected(ids) => {
            add_session_targets(board, &mut targets, |session| {
                ids.iter().any(|id| id == &session.id || id == &session.story_key)
            });
            let unknown: Vec<&String> = ids
                .iter()
                .filter(|id| !targets.iter().any(|t| t.matches(id)))
                .collect();
            if let Some(id) = unknown.first() {
                return Err(BoardError::NotFound(format!("gc target '{}'", id)));
            }
            targets.retain(|t| ids.iter().any(|id| t.matches(id)));
            for target in &mut targets {
                target.reclaim = true;
            }
            Ok(targets)
        }
        GcMode::Force { confirm } => {
            if confirm != FORCE_CONFIRMATION {
                return Err(BoardError::ConfirmationRequired {
                    expected: FORCE_CONFIRMATION.to_string(),
                });
            }
            add_session_targets(board, &mut targets, |_| true);
            for target in &mut targets {
                target.reclaim = true;
            }
            Ok(targets)
        }
    }
}

fn add_session_targets(board: &Board, targets: &mut Vec<Target>, wanted: impl Fn(&Session) -> bool) {
    for session in board.sessions.values().filter(|s| wanted(s)) {
        if targets.iter().any(|t| t.key == session.story_key) {
            continue;
        }
        let mut target = Target::new(session.story_key.clone());
        target.session = Some(session.clone());
        targets.push(target);
    }
    targets.sort_by(|a, b| a.key.cmp(&b.key));
}

/// One teardown action. Declaration order is execution order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    StopContainers { project: String },
    DeleteEnvFile { path: PathBuf },
    RemoveWorkingCopy { path: PathBuf },
    DeleteBranch { branch: String },
    /// Remove the session and reset the story to `ready-for-dev`.
    RepairBoard {
        session_id: Option<String>,
        story_key: String,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::StopContainers { project } => write!(f, "stop containers {}", project),
            Step::DeleteEnvFile { path } => write!(f, "delete env file {}", path.display()),
            Step::RemoveWorkingCopy { path } => write!(f, "remove working copy {}", path.display()),
            Step::DeleteBranch { branch } => write!(f, "delete branch {}", branch),
            Step::RepairBoard {
                session_id: Some(id),
                story_key,
            } => write!(f, "remove session {} and reset story {}", id, story_key),
            Step::RepairBoard {
                session_id: None,
                story_key,
            } => write!(f, "reset story {}", story_key),
        }
    }
}

/// Teardown steps for one target, in the fixed order:
/// containers, env file, working copy, branch, board entry.
///
/// Only resources that currently exist get a step, so re-planning after a
/// successful run yields nothing for resources already gone.
pub fn plan_target(target: &Target, observed: &Observed, env_file: &str) -> Vec<Step> {
    let mut projects = BTreeSet::new();
    let mut working_copies = BTreeSet::new();
    let mut branches = BTreeSet::new();

    let reclaim = target.reclaims_session();
    if let Some(session) = target.session.as_ref().filter(|_| reclaim) {
        if let Some(project) = &session.compose_project
            && observed.has_container(project)
        {
            projects.insert(project.clone());
        }
        if observed.has_working_copy(&session.working_copy) {
            working_copies.insert(session.working_copy.clone());
        }
        if observed.has_branch(&session.branch) {
            branches.insert(session.branch.clone());
        }
    }
    for finding in &target.findings {
        match finding.kind {
            ResourceKind::ContainerProject => {
                projects.insert(finding.resource.clone());
            }
            ResourceKind::WorkingCopy => {
                working_copies.insert(PathBuf::from(&finding.resource));
            }
            ResourceKind::Branch => {
                branches.insert(finding.resource.clone());
            }
            ResourceKind::BoardSession | ResourceKind::Claim => {}
        }
    }

    let mut steps = Vec::new();
    steps.extend(
        projects
            .into_iter()
            .map(|project| Step::StopContainers { project }),
    );
    for path in &working_copies {
        steps.push(Step::DeleteEnvFile {
            path: path.join(env_file),
        });
    }
    steps.extend(
        working_copies
            .into_iter()
            .map(|path| Step::RemoveWorkingCopy { path }),
    );
    steps.extend(branches.into_iter().map(|branch| Step::DeleteBranch { branch }));

    let dangling = target.findings.iter().any(|f| f.kind == ResourceKind::Claim);
    if reclaim || dangling {
        steps.push(Step::RepairBoard {
            session_id: target
                .session
                .as_ref()
                .filter(|_| reclaim)
                .map(|s| s.id.clone()),
            story_key: target.key.clone(),
        });
    }
    steps
}
