//! Session lifecycle: claim, start, checkpoint, review, complete.
//!
//! Board changes happen inside one `BoardStore::transact` each. Slow side
//! effects (git worktrees, containers) run outside the lock; a failure after
//! the board committed is either rolled back here or left for `gc` to find.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::core::naming::Naming;
use crate::core::ports;
use crate::core::reconcile::{Step, Target, plan_target};
use crate::core::registry::SessionRegistry;
use crate::core::stale::find_stale;
use crate::core::story;
use crate::core::types::{Board, Session, SessionPatch, SessionStatus, StoryStatus};
use crate::error::BoardError;
use crate::gc;
use crate::io::config::BoardConfig;
use crate::io::containers::ContainerRuntime;
use crate::io::env_file::{self, EnvSpec};
use crate::io::lock::BoardLock;
use crate::io::stack::{UNKNOWN, detect_stack};
use crate::io::store::{BoardBackend, BoardStore};
use crate::io::workspace::Workspace;

/// Everything a coordinated operation touches.
pub struct Coordinator<B, L, W, C> {
    store: BoardStore<B, L>,
    workspace: W,
    containers: C,
    cfg: BoardConfig,
    naming: Naming,
}

/// Input for [`Coordinator::claim`].
#[derive(Debug, Clone, Default)]
pub struct ClaimRequest {
    pub story_key: String,
    /// Generated when absent.
    pub session_id: Option<String>,
    pub task: Option<String>,
}

impl<B, L, W, C> Coordinator<B, L, W, C>
where
    B: BoardBackend,
    L: BoardLock,
    W: Workspace,
    C: ContainerRuntime,
{
    pub fn new(
        store: BoardStore<B, L>,
        workspace: W,
        containers: C,
        cfg: BoardConfig,
        naming: Naming,
    ) -> Self {
        Self {
            store,
            workspace,
            containers,
            cfg,
            naming,
        }
    }

    pub fn store(&self) -> &BoardStore<B, L> {
        &self.store
    }

    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    pub fn containers(&self) -> &C {
        &self.containers
    }

    pub fn config(&self) -> &BoardConfig {
        &self.cfg
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Env file location inside a working copy.
    pub fn env_file_path(&self, working_copy: &Path) -> PathBuf {
        working_copy.join(&self.cfg.ports.env_file)
    }

    /// True when container isolation is configured and the runtime answers.
    pub fn containers_usable(&self) -> bool {
        self.cfg.containers.enabled && self.containers.is_available()
    }

    /// Claim a story and set up its session.
    ///
    /// The story claim, port slot and session record commit together. The
    /// working copy is created afterwards; if that fails the board change is
    /// undone. Port exhaustion and an unavailable container runtime degrade
    /// the session instead of failing the claim.
    #[instrument(skip_all, fields(story = %request.story_key))]
    pub fn claim(&self, request: ClaimRequest, now: DateTime<Utc>) -> Result<Session> {
        self.warn_stale(now)?;

        let compose_project = if !self.cfg.containers.enabled {
            None
        } else if self.containers.is_available() {
            Some(self.naming.compose_project(&request.story_key))
        } else {
            warn!("container runtime unavailable; session runs without container isolation");
            None
        };
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| generate_session_id(now));
        let key = request.story_key.clone();

        let session = self.store.transact(|board| {
            story::claim(board, &key, &session_id)?;
            let port_slot = if self.cfg.ports.enabled {
                match ports::allocate(board, &self.cfg.port_plan()) {
                    Ok(slot) => Some(slot),
                    Err(BoardError::ResourceExhausted(msg)) => {
                        warn!(%msg, "no port slot available; session runs without one");
                        None
                    }
                    Err(err) => return Err(err.into()),
                }
            } else {
                None
            };
            let session = Session {
                id: session_id.clone(),
                story_key: key.clone(),
                branch: self.naming.branch(&key),
                working_copy: self.naming.working_copy(&key),
                stack: UNKNOWN.to_string(),
                status: SessionStatus::InProgress,
                port_slot,
                compose_project: compose_project.clone(),
                started_at: now,
                last_checkpoint: now,
                current_task: request.task.clone().unwrap_or_default(),
            };
            if let Some(story) = board.stories.get_mut(&key) {
                story.branch = session.branch.clone();
            }
            SessionRegistry::new(board).add(session.clone())?;
            Ok(session)
        })?;
        info!(session = %session.id, slot = ?session.port_slot, "story claimed");

        if let Err(err) = self
            .workspace
            .create_working_copy(&session.working_copy, &session.branch)
        {
            self.rollback_claim(&session);
            return Err(err).with_context(|| {
                format!("create working copy for story '{}'", session.story_key)
            });
        }

        let stack = detect_stack(&session.working_copy).to_string();
        let mut patch = SessionPatch {
            stack: Some(stack),
            ..SessionPatch::default()
        };
        if session.port_slot.is_some() || session.compose_project.is_some() {
            let spec = EnvSpec {
                compose_project: session.compose_project.as_deref(),
                port_slot: session.port_slot,
            };
            env_file::write(
                &self.env_file_path(&session.working_copy),
                &spec,
                &self.cfg.ports,
                &self.cfg.port_plan(),
            )?;
        }
        if let Some(project) = &session.compose_project {
            let env_path = self.env_file_path(&session.working_copy);
            if let Err(err) =
                self.containers
                    .start_project(project, &session.working_copy, Some(&env_path))
            {
                warn!(err = %format!("{err:#}"), project, "containers failed to start; continuing without isolation");
                patch.compose_project = Some(None);
            }
        }

        let id = session.id.clone();
        self.store.transact(|board| {
            Ok(SessionRegistry::new(board).update(&id, patch, now)?.clone())
        })
    }

    /// Story `claimed -> in-progress`.
    #[instrument(skip_all, fields(session = session_id))]
    pub fn start(
        &self,
        session_id: &str,
        task: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        self.warn_stale(now)?;
        self.store.transact(|board| {
            let key = session_story(board, session_id)?;
            story::advance(board, &key, StoryStatus::InProgress, now)?;
            let patch = SessionPatch {
                status: Some(SessionStatus::InProgress),
                current_task: task,
                ..SessionPatch::default()
            };
            Ok(SessionRegistry::new(board).update(session_id, patch, now)?.clone())
        })
    }

    /// Record progress. `blocked` marks the session blocked instead of
    /// checkpointed; either way a new task counts as activity.
    #[instrument(skip_all, fields(session = session_id, blocked))]
    pub fn checkpoint(
        &self,
        session_id: &str,
        task: Option<String>,
        blocked: bool,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let status = if blocked {
            SessionStatus::Blocked
        } else {
            SessionStatus::Checkpoint
        };
        self.warn_stale(now)?;
        self.store.transact(|board| {
            let patch = SessionPatch {
                status: Some(status),
                current_task: task,
                ..SessionPatch::default()
            };
            Ok(SessionRegistry::new(board).update(session_id, patch, now)?.clone())
        })
    }

    /// Attach the pull request and move story and session to review.
    #[instrument(skip_all, fields(session = session_id))]
    pub fn review(&self, session_id: &str, pr_url: &str, now: DateTime<Utc>) -> Result<Session> {
        self.warn_stale(now)?;
        self.store.transact(|board| {
            let key = session_story(board, session_id)?;
            story::attach_pr(board, &key, pr_url)?;
            story::advance(board, &key, StoryStatus::Review, now)?;
            let patch = SessionPatch {
                status: Some(SessionStatus::Review),
                ..SessionPatch::default()
            };
            Ok(SessionRegistry::new(board).update(session_id, patch, now)?.clone())
        })
    }

    /// Mark the story done, tear down the session's resources, and remove
    /// the session.
    ///
    /// Teardown uses the reconciler's fixed order. If a step fails the
    /// session stays on the board (status `done`) for `gc --select` to finish.
    #[instrument(skip_all, fields(session = session_id))]
    pub fn complete(&self, session_id: &str, now: DateTime<Utc>) -> Result<Vec<Step>> {
        self.warn_stale(now)?;
        let session = self.store.transact(|board| {
            let key = session_story(board, session_id)?;
            story::advance(board, &key, StoryStatus::Done, now)?;
            let patch = SessionPatch {
                status: Some(SessionStatus::Done),
                ..SessionPatch::default()
            };
            Ok(SessionRegistry::new(board).update(session_id, patch, now)?.clone())
        })?;

        let observed = gc::observe(self)?;
        let target = Target {
            key: session.story_key.clone(),
            session: Some(session.clone()),
            findings: Vec::new(),
            reclaim: true,
        };
        let steps = plan_target(&target, &observed, &self.cfg.ports.env_file);
        for step in &steps {
            gc::execute_step(self, step).with_context(|| {
                format!(
                    "teardown of session '{}' stopped at: {}; rerun with `sprintboard gc --select {}`",
                    session.id, step, session.id
                )
            })?;
        }
        info!(story = %session.story_key, "story completed");
        Ok(steps)
    }

    /// Start-of-operation scan. Findings are only logged, never acted on.
    fn warn_stale(&self, now: DateTime<Utc>) -> Result<()> {
        let board = self.store.read()?;
        for finding in find_stale(&board, now, self.cfg.stale_threshold()) {
            warn!(
                session = %finding.session_id,
                story = %finding.story_key,
                idle_hours = finding.age.num_hours(),
                "stale session; confirm and reclaim with `sprintboard gc --select`"
            );
        }
        Ok(())
    }

    fn rollback_claim(&self, session: &Session) {
        let result = self.store.transact(|board| {
            SessionRegistry::new(board).remove(&session.id);
            story::force_reset(board, &session.story_key)?;
            Ok(())
        });
        if let Err(err) = result {
            warn!(err = %format!("{err:#}"), session = %session.id, "claim rollback failed; gc will report the session");
        }
    }
}

fn session_story(board: &Board, session_id: &str) -> Result<String, BoardError> {
    board
        .sessions
        .get(session_id)
        .map(|session| session.story_key.clone())
        .ok_or_else(|| BoardError::NotFound(format!("session '{}'", session_id)))
}

/// `s-<UTC timestamp>-<4 hex digits>`.
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    format!(
        "s-{}-{:04x}",
        now.format("%Y%m%dT%H%M%SZ"),
        rand::random::<u16>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{capture_warnings, coordinator, ts};

    const KEY: &str = "1-2-user-auth";

    fn claim_request(id: &str) -> ClaimRequest {
        ClaimRequest {
            story_key: KEY.to_string(),
            session_id: Some(id.to_string()),
            task: Some("scaffold".to_string()),
        }
    }

    #[test]
    fn session_id_has_expected_shape() {
        let id = generate_session_id(ts(0));
        assert!(id.starts_with("s-"), "{id}");
        let hex = id.rsplit('-').next().expect("suffix");
        assert_eq!(hex.len(), 4);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn claim_creates_session_and_working_copy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = BoardConfig::default();
        cfg.ports.enabled = true;
        let coord = coordinator(temp.path(), &[KEY], cfg);

        let session = coord.claim(claim_request("A"), ts(0)).expect("claim");
        assert_eq!(session.port_slot, Some(1));
        assert_eq!(session.current_task, "scaffold");
        assert!(session.working_copy.is_dir());
        assert!(coord.env_file_path(&session.working_copy).is_file());

        let board = coord.store().read().expect("read");
        assert_eq!(board.stories[KEY].status, StoryStatus::Claimed);
        assert_eq!(board.stories[KEY].claimed_by, "A");
        assert_eq!(board.stories[KEY].branch, format!("story/{KEY}"));
    }

    #[test]
    fn second_claim_conflicts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let coord = coordinator(temp.path(), &[KEY], BoardConfig::default());
        coord.claim(claim_request("A"), ts(0)).expect("claim");
        let err = coord.claim(claim_request("B"), ts(1)).unwrap_err();
        assert!(matches!(BoardError::find(&err), Some(BoardError::Conflict(_))));
    }

    /// A failed working-copy creation leaves the story claimable again.
    #[test]
    fn failed_working_copy_rolls_back_claim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let coord = coordinator(temp.path(), &[KEY], BoardConfig::default());
        coord.workspace().fail_create(true);
        assert!(coord.claim(claim_request("A"), ts(0)).is_err());

        let board = coord.store().read().expect("read");
        assert!(board.sessions.is_empty());
        assert_eq!(board.stories[KEY].status, StoryStatus::ReadyForDev);
        coord.workspace().fail_create(false);
        coord.claim(claim_request("B"), ts(1)).expect("claim after rollback");
    }

    #[test]
    fn exhausted_ports_degrade_instead_of_failing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = BoardConfig::default();
        cfg.ports.enabled = true;
        cfg.ports.max_worktrees = 1;
        let coord = coordinator(temp.path(), &["1-1-setup", KEY], cfg);
        let first = coord
            .claim(
                ClaimRequest {
                    story_key: "1-1-setup".to_string(),
                    session_id: Some("A".to_string()),
                    task: None,
                },
                ts(0),
            )
            .expect("first");
        assert_eq!(first.port_slot, Some(1));
        let second = coord.claim(claim_request("B"), ts(1)).expect("second");
        assert_eq!(second.port_slot, None);
    }

    #[test]
    fn unavailable_runtime_degrades_isolation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = BoardConfig::default();
        cfg.containers.enabled = true;
        let coord = coordinator(temp.path(), &[KEY], cfg);
        coord.containers().set_available(false);
        let session = coord.claim(claim_request("A"), ts(0)).expect("claim");
        assert_eq!(session.compose_project, None);
    }

    #[test]
    fn checkpoint_refreshes_activity_and_blocked_does_not() {
        let temp = tempfile::tempdir().expect("tempdir");
        let coord = coordinator(temp.path(), &[KEY], BoardConfig::default());
        coord.claim(claim_request("A"), ts(0)).expect("claim");
        coord.start("A", None, ts(10)).expect("start");

        let s = coord.checkpoint("A", None, false, ts(100)).expect("checkpoint");
        assert_eq!(s.last_checkpoint, ts(100));
        let s = coord.checkpoint("A", None, true, ts(200)).expect("blocked");
        assert_eq!(s.status, SessionStatus::Blocked);
        assert_eq!(s.last_checkpoint, ts(100));
    }

    #[test]
    fn complete_requires_review_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let coord = coordinator(temp.path(), &[KEY], BoardConfig::default());
        coord.claim(claim_request("A"), ts(0)).expect("claim");
        coord.start("A", None, ts(1)).expect("start");
        let err = coord.complete("A", ts(2)).unwrap_err();
        assert!(matches!(
            BoardError::find(&err),
            Some(BoardError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn complete_tears_down_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = BoardConfig::default();
        cfg.ports.enabled = true;
        cfg.containers.enabled = true;
        let coord = coordinator(temp.path(), &[KEY], cfg);
        let session = coord.claim(claim_request("A"), ts(0)).expect("claim");
        coord.start("A", None, ts(1)).expect("start");
        coord
            .review("A", "https://example.com/pr/7", ts(2))
            .expect("review");
        let steps = coord.complete("A", ts(3)).expect("complete");

        let kinds: Vec<&str> = steps
            .iter()
            .map(|step| match step {
                Step::StopContainers { .. } => "containers",
                Step::DeleteEnvFile { .. } => "env",
                Step::RemoveWorkingCopy { .. } => "working-copy",
                Step::DeleteBranch { .. } => "branch",
                Step::RepairBoard { .. } => "board",
            })
            .collect();
        assert_eq!(kinds, vec!["containers", "env", "working-copy", "branch", "board"]);

        let board = coord.store().read().expect("read");
        assert!(board.sessions.is_empty());
        assert_eq!(board.stories[KEY].status, StoryStatus::Done);
        assert_eq!(board.stories[KEY].pr_url, "https://example.com/pr/7");
        assert!(board.stories[KEY].completed_at.is_some());
        assert!(!session.working_copy.exists());

        let wc = session.working_copy.display();
        assert_eq!(
            coord.workspace().calls(),
            vec![
                format!("create {wc}"),
                format!("remove {wc}"),
                format!("delete-branch story/{KEY}"),
            ]
        );
        assert_eq!(
            coord.containers().calls(),
            vec![format!("up sb-{KEY}"), format!("down sb-{KEY}")]
        );
    }

    /// Every operation scans for stale sessions before doing its work.
    #[test]
    fn each_operation_warns_about_stale_sessions() {
        const HOUR: i64 = 3600;
        let temp = tempfile::tempdir().expect("tempdir");
        let coord = coordinator(temp.path(), &["1-1-setup", KEY], BoardConfig::default());
        coord
            .claim(
                ClaimRequest {
                    story_key: "1-1-setup".to_string(),
                    session_id: Some("idle".to_string()),
                    task: None,
                },
                ts(0),
            )
            .expect("claim idle");
        coord.claim(claim_request("A"), ts(5 * HOUR)).expect("claim");

        let ((), logs) = capture_warnings(|| {
            coord.start("A", None, ts(5 * HOUR)).expect("start");
        });
        assert!(logs.contains("stale session") && logs.contains("session=idle"), "{logs}");
        let ((), logs) = capture_warnings(|| {
            coord.checkpoint("A", None, false, ts(5 * HOUR)).expect("checkpoint");
        });
        assert!(logs.contains("stale session"), "{logs}");
        let ((), logs) = capture_warnings(|| {
            coord
                .review("A", "https://example.com/pr/8", ts(5 * HOUR))
                .expect("review");
        });
        assert!(logs.contains("stale session"), "{logs}");
        let ((), logs) = capture_warnings(|| {
            coord.complete("A", ts(5 * HOUR)).expect("complete");
        });
        assert!(logs.contains("stale session"), "{logs}");
    }
}
