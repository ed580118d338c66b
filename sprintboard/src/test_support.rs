//! Test-only builders and scripted fakes for boards, workspaces and
//! container runtimes.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};

use crate::core::naming::Naming;
use crate::core::types::{Board, Session, SessionStatus};
use crate::io::config::BoardConfig;
use crate::io::containers::ContainerRuntime;
use crate::io::lock::{DirLock, MemoryLock, RetryPolicy};
use crate::io::paths::BoardPaths;
use crate::io::store::{BoardStore, FileBackend, MemoryBackend};
use crate::io::workspace::Workspace;
use crate::session::Coordinator;

/// 2026-01-01T00:00:00Z plus `secs`.
pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600 + secs, 0).expect("valid timestamp")
}

/// Naming rooted at `/repo/.worktrees`.
pub fn naming() -> Naming {
    Naming {
        branch_prefix: "story/".to_string(),
        worktree_root: PathBuf::from("/repo/.worktrees"),
        project_prefix: "sb".to_string(),
    }
}

/// Board with every key `ready-for-dev` and no sessions.
pub fn board_with_stories(keys: &[&str]) -> Board {
    Board::from_story_keys(keys.iter().copied())
}

/// In-progress session for `story_key` started at `ts(0)`, named via [`naming`].
pub fn session(id: &str, story_key: &str) -> Session {
    let n = naming();
    Session {
        id: id.to_string(),
        story_key: story_key.to_string(),
        branch: n.branch(story_key),
        working_copy: n.working_copy(story_key),
        stack: "unknown".to_string(),
        status: SessionStatus::InProgress,
        port_slot: None,
        compose_project: None,
        started_at: ts(0),
        last_checkpoint: ts(0),
        current_task: String::new(),
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        locked(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with `warn!` and above captured on this thread.
pub fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&locked(&buffer.0)).into_owned();
    (out, logs)
}

#[derive(Debug, Default)]
struct WorkspaceState {
    working_copies: BTreeSet<PathBuf>,
    branches: BTreeSet<String>,
    fail_create: bool,
    fail_remove: bool,
    calls: Vec<String>,
}

/// Workspace that creates plain directories instead of git worktrees.
#[derive(Debug, Default)]
pub struct FakeWorkspace {
    state: Mutex<WorkspaceState>,
}

impl FakeWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        locked(&self.state).fail_create = fail;
    }

    pub fn fail_remove(&self, fail: bool) {
        locked(&self.state).fail_remove = fail;
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        locked(&self.state).branches.contains(branch)
    }

    /// Calls in order, e.g. `"remove /tmp/x/.worktrees/1-1-setup"`.
    pub fn calls(&self) -> Vec<String> {
        locked(&self.state).calls.clone()
    }
}

impl Workspace for FakeWorkspace {
    fn create_working_copy(&self, path: &Path, branch: &str) -> Result<()> {
        let mut state = locked(&self.state);
        state.calls.push(format!("create {}", path.display()));
        if state.fail_create {
            bail!("scripted create failure for {}", path.display());
        }
        fs::create_dir_all(path).with_context(|| format!("create {}", path.display()))?;
        state.working_copies.insert(path.to_path_buf());
        state.branches.insert(branch.to_string());
        Ok(())
    }

    fn remove_working_copy(&self, path: &Path) -> Result<()> {
        let mut state = locked(&self.state);
        state.calls.push(format!("remove {}", path.display()));
        if state.fail_remove {
            bail!("scripted remove failure for {}", path.display());
        }
        match fs::remove_dir_all(path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err).with_context(|| format!("remove {}", path.display())),
        }
        state.working_copies.remove(path);
        Ok(())
    }

    fn list_working_copies(&self) -> Result<BTreeSet<PathBuf>> {
        Ok(locked(&self.state).working_copies.clone())
    }

    fn list_branches(&self) -> Result<BTreeSet<String>> {
        Ok(locked(&self.state).branches.clone())
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        let mut state = locked(&self.state);
        state.calls.push(format!("delete-branch {branch}"));
        state.branches.remove(branch);
        Ok(())
    }
}

#[derive(Debug)]
struct ContainerState {
    available: bool,
    running: BTreeSet<String>,
    calls: Vec<String>,
}

/// Container runtime that only tracks project names.
#[derive(Debug)]
pub struct FakeContainers {
    state: Mutex<ContainerState>,
}

impl Default for FakeContainers {
    fn default() -> Self {
        Self {
            state: Mutex::new(ContainerState {
                available: true,
                running: BTreeSet::new(),
                calls: Vec::new(),
            }),
        }
    }
}

impl FakeContainers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        locked(&self.state).available = available;
    }

    pub fn is_running(&self, project: &str) -> bool {
        locked(&self.state).running.contains(project)
    }

    /// Pretend a project was started outside any session.
    pub fn add_running(&self, project: &str) {
        locked(&self.state).running.insert(project.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        locked(&self.state).calls.clone()
    }
}

impl ContainerRuntime for FakeContainers {
    fn is_available(&self) -> bool {
        locked(&self.state).available
    }

    fn running_projects(&self) -> Result<BTreeSet<String>> {
        let state = locked(&self.state);
        if !state.available {
            bail!("container runtime unavailable");
        }
        Ok(state.running.clone())
    }

    fn start_project(&self, project: &str, _workdir: &Path, _env_file: Option<&Path>) -> Result<()> {
        let mut state = locked(&self.state);
        state.calls.push(format!("up {project}"));
        if !state.available {
            bail!("container runtime unavailable");
        }
        state.running.insert(project.to_string());
        Ok(())
    }

    fn stop_project(&self, project: &str) -> Result<()> {
        let mut state = locked(&self.state);
        state.calls.push(format!("down {project}"));
        state.running.remove(project);
        Ok(())
    }
}

/// In-memory board with fake workspace and containers rooted at `root`.
pub fn coordinator(
    root: &Path,
    keys: &[&str],
    cfg: BoardConfig,
) -> Coordinator<MemoryBackend, MemoryLock, FakeWorkspace, FakeContainers> {
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    let naming = BoardPaths::new(root).naming(&cfg);
    let store = BoardStore::new(MemoryBackend::default(), MemoryLock::default(), Box::new(keys));
    Coordinator::new(store, FakeWorkspace::new(), FakeContainers::new(), cfg, naming)
}

/// On-disk board under `root/.sprintboard` with fake workspace and containers.
///
/// The lock retries generously so concurrent tests never time out.
pub fn file_coordinator(
    root: &Path,
    keys: &[&str],
    cfg: BoardConfig,
) -> Coordinator<FileBackend, DirLock, FakeWorkspace, FakeContainers> {
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    let paths = BoardPaths::new(root);
    let naming = paths.naming(&cfg);
    let lock = DirLock::new(
        &paths.lock_path,
        RetryPolicy {
            attempts: 2_000,
            interval: Duration::from_millis(5),
        },
        Duration::from_secs(30),
    );
    let store = BoardStore::new(FileBackend::new(&paths.board_path), lock, Box::new(keys));
    Coordinator::new(store, FakeWorkspace::new(), FakeContainers::new(), cfg, naming)
}
