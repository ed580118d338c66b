//! Canonical paths within `.sprintboard/` for a project root.

use std::path::PathBuf;

use crate::core::naming::Naming;
use crate::io::config::BoardConfig;

/// All canonical board paths for a project root.
#[derive(Debug, Clone)]
pub struct BoardPaths {
    pub root: PathBuf,
    pub board_dir: PathBuf,
    pub board_path: PathBuf,
    pub lock_path: PathBuf,
    pub config_path: PathBuf,
}

impl BoardPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let board_dir = root.join(".sprintboard");
        Self {
            root: root.clone(),
            board_dir: board_dir.clone(),
            board_path: board_dir.join("board.json"),
            lock_path: board_dir.join("board.lock"),
            config_path: board_dir.join("config.toml"),
        }
    }

    /// Root directory holding one working copy per story.
    pub fn worktree_root(&self, cfg: &BoardConfig) -> PathBuf {
        self.root.join(&cfg.worktree_root)
    }

    pub fn backlog_path(&self, cfg: &BoardConfig) -> PathBuf {
        self.root.join(&cfg.backlog_path)
    }

    /// Resource naming anchored at this root.
    pub fn naming(&self, cfg: &BoardConfig) -> Naming {
        Naming {
            branch_prefix: cfg.branch_prefix.clone(),
            worktree_root: self.worktree_root(cfg),
            project_prefix: cfg.containers.project_prefix.clone(),
        }
    }
}
