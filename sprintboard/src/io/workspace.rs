//! Working copies and branches as seen by sessions and the reconciler.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::naming::Naming;
use crate::io::git::Git;

/// Source-control side of a session: one working copy on one branch.
pub trait Workspace {
    /// Create the working copy at `path` checked out on `branch`.
    fn create_working_copy(&self, path: &Path, branch: &str) -> Result<()>;
    /// Remove the working copy. Already gone is success.
    fn remove_working_copy(&self, path: &Path) -> Result<()>;
    /// Managed working copies that exist right now.
    fn list_working_copies(&self) -> Result<BTreeSet<PathBuf>>;
    /// Managed branches that exist right now.
    fn list_branches(&self) -> Result<BTreeSet<String>>;
    /// Delete a branch. Already gone is success.
    fn delete_branch(&self, branch: &str) -> Result<()>;
}

/// `git worktree` per story under the managed worktree root.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    git: Git,
    naming: Naming,
}

impl GitWorkspace {
    pub fn new(git: Git, naming: Naming) -> Self {
        Self { git, naming }
    }
}

impl Workspace for GitWorkspace {
    fn create_working_copy(&self, path: &Path, branch: &str) -> Result<()> {
        self.git.add_worktree(path, branch)
    }

    fn remove_working_copy(&self, path: &Path) -> Result<()> {
        self.git.remove_worktree(path)
    }

    fn list_working_copies(&self) -> Result<BTreeSet<PathBuf>> {
        let root = &self.naming.worktree_root;
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(root = %root.display(), "no worktree root yet");
                return Ok(BTreeSet::new());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read dir {}", root.display()));
            }
        };
        let mut copies = BTreeSet::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read dir entry in {}", root.display()))?;
            let path = entry.path();
            if path.is_dir() && self.naming.is_managed_working_copy(&path) {
                copies.insert(path);
            }
        }
        Ok(copies)
    }

    fn list_branches(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .git
            .local_branches()?
            .into_iter()
            .filter(|branch| self.naming.is_managed_branch(branch))
            .collect())
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        self.git.delete_branch(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Only directories directly under the worktree root are working copies.
    #[test]
    fn lists_managed_directories_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join(".worktrees");
        fs::create_dir_all(root.join("1-1-setup")).expect("mkdir");
        fs::create_dir_all(root.join("1-2-user-auth").join("nested")).expect("mkdir");
        fs::write(root.join("notes.txt"), "x").expect("write");

        let naming = Naming {
            branch_prefix: "story/".to_string(),
            worktree_root: root.clone(),
            project_prefix: "sb".to_string(),
        };
        let ws = GitWorkspace::new(Git::new(temp.path()), naming);
        let copies: Vec<PathBuf> = ws.list_working_copies().expect("list").into_iter().collect();
        assert_eq!(copies, vec![root.join("1-1-setup"), root.join("1-2-user-auth")]);
    }

    #[test]
    fn missing_root_lists_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let naming = Naming {
            branch_prefix: "story/".to_string(),
            worktree_root: temp.path().join("absent"),
            project_prefix: "sb".to_string(),
        };
        let ws = GitWorkspace::new(Git::new(temp.path()), naming);
        assert!(ws.list_working_copies().expect("list").is_empty());
    }
}
