//! Git adapter for story working copies and branches.
//!
//! Every session gets its own `git worktree` on a managed branch, so the
//! wrapper only needs the handful of worktree and branch commands below.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Wrapper for executing git commands against the main repository.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Local branch names, short form.
    pub fn local_branches(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        Ok(parse_ref_list(&out))
    }

    /// Check out `branch` into a new worktree at `path`, creating the branch
    /// from HEAD when it does not exist yet.
    #[instrument(skip_all, fields(branch, path = %path.display()))]
    pub fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let path_arg = path.to_string_lossy();
        if self.branch_exists(branch)? {
            debug!("reusing existing branch");
            self.run_checked(&["worktree", "add", &path_arg, branch])?;
        } else {
            debug!("creating branch");
            self.run_checked(&["worktree", "add", "-b", branch, &path_arg])?;
        }
        Ok(())
    }

    /// Remove the worktree at `path`, discarding local changes.
    ///
    /// A directory git no longer tracks is deleted directly; stale
    /// administrative entries are pruned either way. Missing is success.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        let path_arg = path.to_string_lossy();
        let output = self.run(&["worktree", "remove", "--force", &path_arg])?;
        if !output.status.success() {
            warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git worktree remove failed; deleting directory"
            );
            match fs::remove_dir_all(path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("remove {}", path.display()));
                }
            }
        }
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    /// Force-delete a local branch.
    #[instrument(skip_all, fields(branch))]
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        if !self.branch_exists(branch)? {
            debug!("branch already gone");
            return Ok(());
        }
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_ref_list(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success())
    }

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
                .args(args)
                .current_dir(dir)
                .output()
                .expect("spawn git");
            assert!(status.status.success(), "git {:?} failed", args);
        };
        run(&["init", "-q"]);
        run(&["commit", "-q", "--allow-empty", "-m", "init"]);
    }

    #[test]
    fn parses_ref_list_skipping_blanks() {
        assert_eq!(
            parse_ref_list("main\n story/1-1-setup \n\n"),
            vec!["main", "story/1-1-setup"]
        );
    }

    /// Worktree create/remove and branch delete against a real repository.
    #[test]
    fn worktree_lifecycle() {
        if !git_available() {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        init_repo(temp.path());
        let git = Git::new(temp.path());
        let wc = temp.path().join(".worktrees").join("1-1-setup");

        git.add_worktree(&wc, "story/1-1-setup").expect("add worktree");
        assert!(wc.is_dir());
        assert!(
            git.local_branches()
                .expect("branches")
                .contains(&"story/1-1-setup".to_string())
        );

        git.remove_worktree(&wc).expect("remove worktree");
        assert!(!wc.exists());
        git.remove_worktree(&wc).expect("remove again is a no-op");

        git.delete_branch("story/1-1-setup").expect("delete branch");
        assert!(!git.branch_exists("story/1-1-setup").expect("exists"));
        git.delete_branch("story/1-1-setup").expect("delete again");
    }
}
