//! Managed resource names derived from a story key.
//!
//! The reconciler only audits resources that match these patterns, so every
//! resource a session creates must be named through this module.

use std::path::{Path, PathBuf};

/// Naming scheme for branches, working copies, and container projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    pub branch_prefix: String,
    pub worktree_root: PathBuf,
    pub project_prefix: String,
}

impl Naming {
    pub fn branch(&self, story_key: &str) -> String {
        format!("{}{}", self.branch_prefix, story_key)
    }

    pub fn working_copy(&self, story_key: &str) -> PathBuf {
        self.worktree_root.join(story_key)
    }

    pub fn compose_project(&self, story_key: &str) -> String {
        slugify(&format!("{}-{}", self.project_prefix, story_key))
    }

    pub fn is_managed_branch(&self, branch: &str) -> bool {
        self.story_key_of_branch(branch).is_some()
    }

    pub fn is_managed_project(&self, project: &str) -> bool {
        self.story_key_of_project(project).is_some()
    }

    pub fn is_managed_working_copy(&self, path: &Path) -> bool {
        self.story_key_of_working_copy(path).is_some()
    }

    pub fn story_key_of_branch(&self, branch: &str) -> Option<String> {
        branch
            .strip_prefix(&self.branch_prefix)
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
    }

    pub fn story_key_of_project(&self, project: &str) -> Option<String> {
        project
            .strip_prefix(&slugify(&self.project_prefix))
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
    }

    pub fn story_key_of_working_copy(&self, path: &Path) -> Option<String> {
        if path.parent() != Some(self.worktree_root.as_path()) {
            return None;
        }
        path.file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
    }
}

/// Lowercase, collapse every run of non-alphanumerics into one `-`.
///
/// `"Story 1.2: User Auth"` becomes `"story-1-2-user-auth"`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> Naming {
        Naming {
            branch_prefix: "story/".to_string(),
            worktree_root: PathBuf::from("/repo/.worktrees"),
            project_prefix: "sb".to_string(),
        }
    }

    #[test]
    fn derives_names_from_story_key() {
        let n = naming();
        assert_eq!(n.branch("1-2-user-auth"), "story/1-2-user-auth");
        assert_eq!(
            n.working_copy("1-2-user-auth"),
            PathBuf::from("/repo/.worktrees/1-2-user-auth")
        );
        assert_eq!(n.compose_project("1-2-user-auth"), "sb-1-2-user-auth");
    }

    /// Unmanaged names are invisible to the reconciler.
    #[test]
    fn recognizes_only_managed_resources() {
        let n = naming();
        assert!(n.is_managed_branch("story/1-2-user-auth"));
        assert!(!n.is_managed_branch("main"));
        assert!(!n.is_managed_branch("story/"));
        assert!(n.is_managed_project("sb-1-2-user-auth"));
        assert!(!n.is_managed_project("sbx-1"));
        assert!(!n.is_managed_project("other"));
        assert!(n.is_managed_working_copy(Path::new("/repo/.worktrees/1-2-user-auth")));
        assert!(!n.is_managed_working_copy(Path::new("/repo/src")));
    }

    #[test]
    fn recovers_story_key_from_names() {
        let n = naming();
        assert_eq!(
            n.story_key_of_branch("story/1-2-user-auth").as_deref(),
            Some("1-2-user-auth")
        );
        assert_eq!(
            n.story_key_of_project("sb-1-2-user-auth").as_deref(),
            Some("1-2-user-auth")
        );
        assert_eq!(
            n.story_key_of_working_copy(Path::new("/repo/.worktrees/1-2-user-auth"))
                .as_deref(),
            Some("1-2-user-auth")
        );
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Story 1.2: User Auth"), "story-1-2-user-auth");
        assert_eq!(slugify("  --Already-Slug--  "), "already-slug");
        assert_eq!(slugify("!!!"), "");
    }
}
