//! Backlog import: the only external source of story keys.
//!
//! Read once, when the board document does not exist yet.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::core::naming::slugify;

/// `### Story 1.2: User Auth` (any heading level).
static STORY_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#{1,6}\s*Story\s+(\d+)\.(\d+)\s*[:\-]\s*(.+?)\s*$").expect("story heading regex")
});

/// `- key: 1-2-user-auth`
static KEY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s*key:\s*([a-z0-9][a-z0-9-]*)\s*$").expect("key line regex")
});

/// Source of story keys for board bootstrap.
pub trait BacklogSource {
    fn story_keys(&self) -> Result<Vec<String>>;
}

/// Fixed list of keys.
impl BacklogSource for Vec<String> {
    fn story_keys(&self) -> Result<Vec<String>> {
        Ok(self.clone())
    }
}

/// Markdown backlog file. A missing file yields an empty board.
#[derive(Debug, Clone)]
pub struct MarkdownBacklog {
    path: PathBuf,
}

impl MarkdownBacklog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BacklogSource for MarkdownBacklog {
    fn story_keys(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no backlog file; starting with empty board");
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read backlog {}", self.path.display()))?;
        let keys = parse_story_keys(&contents);
        debug!(path = %self.path.display(), count = keys.len(), "backlog parsed");
        Ok(keys)
    }
}

/// Extract story keys in document order, first occurrence wins.
pub fn parse_story_keys(markdown: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();
    for line in markdown.lines() {
        let key = if let Some(caps) = STORY_HEADING.captures(line) {
            format!("{}-{}-{}", &caps[1], &caps[2], slugify(&caps[3]))
        } else if let Some(caps) = KEY_LINE.captures(line) {
            caps[1].to_string()
        } else {
            continue;
        };
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    keys
}
