//! Board data model shared by core logic and the persisted document.
//!
//! These types are the stable contract for `.sprintboard/board.json`. Field
//! names are serialized as-is; maps are `BTreeMap` so the document is written
//! in a deterministic order.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a development session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    InProgress,
    Checkpoint,
    Blocked,
    Review,
    Done,
}

impl SessionStatus {
    /// Statuses that count as fresh activity for staleness purposes.
    pub fn is_checkpoint_reaching(self) -> bool {
        matches!(
            self,
            SessionStatus::Checkpoint | SessionStatus::Review | SessionStatus::Done
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in-progress",
            SessionStatus::Checkpoint => "checkpoint",
            SessionStatus::Blocked => "blocked",
            SessionStatus::Review => "review",
            SessionStatus::Done => "done",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backlog item status. Declaration order is the forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryStatus {
    ReadyForDev,
    Claimed,
    InProgress,
    Review,
    Done,
}

impl StoryStatus {
    /// The only status reachable by a normal `advance`.
    pub fn successor(self) -> Option<StoryStatus> {
        match self {
            StoryStatus::ReadyForDev => Some(StoryStatus::Claimed),
            StoryStatus::Claimed => Some(StoryStatus::InProgress),
            StoryStatus::InProgress => Some(StoryStatus::Review),
            StoryStatus::Review => Some(StoryStatus::Done),
            StoryStatus::Done => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::ReadyForDev => "ready-for-dev",
            StoryStatus::Claimed => "claimed",
            StoryStatus::InProgress => "in-progress",
            StoryStatus::Review => "review",
            StoryStatus::Done => "done",
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One active development run bound to a story, working copy and branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub story_key: String,
    pub branch: String,
    pub working_copy: PathBuf,
    /// Project stack detected in the working copy (`rust`, `node`, ...).
    pub stack: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_slot: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose_project: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_checkpoint: DateTime<Utc>,
    #[serde(default)]
    pub current_task: String,
}

impl Session {
    /// Most recent sign of life: the later of start and last checkpoint.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_checkpoint.max(self.started_at)
    }
}

/// Backlog item tracked on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub key: String,
    pub status: StoryStatus,
    /// Session id holding the story, or empty.
    #[serde(default)]
    pub claimed_by: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub pr_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Story {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: StoryStatus::ReadyForDev,
            claimed_by: String::new(),
            branch: String::new(),
            pr_url: String::new(),
            completed_at: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        !self.claimed_by.is_empty()
    }
}

/// The shared coordination document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
    #[serde(default)]
    pub stories: BTreeMap<String, Story>,
}

impl Board {
    /// Build a fresh board with every key `ready-for-dev`.
    pub fn from_story_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stories = keys
            .into_iter()
            .map(|key| {
                let story = Story::new(key);
                (story.key.clone(), story)
            })
            .collect();
        Self {
            sessions: BTreeMap::new(),
            stories,
        }
    }

    pub fn session_for_story(&self, story_key: &str) -> Option<&Session> {
        self.sessions
            .values()
            .find(|session| session.story_key == story_key)
    }
}

/// Partial update applied by `SessionRegistry::update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub current_task: Option<String>,
    pub stack: Option<String>,
    /// `Some(None)` clears the slot.
    pub port_slot: Option<Option<u16>>,
    pub compose_project: Option<Option<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_successors_walk_forward_to_done() {
        let mut status = StoryStatus::ReadyForDev;
        let mut seen = vec![status];
        while let Some(next) = status.successor() {
            assert!(next > status);
            seen.push(next);
            status = next;
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(status, StoryStatus::Done);
    }

    /// Status names are part of the persisted document format.
    #[test]
    fn statuses_serialize_kebab_case() {
        assert_eq!(
            serde_json::to_string(&StoryStatus::ReadyForDev).expect("json"),
            "\"ready-for-dev\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::InProgress).expect("json"),
            "\"in-progress\""
        );
    }

    #[test]
    fn board_from_keys_starts_ready_for_dev() {
        let board = Board::from_story_keys(["1-1-setup", "1-2-user-auth"]);
        assert_eq!(board.stories.len(), 2);
        assert!(
            board
                .stories
                .values()
                .all(|s| s.status == StoryStatus::ReadyForDev && !s.is_claimed())
        );
    }
}
