//! Story state machine.
//!
//! `ready-for-dev -> claimed -> in-progress -> review -> done`, strictly
//! forward. The only way back is [`force_reset`], reserved for the reconciler.

use chrono::{DateTime, Utc};

use crate::core::types::{Board, Story, StoryStatus};
use crate::error::BoardError;

/// Claim a `ready-for-dev` story for `session_id`.
pub fn claim(board: &mut Board, key: &str, session_id: &str) -> Result<(), BoardError> {
    let story = story_mut(board, key)?;
    if story.status != StoryStatus::ReadyForDev {
        let holder = if story.claimed_by.is_empty() {
            String::new()
        } else {
            format!(" by session '{}'", story.claimed_by)
        };
        return Err(BoardError::Conflict(format!(
            "story '{}' is {}{}",
            key, story.status, holder
        )));
    }
    story.status = StoryStatus::Claimed;
    story.claimed_by = session_id.to_string();
    Ok(())
}

/// Move a story to its immediate successor status.
///
/// `claimed` is only reachable through [`claim`] (it needs an owner), and
/// `done` requires `pr_url` and stamps `completed_at` in the same change.
pub fn advance(
    board: &mut Board,
    key: &str,
    to: StoryStatus,
    now: DateTime<Utc>,
) -> Result<(), BoardError> {
    let story = story_mut(board, key)?;
    let from = story.status;
    if from.successor() != Some(to) || to == StoryStatus::Claimed {
        return Err(BoardError::InvalidTransition {
            key: key.to_string(),
            from,
            to,
        });
    }
    if to == StoryStatus::Done {
        if story.pr_url.trim().is_empty() {
            return Err(BoardError::MissingPrUrl(key.to_string()));
        }
        story.completed_at = Some(now);
    }
    story.status = to;
    Ok(())
}

/// Record the pull request URL for a story that is not yet done.
pub fn attach_pr(board: &mut Board, key: &str, pr_url: &str) -> Result<(), BoardError> {
    let story = story_mut(board, key)?;
    if story.status == StoryStatus::Done {
        return Err(BoardError::Conflict(format!(
            "story '{}' is already done",
            key
        )));
    }
    story.pr_url = pr_url.trim().to_string();
    Ok(())
}

/// Return a claimed/in-progress/review story to `ready-for-dev`.
///
/// Returns `Ok(false)` when the story was already `ready-for-dev`. A `done`
/// story is never reset.
pub fn force_reset(board: &mut Board, key: &str) -> Result<bool, BoardError> {
    let story = story_mut(board, key)?;
    match story.status {
        StoryStatus::ReadyForDev => Ok(false),
        StoryStatus::Done => Err(BoardError::InvalidTransition {
            key: key.to_string(),
            from: StoryStatus::Done,
            to: StoryStatus::ReadyForDev,
        }),
        StoryStatus::Claimed | StoryStatus::InProgress | StoryStatus::Review => {
            story.status = StoryStatus::ReadyForDev;
            story.claimed_by.clear();
            story.branch.clear();
            story.pr_url.clear();
            Ok(true)
        }
    }
}

fn story_mut<'a>(board: &'a mut Board, key: &str) -> Result<&'a mut Story, BoardError> {
    board
        .stories
        .get_mut(key)
        .ok_or_else(|| BoardError::NotFound(format!("story '{}'", key)))
}
