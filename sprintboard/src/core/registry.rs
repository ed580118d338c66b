//! Session registry over an in-memory board.
//!
//! The registry never locks. Callers mutate the board inside
//! `BoardStore::transact`, which holds the board lock for the whole
//! read-modify-write.

use chrono::{DateTime, Utc};

use crate::core::types::{Board, Session, SessionPatch};
use crate::error::BoardError;

/// CRUD view over `board.sessions`.
pub struct SessionRegistry<'a> {
    board: &'a mut Board,
}

impl<'a> SessionRegistry<'a> {
    pub fn new(board: &'a mut Board) -> Self {
        Self { board }
    }

    /// Insert a new session.
    ///
    /// Fails with `Conflict` when the id is taken or the story is already
    /// claimed by a different session.
    pub fn add(&mut self, session: Session) -> Result<(), BoardError> {
        if self.board.sessions.contains_key(&session.id) {
            return Err(BoardError::Conflict(format!(
                "session '{}' already exists",
                session.id
            )));
        }
        if let Some(story) = self.board.stories.get(&session.story_key)
            && story.is_claimed()
            && story.claimed_by != session.id
        {
            return Err(BoardError::Conflict(format!(
                "story '{}' is claimed by session '{}'",
                session.story_key, story.claimed_by
            )));
        }
        if let Some(other) = self.board.session_for_story(&session.story_key) {
            return Err(BoardError::Conflict(format!(
                "story '{}' already has session '{}'",
                session.story_key, other.id
            )));
        }
        self.board.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Merge `patch` into the session and return the updated record.
    ///
    /// `last_checkpoint` moves to `now` when the patch reaches a checkpoint
    /// status or changes the current task.
    pub fn update(
        &mut self,
        id: &str,
        patch: SessionPatch,
        now: DateTime<Utc>,
    ) -> Result<&Session, BoardError> {
        let session = self
            .board
            .sessions
            .get_mut(id)
            .ok_or_else(|| BoardError::NotFound(format!("session '{}'", id)))?;

        let mut refresh = false;
        if let Some(status) = patch.status {
            refresh |= status.is_checkpoint_reaching();
            session.status = status;
        }
        if let Some(task) = patch.current_task {
            refresh |= task != session.current_task;
            session.current_task = task;
        }
        if let Some(stack) = patch.stack {
            session.stack = stack;
        }
        if let Some(slot) = patch.port_slot {
            session.port_slot = slot;
        }
        if let Some(project) = patch.compose_project {
            session.compose_project = project;
        }
        if refresh {
            session.last_checkpoint = now;
        }
        Ok(session)
    }

    /// Remove a session, returning it if it existed.
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.board.sessions.remove(id)
    }

    /// All sessions in id order.
    pub fn list(&self) -> Vec<&Session> {
        self.board.sessions.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::story;
    use crate::core::types::SessionStatus;
    use crate::test_support::{board_with_stories, session, ts};

    #[test]
    fn add_then_list_and_remove() {
        let mut board = board_with_stories(&["1-1-setup", "1-2-user-auth"]);
        let mut registry = SessionRegistry::new(&mut board);
        registry.add(session("A", "1-1-setup")).expect("add A");
        registry.add(session("B", "1-2-user-auth")).expect("add B");
        let ids: Vec<&str> = registry.list().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);

        assert!(registry.remove("A").is_some());
        assert!(registry.remove("A").is_none());
        assert_eq!(registry.list().len(), 1);
    }

    /// A story claimed by A cannot gain a session B.
    #[test]
    fn add_conflicts_with_other_claimant() {
        let mut board = board_with_stories(&["1-2-user-auth"]);
        story::claim(&mut board, "1-2-user-auth", "A").expect("claim");
        let mut registry = SessionRegistry::new(&mut board);
        let err = registry.add(session("B", "1-2-user-auth")).unwrap_err();
        assert!(matches!(err, BoardError::Conflict(_)));
        registry.add(session("A", "1-2-user-auth")).expect("owner may add");
    }

    #[test]
    fn add_rejects_duplicate_id_and_second_session_per_story() {
        let mut board = board_with_stories(&["1-1-setup", "1-2-user-auth"]);
        let mut registry = SessionRegistry::new(&mut board);
        registry.add(session("A", "1-1-setup")).expect("add");
        assert!(registry.add(session("A", "1-2-user-auth")).is_err());
        assert!(registry.add(session("B", "1-1-setup")).is_err());
    }

    /// Reaching a checkpoint refreshes the staleness clock; blocking does not.
    #[test]
    fn update_refreshes_checkpoint_on_checkpoint_statuses() {
        let mut board = board_with_stories(&["1-1-setup"]);
        let mut registry = SessionRegistry::new(&mut board);
        registry.add(session("A", "1-1-setup")).expect("add");

        let patch = SessionPatch {
            status: Some(SessionStatus::Blocked),
            ..SessionPatch::default()
        };
        let updated = registry.update("A", patch, ts(100)).expect("update");
        assert_eq!(updated.status, SessionStatus::Blocked);
        assert_eq!(updated.last_checkpoint, ts(0));

        let patch = SessionPatch {
            status: Some(SessionStatus::Checkpoint),
            ..SessionPatch::default()
        };
        let updated = registry.update("A", patch, ts(200)).expect("update");
        assert_eq!(updated.last_checkpoint, ts(200));
    }

    #[test]
    fn update_refreshes_checkpoint_on_task_change() {
        let mut board = board_with_stories(&["1-1-setup"]);
        let mut registry = SessionRegistry::new(&mut board);
        registry.add(session("A", "1-1-setup")).expect("add");
        let patch = SessionPatch {
            current_task: Some("task 2".to_string()),
            port_slot: Some(Some(3)),
            ..SessionPatch::default()
        };
        let updated = registry.update("A", patch, ts(50)).expect("update");
        assert_eq!(updated.current_task, "task 2");
        assert_eq!(updated.port_slot, Some(3));
        assert_eq!(updated.last_checkpoint, ts(50));
    }

    #[test]
    fn update_missing_session_is_not_found() {
        let mut board = board_with_stories(&[]);
        let mut registry = SessionRegistry::new(&mut board);
        let err = registry
            .update("ghost", SessionPatch::default(), ts(0))
            .unwrap_err();
        assert!(matches!(err, BoardError::NotFound(_)));
    }
}
