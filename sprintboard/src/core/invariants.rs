//! Board invariants checked before every write.

use std::collections::{HashMap, HashSet};

use crate::core::types::{Board, StoryStatus};

/// Check cross-record invariants the type system cannot express:
/// - Port slots are unique among sessions holding one
/// - Working-copy paths are unique
/// - Every session references an existing story
/// - An in-flight story's `claimed_by` names an existing session bound to it
/// - Claimed and later in-flight statuses have an owner
pub fn validate_invariants(board: &Board) -> Vec<String> {
    let mut errors = Vec::new();
    let mut slots: HashMap<u16, &str> = HashMap::new();
    let mut paths = HashSet::new();

    for (id, session) in &board.sessions {
        if id != &session.id {
            errors.push(format!(
                "session key '{}' does not match record id '{}'",
                id, session.id
            ));
        }
        if let Some(slot) = session.port_slot
            && let Some(other) = slots.insert(slot, id)
        {
            errors.push(format!(
                "port slot {} assigned to both '{}' and '{}'",
                slot, other, id
            ));
        }
        if !paths.insert(&session.working_copy) {
            errors.push(format!(
                "working copy {} assigned to more than one session",
                session.working_copy.display()
            ));
        }
        if !board.stories.contains_key(&session.story_key) {
            errors.push(format!(
                "session '{}' references unknown story '{}'",
                id, session.story_key
            ));
        }
    }

    for (key, story) in &board.stories {
        if key != &story.key {
            errors.push(format!(
                "story key '{}' does not match record key '{}'",
                key, story.key
            ));
        }
        let in_flight = matches!(
            story.status,
            StoryStatus::Claimed | StoryStatus::InProgress | StoryStatus::Review
        );
        if in_flight && !story.is_claimed() {
            errors.push(format!("story '{}' is {} with no owner", key, story.status));
        }
        // Done stories keep `claimed_by` as history after the session is removed.
        if !story.is_claimed() || story.status == StoryStatus::Done {
            continue;
        }
        match board.sessions.get(&story.claimed_by) {
            Some(session) if session.story_key == *key => {}
            Some(session) => errors.push(format!(
                "story '{}' claimed by session '{}' which works on '{}'",
                key, story.claimed_by, session.story_key
            )),
            None => errors.push(format!(
                "story '{}' claimed by unknown session '{}'",
                key, story.claimed_by
            )),
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::story;
    use crate::test_support::{board_with_stories, session};

    #[test]
    fn consistent_board_has_no_errors() {
        let mut board = board_with_stories(&["1-1-setup"]);
        story::claim(&mut board, "1-1-setup", "A").expect("claim");
        board
            .sessions
            .insert("A".to_string(), session("A", "1-1-setup"));
        assert!(validate_invariants(&board).is_empty());
    }

    #[test]
    fn duplicate_port_slot_is_reported() {
        let mut board = board_with_stories(&["1-1-setup", "1-2-user-auth"]);
        let mut a = session("A", "1-1-setup");
        a.port_slot = Some(2);
        let mut b = session("B", "1-2-user-auth");
        b.port_slot = Some(2);
        board.sessions.insert("A".to_string(), a);
        board.sessions.insert("B".to_string(), b);
        let errors = validate_invariants(&board);
        assert_eq!(errors, vec!["port slot 2 assigned to both 'A' and 'B'"]);
    }

    #[test]
    fn duplicate_working_copy_is_reported() {
        let mut board = board_with_stories(&["1-1-setup", "1-2-user-auth"]);
        let a = session("A", "1-1-setup");
        let mut b = session("B", "1-2-user-auth");
        b.working_copy = a.working_copy.clone();
        board.sessions.insert("A".to_string(), a);
        board.sessions.insert("B".to_string(), b);
        let errors = validate_invariants(&board);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("more than one session"));
    }

    /// A claim pointing at a removed session is a lost update to repair.
    #[test]
    fn dangling_claim_is_reported() {
        let mut board = board_with_stories(&["1-1-setup"]);
        story::claim(&mut board, "1-1-setup", "ghost").expect("claim");
        let errors = validate_invariants(&board);
        assert_eq!(
            errors,
            vec!["story '1-1-setup' claimed by unknown session 'ghost'"]
        );
    }
}
