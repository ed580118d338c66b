//! Stable exit codes for sprintboard CLI commands.

use crate::error::BoardError;

/// Command succeeded with nothing to report.
pub const OK: i32 = 0;
/// Invalid input, config, board document, or any unclassified failure.
pub const INVALID: i32 = 1;
/// The story or resource is held by another session.
pub const CONFLICT: i32 = 2;
/// The board lock stayed busy for the whole retry budget; safe to retry.
pub const LOCK_TIMEOUT: i32 = 3;
/// Story status change out of order (or `done` without a PR URL).
pub const INVALID_TRANSITION: i32 = 4;
/// A bounded pool (port slots) is exhausted.
pub const EXHAUSTED: i32 = 5;
/// Advisory findings: stale sessions, orphans, or failed remediation steps.
pub const FINDINGS: i32 = 6;

/// Exit code for a failed command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match BoardError::find(err) {
        Some(BoardError::Conflict(_)) => CONFLICT,
        Some(BoardError::LockTimeout { .. }) => LOCK_TIMEOUT,
        Some(BoardError::InvalidTransition { .. } | BoardError::MissingPrUrl(_)) => {
            INVALID_TRANSITION
        }
        Some(BoardError::ResourceExhausted(_)) => EXHAUSTED,
        Some(
            BoardError::NotFound(_)
            | BoardError::Invariant(_)
            | BoardError::ConfirmationRequired { .. },
        )
        | None => INVALID,
    }
}
