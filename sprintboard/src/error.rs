//! Typed failure signals that callers must be able to tell apart.
//!
//! Side-effecting code returns `anyhow::Result` and carries a [`BoardError`]
//! inside the `anyhow::Error` when the failure is one of the signals below.
//! Use [`BoardError::find`] to recover it.

use thiserror::Error;

use crate::core::types::StoryStatus;

/// Distinguishable coordination failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// The story (or other exclusive resource) is already held by someone else.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The board lock could not be acquired within the retry budget.
    #[error("board lock busy after {attempts} attempts ({waited_ms}ms)")]
    LockTimeout { attempts: u32, waited_ms: u64 },

    /// A story status change that is not the immediate forward successor.
    #[error("invalid transition for story '{key}': {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: StoryStatus,
        to: StoryStatus,
    },

    /// A bounded pool (port slots) has no free entry left.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Referenced session or story does not exist on the board.
    #[error("not found: {0}")]
    NotFound(String),

    /// The board would violate a consistency invariant.
    #[error("board invariants violated:\n- {}", .0.join("\n- "))]
    Invariant(Vec<String>),

    /// `done` requires a pull request URL on the story.
    #[error("story '{0}' has no pr_url; attach one before completing")]
    MissingPrUrl(String),

    /// Force-mode reconciliation without the confirmation token.
    #[error("force mode requires --confirm {expected}")]
    ConfirmationRequired { expected: String },
}

impl BoardError {
    /// Only lock contention is safe to retry automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BoardError::LockTimeout { .. })
    }

    /// Find a `BoardError` anywhere in an `anyhow` error chain.
    pub fn find(err: &anyhow::Error) -> Option<&BoardError> {
        err.chain().find_map(|cause| cause.downcast_ref::<BoardError>())
    }
}
