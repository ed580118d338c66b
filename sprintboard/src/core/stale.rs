//! Stale session detection.
//!
//! Detection is advisory: findings are reported, never remediated here.
//! Reclaiming another session's resources goes through `gc` with operator
//! confirmation, since clock skew between machines can produce false positives.

use chrono::{DateTime, Duration, Utc};

use crate::core::types::{Board, Session, SessionStatus};

/// A session whose last activity is older than the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleFinding {
    pub session_id: String,
    pub story_key: String,
    pub last_activity: DateTime<Utc>,
    pub age: Duration,
}

/// True iff the session is unfinished and idle for longer than `threshold`.
pub fn is_stale(session: &Session, now: DateTime<Utc>, threshold: Duration) -> bool {
    if matches!(session.status, SessionStatus::Done | SessionStatus::Review) {
        return false;
    }
    now - session.last_activity() > threshold
}

/// Collect stale sessions in session-id order.
pub fn find_stale(board: &Board, now: DateTime<Utc>, threshold: Duration) -> Vec<StaleFinding> {
    board
        .sessions
        .values()
        .filter(|session| is_stale(session, now, threshold))
        .map(|session| StaleFinding {
            session_id: session.id.clone(),
            story_key: session.story_key.clone(),
            last_activity: session.last_activity(),
            age: now - session.last_activity(),
        })
        .collect()
}
