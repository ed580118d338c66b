//! Read-only board report for `sprintboard status` and `sprintboard ports`.

use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::core::ports::{PortAdvisory, PortPlan, slots_in_use};
use crate::core::stale::{StaleFinding, find_stale};
use crate::core::types::{Board, Session, Story};
use crate::io::config::BoardConfig;
use crate::io::lock::BoardLock;
use crate::io::store::{BoardBackend, BoardStore};

/// Snapshot of the board plus advisory findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub sessions: Vec<Session>,
    pub stories: Vec<Story>,
    pub stale: Vec<StaleFinding>,
    pub advisories: Vec<PortAdvisory>,
}

impl StatusReport {
    pub fn build(board: &Board, cfg: &BoardConfig, now: DateTime<Utc>) -> Self {
        let advisories = if cfg.ports.enabled {
            cfg.port_plan().advisories()
        } else {
            Vec::new()
        };
        Self {
            sessions: board.sessions.values().cloned().collect(),
            stories: board.stories.values().cloned().collect(),
            stale: find_stale(board, now, cfg.stale_threshold()),
            advisories,
        }
    }

    /// Stale sessions are the only findings worth a non-zero exit.
    pub fn has_findings(&self) -> bool {
        !self.stale.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "stories:");
        for story in &self.stories {
            let _ = write!(out, "  {:<32} {}", story.key, story.status);
            if story.is_claimed() {
                let _ = write!(out, "  session={}", story.claimed_by);
            }
            if !story.pr_url.is_empty() {
                let _ = write!(out, "  pr={}", story.pr_url);
            }
            out.push('\n');
        }
        let _ = writeln!(out, "sessions:");
        if self.sessions.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for session in &self.sessions {
            let slot = session
                .port_slot
                .map_or_else(|| "-".to_string(), |slot| slot.to_string());
            let _ = writeln!(
                out,
                "  {}  story={}  status={}  stack={}  slot={}  last={}  task={}",
                session.id,
                session.story_key,
                session.status,
                session.stack,
                slot,
                session.last_activity().format("%Y-%m-%dT%H:%M:%SZ"),
                session.current_task
            );
        }
        for finding in &self.stale {
            let _ = writeln!(
                out,
                "stale: session {} on {} idle {}h",
                finding.session_id,
                finding.story_key,
                finding.age.num_hours()
            );
        }
        for advisory in &self.advisories {
            let _ = writeln!(out, "advisory: {advisory}");
        }
        out
    }
}

/// Build the status report from the current board (no lock).
pub fn board_status<B: BoardBackend, L: BoardLock>(
    store: &BoardStore<B, L>,
    cfg: &BoardConfig,
    now: DateTime<Utc>,
) -> Result<StatusReport> {
    let board = store.read()?;
    Ok(StatusReport::build(&board, cfg, now))
}

/// Port layout table: one line per session slot and who holds it.
pub fn render_ports(board: &Board, plan: &PortPlan) -> String {
    let used = slots_in_use(board);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "slot 0: {}-{} (shared services)",
        plan.slot_range(0).start(),
        plan.slot_range(0).end()
    );
    for slot in 1..=plan.max_worktrees {
        let range = plan.slot_range(slot);
        let holder = if used.contains(&slot) {
            board
                .sessions
                .values()
                .find(|s| s.port_slot == Some(slot))
                .map_or("?", |s| s.id.as_str())
        } else {
            "free"
        };
        let _ = writeln!(out, "slot {slot}: {}-{} {holder}", range.start(), range.end());
    }
    let _ = writeln!(out, "range end: {}", plan.range_end());
    for advisory in plan.advisories() {
        let _ = writeln!(out, "advisory: {advisory}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{board_with_stories, session, ts};

    #[test]
    fn reports_stale_sessions() {
        let mut board = board_with_stories(&["1-1-setup"]);
        crate::core::story::claim(&mut board, "1-1-setup", "A").expect("claim");
        board
            .sessions
            .insert("A".to_string(), session("A", "1-1-setup"));
        let cfg = BoardConfig::default();

        let fresh = StatusReport::build(&board, &cfg, ts(3600));
        assert!(!fresh.has_findings());
        let later = StatusReport::build(&board, &cfg, ts(5 * 3600));
        assert!(later.has_findings());
        assert!(later.render().contains("stale: session A on 1-1-setup idle 5h"));
    }

    /// Advisories only appear when ports are enabled.
    #[test]
    fn advisories_follow_port_config() {
        let board = board_with_stories(&[]);
        let mut cfg = BoardConfig::default();
        cfg.ports.base = 80;
        assert!(StatusReport::build(&board, &cfg, ts(0)).advisories.is_empty());
        cfg.ports.enabled = true;
        assert_eq!(
            StatusReport::build(&board, &cfg, ts(0)).advisories,
            vec![PortAdvisory::PrivilegedBase { base: 80 }]
        );
    }

    #[test]
    fn port_table_shows_holders() {
        let mut board = board_with_stories(&["1-1-setup"]);
        let mut s = session("A", "1-1-setup");
        s.port_slot = Some(2);
        board.sessions.insert("A".to_string(), s);
        let plan = PortPlan {
            base: 10200,
            step: 10,
            max_worktrees: 3,
        };
        let table = render_ports(&board, &plan);
        assert!(table.contains("slot 1: 10210-10219 free"));
        assert!(table.contains("slot 2: 10220-10229 A"));
        assert!(table.contains("range end: 10229"));
    }
}
