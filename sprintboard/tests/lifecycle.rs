//! End-to-end session scenarios against an on-disk board.
//!
//! Git and the container runtime are replaced by the scripted fakes from
//! `test_support`; everything else (lock, store, env file) is real.

use sprintboard::core::reconcile::GcMode;
use sprintboard::core::types::StoryStatus;
use sprintboard::gc::{self, StepStatus};
use sprintboard::io::config::BoardConfig;
use sprintboard::session::ClaimRequest;
use sprintboard::status::StatusReport;
use sprintboard::test_support::{file_coordinator, ts};

const HOUR: i64 = 3600;

fn isolated_config() -> BoardConfig {
    let mut cfg = BoardConfig::default();
    cfg.ports.enabled = true;
    cfg.ports.services.insert("web".to_string(), 0);
    cfg.containers.enabled = true;
    cfg
}

/// ready-for-dev -> claimed -> in-progress -> review -> done, then teardown.
#[test]
fn story_lifecycle_from_claim_to_done() {
    let temp = tempfile::tempdir().expect("tempdir");
    let coord = file_coordinator(temp.path(), &["1-2-user-auth"], isolated_config());

    let session = coord
        .claim(
            ClaimRequest {
                story_key: "1-2-user-auth".to_string(),
                session_id: Some("A".to_string()),
                task: Some("scaffold".to_string()),
            },
            ts(0),
        )
        .expect("claim");
    let board = coord.store().read().expect("read");
    assert_eq!(board.stories["1-2-user-auth"].status, StoryStatus::Claimed);
    assert_eq!(board.stories["1-2-user-auth"].claimed_by, "A");
    assert_eq!(session.port_slot, Some(1));
    assert_eq!(session.compose_project.as_deref(), Some("sb-1-2-user-auth"));
    assert!(coord.containers().is_running("sb-1-2-user-auth"));
    let env = std::fs::read_to_string(coord.env_file_path(&session.working_copy)).expect("env");
    assert!(env.contains("WEB_PORT=10210"));

    coord.start("A", Some("login form".to_string()), ts(HOUR)).expect("start");
    coord.checkpoint("A", None, false, ts(2 * HOUR)).expect("checkpoint");
    coord
        .review("A", "https://git.example.com/pr/12", ts(3 * HOUR))
        .expect("review");
    let board = coord.store().read().expect("read");
    assert_eq!(board.stories["1-2-user-auth"].status, StoryStatus::Review);
    assert_eq!(board.stories["1-2-user-auth"].pr_url, "https://git.example.com/pr/12");

    coord.complete("A", ts(4 * HOUR)).expect("complete");
    let board = coord.store().read().expect("read");
    let story = &board.stories["1-2-user-auth"];
    assert_eq!(story.status, StoryStatus::Done);
    assert_eq!(story.completed_at, Some(ts(4 * HOUR)));
    assert!(board.sessions.is_empty());
    assert!(!coord.containers().is_running("sb-1-2-user-auth"));
    assert!(!session.working_copy.exists());
    assert!(!coord.workspace().has_branch(&session.branch));

    let report = gc::run(&coord, &GcMode::Orphans, false, ts(5 * HOUR)).expect("gc");
    assert!(report.findings.is_empty());
    assert!(report.targets.is_empty());
}

/// A stale session is flagged, survives orphan-mode gc, and is reclaimed
/// only when the operator selects it.
#[test]
fn stale_session_is_reclaimed_after_confirmation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = isolated_config();
    let coord = file_coordinator(temp.path(), &["1-3-profile"], cfg.clone());
    let session = coord
        .claim(
            ClaimRequest {
                story_key: "1-3-profile".to_string(),
                session_id: Some("B".to_string()),
                task: None,
            },
            ts(0),
        )
        .expect("claim");
    coord.start("B", None, ts(0)).expect("start");

    let board = coord.store().read().expect("read");
    let status = StatusReport::build(&board, &cfg, ts(5 * HOUR));
    assert_eq!(status.stale.len(), 1);
    assert_eq!(status.stale[0].session_id, "B");

    let report = gc::run(&coord, &GcMode::Orphans, false, ts(5 * HOUR)).expect("gc");
    assert_eq!(report.stale.len(), 1);
    assert!(report.targets.is_empty());
    assert!(session.working_copy.exists());

    let report = gc::run(
        &coord,
        &GcMode::Selected(vec!["B".to_string()]),
        false,
        ts(5 * HOUR),
    )
    .expect("selected gc");
    assert!(!report.has_failures());
    assert!(
        report.targets[0]
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Done)
    );
    assert!(!coord.containers().is_running("sb-1-3-profile"));
    assert!(!session.working_copy.exists());
    assert!(!coord.workspace().has_branch(&session.branch));

    let board = coord.store().read().expect("read");
    assert!(board.sessions.is_empty());
    let story = &board.stories["1-3-profile"];
    assert_eq!(story.status, StoryStatus::ReadyForDev);
    assert!(story.claimed_by.is_empty());

    let again = gc::run(&coord, &GcMode::Orphans, false, ts(6 * HOUR)).expect("gc again");
    assert!(again.findings.is_empty());
    assert!(again.targets.is_empty());

    let reclaimed = coord
        .claim(
            ClaimRequest {
                story_key: "1-3-profile".to_string(),
                session_id: Some("C".to_string()),
                task: None,
            },
            ts(6 * HOUR),
        )
        .expect("claim again");
    assert_eq!(reclaimed.port_slot, Some(1));
}

/// Containers nobody claims are stopped by orphan-mode gc.
#[test]
fn orphan_container_project_is_stopped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let coord = file_coordinator(temp.path(), &["1-1-setup"], isolated_config());
    coord.containers().add_running("sb-7-7-abandoned");
    coord.containers().add_running("unrelated-project");

    let report = gc::run(&coord, &GcMode::Orphans, false, ts(0)).expect("gc");
    assert_eq!(report.findings.len(), 1);
    assert!(!coord.containers().is_running("sb-7-7-abandoned"));
    assert!(coord.containers().is_running("unrelated-project"));
}
