//! Sprint-board coordination and resource reconciliation.
//!
//! Several development sessions work one backlog in parallel, each in its own
//! working copy, branch, port slot and container project. A shared board
//! document records who holds which story; every change to it happens under
//! one lock. The reconciler compares the board against what actually exists
//! and cleans up what either side left behind.
//!
//! - **[`core`]**: Pure, deterministic logic (story state machine, session
//!   registry, invariants, staleness, port slots, reconciliation planning).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (lock, board store, config, git,
//!   containers, child processes). Isolated behind traits for fakes in tests.
//!
//! Orchestration modules ([`session`], [`gc`], [`status`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod gc;
pub mod io;
pub mod logging;
pub mod session;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
