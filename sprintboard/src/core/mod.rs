//! Deterministic, pure coordination logic.
//!
//! Core modules must be free of I/O side effects. They operate on an in-memory
//! [`types::Board`] and return deterministic outputs suitable for tests. The
//! caller is responsible for holding the board lock around any mutation.

pub mod invariants;
pub mod naming;
pub mod ports;
pub mod reconcile;
pub mod registry;
pub mod stale;
pub mod story;
pub mod types;
