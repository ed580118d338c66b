//! Development-time tracing.
//!
//! Diagnostics go to stderr and are filtered by `RUST_LOG`. Command output
//! (status tables, gc reports) is printed to stdout and is unaffected.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn` so operator-relevant warnings
/// (stale sessions, degraded isolation, lock takeovers) are always shown.
///
/// # Example
/// ```bash
/// RUST_LOG=sprintboard=debug sprintboard gc --dry-run
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
