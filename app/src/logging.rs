//! Structured logging setup.
//!
//! The core never logs through a process-global logger implicitly; callers
//! decide whether and how to install a subscriber. [`init`] is a convenience
//! entry point for binaries (the CLI) that wires `tracing-subscriber` up to
//! `RUST_LOG`, mirroring how the teacher application configures its own
//! `tracing` subscriber at startup.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber driven by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; subsequent calls are no-ops if a global
/// subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
