// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tracing subscriber setup for binaries and long-lived test harnesses.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber honoring `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Like [`init_logging`] but emitting one JSON object per line, for
/// deployments that ship logs to a collector.
pub fn init_json_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}
