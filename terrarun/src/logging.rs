//! Tracing setup for the CLI.
//!
//! Diagnostics go to stderr so they never mix with tool output or query
//! results on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` so keep-set decisions and pruned
/// modules show up in CI logs.
///
/// # Example
/// ```bash
/// RUST_LOG=terrarun=debug terrarun apply --prune
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
