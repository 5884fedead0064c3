//! Development-time tracing.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`. They are never
//! persisted; the durable record of a run is the journal in `var/`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_filter` (the config's
/// `logging.default_filter`, `warn` unless changed). Output: stderr, compact.
///
/// # Example
/// ```bash
/// RUST_LOG=specflow=debug specflow recover --home ./flow
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
