//! Tracing setup for the binary.
//!
//! Logs go to stderr so `marketradar run` can keep stdout for mission events.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "marketradar=info";

/// Initialize the global subscriber.
///
/// Reads `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
///
/// # Example
/// ```bash
/// RUST_LOG=marketradar=debug marketradar serve
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
