//! Structured logging setup.

use tracing_subscriber::EnvFilter;

/// Initialise the global `tracing` subscriber.
///
/// Honors `RUST_LOG`; defaults to `ba_harness=info`. Output goes to stderr
/// so command summaries on stdout stay machine-readable. Repeated calls are
/// ignored.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ba_harness=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
