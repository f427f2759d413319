//! Development-time tracing for debugging the repair engine.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of autofix product output.
//!
//! - **Run log (`io/run_log`)**: Product artifacts in `.autofix/runs/`
//!   (prompts, raw responses, build output). Always written, unaffected by
//!   `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `autofix=debug` with `verbose`.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=autofix=debug autofix fix
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "warn,autofix=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
