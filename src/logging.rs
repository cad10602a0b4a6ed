//! Tracing subscriber setup for hosts embedding the orchestration core.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a compact fmt subscriber filtered to this crate.
///
/// `RUST_LOG` wins when set. Returns `false` if a global subscriber was
/// already installed, which keeps repeated calls from tests harmless.
pub fn init_logging(verbose: bool) -> bool {
    let default_directive = if verbose {
        "pilot_orchestrator=debug"
    } else {
        "pilot_orchestrator=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .try_init()
        .is_ok()
}
