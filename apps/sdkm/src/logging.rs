//! Diagnostic logging setup.
//!
//! User-facing progress is printed to stdout by the commands. Diagnostics go
//! through `tracing` to stderr, filtered by `SDKM_LOG` (same syntax as
//! `RUST_LOG`).

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "SDKM_LOG";

/// Initializes the global subscriber.
///
/// `SDKM_LOG` wins when set; otherwise `verbose` selects debug output for
/// sdkm and the default shows warnings only.
pub fn init(verbose: bool) {
    let default = if verbose { "sdkm=debug" } else { "sdkm=warn" };
    let filter = std::env::var(LOG_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
