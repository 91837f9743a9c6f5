//! Structured logging via tracing
//!
//! Logs go to stderr. Stdout is reserved for `[EVENT]` lines consumed by a
//! host process (see [`crate::events`]).

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the filter directive, e.g.
/// `STEPFLOW_LOG=stepflow::pipeline=debug,info`.
pub const LOG_ENV: &str = "STEPFLOW_LOG";

/// Initialize the global tracing subscriber.
///
/// `STEPFLOW_LOG` wins when set. Otherwise `verbose` selects the level:
/// 0 = info, 1 = debug, 2+ = trace.
pub fn init(verbose: u8) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));

    // try_init: the script subcommand may be re-entered from tests in-process
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();
}

/// Initialize logger for tests (does not panic if called multiple times).
#[cfg(test)]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
