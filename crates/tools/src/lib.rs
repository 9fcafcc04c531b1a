//! Stoch Tools
//!
//! Logging setup shared by stoch binaries and test harnesses.

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,stoch_runtime=debug,stoch_ir=info,stoch_foundation=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging with a default filter.
///
/// Use `RUST_LOG` environment variable to override the default filter.
/// Default is `debug` for the runtime, `info` for the other stoch crates.
pub fn init_logging() {
    fmt().with_env_filter(filter()).with_target(false).init();
}

/// Like [`init_logging`], but writes through the test capture and tolerates
/// being called from every test in a binary.
pub fn init_test_logging() {
    let _ = fmt()
        .with_env_filter(filter())
        .with_target(false)
        .with_test_writer()
        .try_init();
}
