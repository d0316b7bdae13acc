//! Logging setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable checked before `RUST_LOG`
pub const LOG_ENV: &str = "LLMROUTE_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Resolve the filter directive: explicit override, `LLMROUTE_LOG`, `RUST_LOG`, then `info`
pub fn directive(override_directive: Option<&str>) -> String {
    override_directive
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV).ok())
        .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok())
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
}

/// Install the global subscriber; later calls are ignored
pub fn init(override_directive: Option<&str>) {
    let directive = directive(override_directive);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}
