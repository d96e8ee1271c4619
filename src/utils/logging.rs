use tracing_subscriber::EnvFilter;

use crate::core::config::data::DEFAULT_LOG_LEVEL;

/// Picks the tracing filter: `RUST_LOG` wins, then the configured level,
/// then the default.
pub fn build_env_filter(configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| configured.and_then(|level| EnvFilter::try_new(level).ok()))
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

/// Installs the global subscriber. Logs go to stderr so they never mix with
/// streamed output on stdout.
pub fn init_tracing(configured: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(configured))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
