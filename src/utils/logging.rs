use crate::constants::DEFAULT_LOG_FILTER;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber with the crate's default filter.
///
/// `RUST_LOG` takes precedence when set. Calling this more than once is
/// harmless, later calls are ignored.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_LOG_FILTER);
}

pub fn init_tracing_with(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
