//! Tracing subscriber setup for binaries and integration harnesses.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `filters` is an `EnvFilter` expression
/// (e.g. `"info"`, `"mixer_core=debug"`); `RUST_LOG` overrides it when set.
/// Repeated calls are ignored.
pub fn init_logging(filters: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filters));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}
