//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing_subscriber::fmt` subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from the given
/// directive (typically [`Config::log_level`](crate::config::Config)).
/// Calling this twice is harmless; the second call is a no-op.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
