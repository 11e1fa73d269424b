//! Tracing initialisation for the server binary.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber with the given filter.
///
/// `filter` accepts the levels from configuration (`off`, `info`, `debug`)
/// or any full `EnvFilter` expression; an unparseable filter falls back to
/// `info`. Calling this twice is a no-op (the second install fails
/// silently), which keeps tests safe.
pub fn init(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
