//! tracing setup shared by the binaries.

use tracing_subscriber::{EnvFilter, prelude::*};

/// Environment variable holding the `EnvFilter` directive.
pub const LOG_ENV_VAR: &str = "TUBEGRAB_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Installs a stderr formatter filtered by `TUBEGRAB_LOG` (default `info`).
///
/// Calling it twice is harmless; the second call leaves the first subscriber
/// in place.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
