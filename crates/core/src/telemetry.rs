use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set. Driver-level statement logging is
/// kept quiet because the storage layer emits its own query events.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,tower_http=info";

/// Initialise the global tracing subscriber.
///
/// Respects `RUST_LOG` env var; defaults to [`DEFAULT_FILTER`].
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt().with_env_filter(filter).with_target(true).init();
}
