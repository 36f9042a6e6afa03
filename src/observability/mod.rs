//! # Observability
//!
//! Structured logging via `tracing`. `RUST_LOG` wins over `--log-level`.

use tracing_subscriber::EnvFilter;

/// Build the filter used when `RUST_LOG` is not set
pub fn default_filter(log_level: &str) -> String {
    format!("server_acl_init={log_level}")
}

/// Install the global tracing subscriber
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(log_level).into());

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
    {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}
