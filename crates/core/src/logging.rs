//! Structured logging setup.
//!
//! Filtering follows `RUST_LOG` and defaults to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a human-readable subscriber.
///
/// # Example
/// ```no_run
/// use repmine_core::logging;
///
/// logging::init();
/// tracing::info!("Node started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Install a JSON subscriber for log aggregation.
///
/// # Example
/// ```no_run
/// use repmine_core::logging;
///
/// logging::init_json();
/// tracing::info!(version = 3, "Committed new version");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Pick the output format from configuration.
pub fn init_with(json: bool) {
    if json {
        init_json()
    } else {
        init()
    }
}
