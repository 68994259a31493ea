//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,penumbra=debug,penumbra_renderer=debug,penumbra_rhi=info";

/// Initialize the logging system with tracing.
///
/// Filtering follows `RUST_LOG` when present and falls back to
/// [`DEFAULT_FILTER`]. Output includes the event target and thread id.
///
/// # Example
/// ```
/// penumbra_core::init_logging();
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
