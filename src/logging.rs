//! Logging setup.
//!
//! The reconciler reports through `tracing`: collection anomalies and
//! identifier type conflicts at `warn`, merges at `debug`, and driver
//! operations as spans with `info`/`error` events. These helpers install a
//! subscriber that writes to **stderr**, since a provider's stdout belongs to
//! the host protocol.
//!
//! ```ignore
//! use hemmer_reconcile::logging::init_logging;
//!
//! #[tokio::main]
//! async fn main() {
//!     init_logging();
//!     tracing::info!("Provider starting");
//! }
//! ```
//!
//! Filtering follows `RUST_LOG`, for example
//! `RUST_LOG=warn,hemmer_reconcile=debug` to see every merge.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the subscriber, defaulting to `info` when `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`] with a custom default filter, e.g. `"debug"` or
/// `"warn,hemmer_reconcile=debug"`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_filter: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(stderr_layer())
        .init();
}

/// Try to install the subscriber, returning false if one is already set.
///
/// Safe to call from every test.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}
