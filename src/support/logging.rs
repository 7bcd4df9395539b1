//! Logging bootstrap.
//!
//! The stack only emits `tracing` events; the embedding binary decides the
//! subscriber. This helper wires the common case: a fmt subscriber with
//! `RUST_LOG` taking precedence over the configured level.

use tracing_subscriber::EnvFilter;

/// Install the default subscriber. Panics if one is already set.
pub fn init(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

/// Install the default subscriber, ignoring an already-installed one.
/// Useful in tests where several bodies race to initialize.
pub fn try_init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .try_init();
}
