//! Subscriber bootstrap for host applications.
//!
//! The crate itself only emits `tracing` events. Binaries that do not set up
//! their own subscriber can call [`init`] once at startup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter from `RUST_LOG`, or `default_directive` when unset or invalid
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a global fmt subscriber.
///
/// Returns an error instead of panicking when a global subscriber is
/// already installed.
pub fn init(default_directive: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(fmt::layer().with_target(true))
        .try_init()
}
