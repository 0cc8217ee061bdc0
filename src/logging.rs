//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events. Binaries and tests embedding
//! the forwarding layer call [`init_tracing`] once to print them.

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber.
///
/// `RUST_LOG` takes precedence; `default_directive` (e.g. `"info"` or
/// `"peerweave=debug"`) applies when it is unset or invalid. Returns an error
/// if a global subscriber is already installed.
pub fn init_tracing(
  default_directive: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(true)
    .try_init()
}
