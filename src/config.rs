//! # Peer Forwarder Configuration
//!
//! Settings for the forwarding server, client and per-forwarder queues. Values
//! can be loaded from a JSON document, where every field is optional and falls
//! back to its default, and adjusted with the `with_*` builder methods.
//!
//! ```rust
//! use peerweave::config::{DiscoveryMode, PeerForwarderConfig};
//!
//! let config = PeerForwarderConfig::from_json_str(
//!   r#"{ "discovery_mode": "static", "local_address": "10.0.0.1",
//!        "static_endpoints": ["10.0.0.1", "10.0.0.2"], "batch_size": 100 }"#,
//! )
//! .unwrap();
//! assert_eq!(config.discovery_mode, DiscoveryMode::Static);
//! assert_eq!(config.batch_size, 100);
//! assert_eq!(config.port, 4994);
//! ```

use crate::error::ConfigurationError;
use crate::identification::{ExcludeSet, IdentificationKeySet};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default port of the forwarding server.
pub const DEFAULT_PORT: u16 = 4994;

/// How the fleet's peer set is obtained.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
  /// Single instance: every record is processed locally and no server runs.
  #[default]
  LocalNode,
  /// Fixed list of endpoints from [`PeerForwarderConfig::static_endpoints`].
  Static,
  /// Peer set pushed by an external discovery collaborator.
  Dynamic,
}

/// Configuration of the peer forwarding layer.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PeerForwarderConfig {
  /// Host the forwarding server binds to.
  pub bind_address: String,
  /// Port of the forwarding server, and the port assumed for peers listed without one.
  pub port: u16,
  /// This instance's address as it appears in the peer set.
  pub local_address: Option<String>,
  /// Peer discovery mode.
  pub discovery_mode: DiscoveryMode,
  /// Peer addresses used in [`DiscoveryMode::Static`].
  pub static_endpoints: Vec<String>,
  /// Timeout of a single forward request, in milliseconds.
  pub request_timeout_ms: u64,
  /// Maximum inbound requests handled concurrently.
  pub server_thread_count: usize,
  /// Maximum inbound requests waiting for a handler before the server answers
  /// `429`. With `0`, requests are only accepted while a handler is free.
  pub max_pending_requests: usize,
  /// Largest forward request body the server reads; larger bodies get `413`.
  pub max_request_bytes: usize,
  /// Upper bound on concurrent outbound forward requests per forwarder.
  pub client_thread_count: usize,
  /// Maximum events carried by one forward request.
  pub batch_size: usize,
  /// Capacity of each forwarder's inbound queue.
  pub buffer_size: usize,
  /// Maximum wait for in-flight forward requests at shutdown, in milliseconds.
  pub drain_timeout_ms: u64,
  /// Identification key sets for which forwarding is disabled.
  pub excluded_identification_keys: Vec<Vec<String>>,
}

impl Default for PeerForwarderConfig {
  fn default() -> Self {
    Self {
      bind_address: "0.0.0.0".to_string(),
      port: DEFAULT_PORT,
      local_address: None,
      discovery_mode: DiscoveryMode::LocalNode,
      static_endpoints: Vec::new(),
      request_timeout_ms: 10_000,
      server_thread_count: 200,
      max_pending_requests: 1024,
      max_request_bytes: 10 * 1024 * 1024,
      client_thread_count: 200,
      batch_size: 48,
      buffer_size: 512,
      drain_timeout_ms: 10_000,
      excluded_identification_keys: Vec::new(),
    }
  }
}

impl PeerForwarderConfig {
  /// Parses and validates a JSON document.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
    let config: Self = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads, parses and validates a JSON file.
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
    let json = std::fs::read_to_string(path)?;
    Self::from_json_str(&json)
  }

  /// Checks value ranges and cross-field consistency.
  pub fn validate(&self) -> Result<(), ConfigurationError> {
    if self.batch_size == 0 {
      return Err(ConfigurationError::invalid_setting(
        "batch_size",
        "must be greater than 0",
      ));
    }
    if self.buffer_size < self.batch_size {
      return Err(ConfigurationError::invalid_setting(
        "buffer_size",
        format!(
          "{} is smaller than batch_size {}; a full batch could never be accepted",
          self.buffer_size, self.batch_size
        ),
      ));
    }
    if self.server_thread_count == 0 {
      return Err(ConfigurationError::invalid_setting(
        "server_thread_count",
        "must be greater than 0",
      ));
    }
    if self.max_request_bytes == 0 {
      return Err(ConfigurationError::invalid_setting(
        "max_request_bytes",
        "must be greater than 0",
      ));
    }
    if self.client_thread_count == 0 {
      return Err(ConfigurationError::invalid_setting(
        "client_thread_count",
        "must be greater than 0",
      ));
    }
    if self.request_timeout_ms == 0 {
      return Err(ConfigurationError::invalid_setting(
        "request_timeout_ms",
        "must be greater than 0",
      ));
    }
    if self.discovery_mode != DiscoveryMode::LocalNode && self.local_address.is_none() {
      return Err(ConfigurationError::invalid_setting(
        "local_address",
        "required unless discovery_mode is local_node",
      ));
    }
    if self.discovery_mode == DiscoveryMode::Static && self.static_endpoints.is_empty() {
      return Err(ConfigurationError::invalid_setting(
        "static_endpoints",
        "at least one endpoint is required for static discovery",
      ));
    }
    if self
      .excluded_identification_keys
      .iter()
      .any(|keys| keys.is_empty())
    {
      return Err(ConfigurationError::invalid_setting(
        "excluded_identification_keys",
        "entries cannot be empty",
      ));
    }
    Ok(())
  }

  /// True when records may leave this instance.
  pub fn is_peer_forwarding_required(&self) -> bool {
    self.discovery_mode != DiscoveryMode::LocalNode
  }

  /// Per-request timeout.
  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }

  /// Shutdown drain timeout.
  pub fn drain_timeout(&self) -> Duration {
    Duration::from_millis(self.drain_timeout_ms)
  }

  /// The configured exclusions as an [`ExcludeSet`].
  pub fn exclude_set(&self) -> ExcludeSet {
    self
      .excluded_identification_keys
      .iter()
      .map(|keys| IdentificationKeySet::new(keys.iter().cloned()))
      .collect()
  }

  /// Sets the discovery mode.
  #[must_use]
  pub fn with_discovery_mode(mut self, mode: DiscoveryMode) -> Self {
    self.discovery_mode = mode;
    self
  }

  /// Sets this instance's address in the peer set.
  #[must_use]
  pub fn with_local_address(mut self, address: impl Into<String>) -> Self {
    self.local_address = Some(address.into());
    self
  }

  /// Sets the static endpoints.
  #[must_use]
  pub fn with_static_endpoints<I, S>(mut self, endpoints: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.static_endpoints = endpoints.into_iter().map(Into::into).collect();
    self
  }

  /// Sets the server bind host and port.
  #[must_use]
  pub fn with_bind(mut self, address: impl Into<String>, port: u16) -> Self {
    self.bind_address = address.into();
    self.port = port;
    self
  }

  /// Sets the inbound handler count and how many requests may wait for one.
  #[must_use]
  pub fn with_server_limits(
    mut self,
    server_thread_count: usize,
    max_pending_requests: usize,
  ) -> Self {
    self.server_thread_count = server_thread_count;
    self.max_pending_requests = max_pending_requests;
    self
  }

  /// Sets the largest accepted forward request body, in bytes.
  #[must_use]
  pub fn with_max_request_bytes(mut self, max_request_bytes: usize) -> Self {
    self.max_request_bytes = max_request_bytes;
    self
  }

  /// Sets the request timeout.
  #[must_use]
  pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
    self.request_timeout_ms = timeout.as_millis() as u64;
    self
  }

  /// Sets the maximum events per forward request.
  #[must_use]
  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }

  /// Sets the inbound queue capacity.
  #[must_use]
  pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
    self.buffer_size = buffer_size;
    self
  }

  /// Sets the shutdown drain timeout.
  #[must_use]
  pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
    self.drain_timeout_ms = timeout.as_millis() as u64;
    self
  }

  /// Adds an excluded identification key set.
  #[must_use]
  pub fn with_excluded_identification_keys<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .excluded_identification_keys
      .push(keys.into_iter().map(Into::into).collect());
    self
  }
}
