//! # Error Types
//!
//! Error types for peer forwarding, split along the line the forwarding layer
//! cares about:
//!
//! - **[`ConfigurationError`]**: a structurally invalid pipeline definition.
//!   Detected while decorating processors or loading configuration, fatal, and
//!   never degraded at runtime.
//! - **[`TransportError`]**: a failed attempt to hand a batch to a peer. These
//!   are recoverable per batch: the affected records are processed on the local
//!   instance instead.
//!
//! ## Example
//!
//! ```rust
//! use peerweave::error::{ConfigurationError, TransportError};
//!
//! let err = ConfigurationError::EmptyIdentificationKeys {
//!   plugin_id: "aggregate".to_string(),
//! };
//! assert!(err.to_string().contains("aggregate"));
//!
//! let err = TransportError::Timeout { timeout_ms: 500 };
//! assert!(!err.is_backpressure());
//! ```

use thiserror::Error;

/// Fatal error raised while building a pipeline's peer forwarding layer.
#[derive(Error, Debug)]
pub enum ConfigurationError {
  /// The processor does not declare identification keys and cannot be routed.
  #[error(
    "peer forwarding is only supported for processors which declare identification keys (plugin: {plugin_id})"
  )]
  UnsupportedPlugin {
    /// Plugin id of the offending processor group.
    plugin_id: String,
  },

  /// The processor declared an empty identification key set.
  #[error("peer forwarder plugin {plugin_id} cannot have empty identification keys")]
  EmptyIdentificationKeys {
    /// Plugin id of the offending processor group.
    plugin_id: String,
  },

  /// Parallel instances of one processor type disagree on identification keys.
  #[error(
    "all processors of plugin {plugin_id} in pipeline {pipeline_name} must declare the same identification keys: expected {expected}, found {found}"
  )]
  MismatchedIdentificationKeys {
    /// Pipeline the processors belong to.
    pipeline_name: String,
    /// Plugin id of the processor group.
    plugin_id: String,
    /// Keys declared by the first processor.
    expected: String,
    /// Keys declared by the mismatching processor.
    found: String,
  },

  /// A configuration value is out of range or inconsistent with another one.
  #[error("invalid peer forwarder setting {field}: {reason}")]
  InvalidSetting {
    /// Name of the setting.
    field: String,
    /// Why the value was rejected.
    reason: String,
  },

  /// The configuration file could not be read.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The configuration file is not valid JSON for [`PeerForwarderConfig`](crate::config::PeerForwarderConfig).
  #[error("configuration parse error: {0}")]
  Parse(#[from] serde_json::Error),
}

impl ConfigurationError {
  /// Shorthand for [`ConfigurationError::InvalidSetting`].
  pub fn invalid_setting(field: &str, reason: impl Into<String>) -> Self {
    Self::InvalidSetting {
      field: field.to_string(),
      reason: reason.into(),
    }
  }
}

/// Reason a batch could not be handed to its owning peer.
///
/// Cloneable so a single failure can be reported for every record of the
/// batch it affected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  /// The peer did not answer within the request timeout.
  #[error("forward request timed out after {timeout_ms}ms")]
  Timeout {
    /// Timeout that elapsed, in milliseconds.
    timeout_ms: u64,
  },

  /// The connection to the peer could not be established or broke mid-request.
  #[error("connection error: {0}")]
  Connection(String),

  /// The peer answered but refused the batch.
  #[error("peer rejected batch with status {status}: {reason}")]
  Rejected {
    /// HTTP status returned by the peer.
    status: u16,
    /// Body or reason phrase returned by the peer.
    reason: String,
  },

  /// The batch could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(String),

  /// The receiving queue has no room for the whole batch.
  #[error("receive buffer full: {pending} pending + {incoming} incoming exceeds capacity {capacity}")]
  BufferFull {
    /// Entries already queued.
    pending: usize,
    /// Entries in the rejected batch.
    incoming: usize,
    /// Queue capacity.
    capacity: usize,
  },

  /// No forwarder is registered for the batch's pipeline and plugin id.
  #[error("no peer forwarder registered for pipeline {pipeline_name}, plugin {plugin_id}")]
  UnknownDestination {
    /// Destination pipeline.
    pipeline_name: String,
    /// Destination plugin id.
    plugin_id: String,
  },

  /// The receiving forwarder routes on different identification keys.
  #[error("identification keys mismatch: receiver expects {expected}, batch carries {found}")]
  KeyMismatch {
    /// Keys the receiving forwarder is bound to.
    expected: String,
    /// Keys the sender declared.
    found: String,
  },

  /// The transport is shutting down and refuses new sends.
  #[error("transport is shutting down")]
  ShuttingDown,
}

impl TransportError {
  /// True when the peer refused the batch because it is overloaded.
  pub fn is_backpressure(&self) -> bool {
    match self {
      TransportError::BufferFull { .. } => true,
      TransportError::Rejected { status, .. } => *status == 429,
      _ => false,
    }
  }

  /// Short, low-cardinality label for metrics.
  pub fn kind(&self) -> &'static str {
    match self {
      TransportError::Timeout { .. } => "timeout",
      TransportError::Connection(_) => "connection",
      TransportError::Rejected { .. } => "rejected",
      TransportError::Serialization(_) => "serialization",
      TransportError::BufferFull { .. } => "buffer_full",
      TransportError::UnknownDestination { .. } => "unknown_destination",
      TransportError::KeyMismatch { .. } => "key_mismatch",
      TransportError::ShuttingDown => "shutting_down",
    }
  }
}

/// Error starting the forwarding server.
#[derive(Error, Debug)]
pub enum ServerError {
  /// The configured bind address does not parse.
  #[error("invalid bind address {address}: {reason}")]
  InvalidAddress {
    /// The rejected address.
    address: String,
    /// Parser message.
    reason: String,
  },

  /// The listener could not be bound.
  #[error("failed to bind peer forwarding server to {address}: {source}")]
  Bind {
    /// Address the server tried to bind.
    address: String,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },
}
