//! Wire format of forward requests.

use crate::event::Event;
use crate::identification::{Fingerprint, IdentificationKeySet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// HTTP path forward requests are posted to.
pub const FORWARD_PATH: &str = "/event/forward";

/// One event travelling to its owner, with the fingerprint it was routed by.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForwardedEvent {
  /// Fingerprint the sender computed.
  pub fingerprint: Fingerprint,
  /// The event.
  pub event: Arc<Event>,
}

impl ForwardedEvent {
  /// Pairs an event with its fingerprint.
  pub fn new(fingerprint: Fingerprint, event: Arc<Event>) -> Self {
    Self { fingerprint, event }
  }
}

/// Body of a forward request.
///
/// The receiver routes by (`destination_pipeline_name`,
/// `destination_plugin_id`) and rejects the batch when
/// `identification_keys` differs from the keys its forwarder is bound to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireEvents {
  /// Pipeline of the destination forwarder.
  pub destination_pipeline_name: String,
  /// Plugin id of the destination forwarder.
  pub destination_plugin_id: String,
  /// Keys the sender routed by.
  pub identification_keys: IdentificationKeySet,
  /// The batch.
  pub events: Vec<ForwardedEvent>,
}

impl WireEvents {
  /// Encodes the request as JSON.
  pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(self)
  }

  /// Decodes a JSON request.
  pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice(bytes)
  }
}
