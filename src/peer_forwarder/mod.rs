//! # Peer Forwarding
//!
//! Routes each event to the fleet member that owns its identification-key
//! fingerprint before it reaches a stateful processor.
//!
//! ## Components
//!
//! - **[`PeerForwarder`]**: one per (pipeline, plugin id). Splits a batch into
//!   records this instance owns and records it hands to their owners, and
//!   exposes the records peers handed here.
//! - **[`PeerForwarderProvider`]**: registry creating one forwarder per
//!   processor type, plus the forwarding server's lifecycle.
//! - **[`PeerForwardingProcessorDecorator`]**: wraps each stateful processor
//!   instance, merging local, fallback and received records before the wrapped
//!   processor runs.
//!
//! ## Delivery
//!
//! A record is either delivered to its owner or processed here. A batch the
//! owner did not accept falls back to local processing, so a failure degrades
//! locality and never loses data.
//!
//! ## Example
//!
//! ```rust
//! use peerweave::event::{Event, Record};
//! use peerweave::peer_forwarder::{LocalPeerForwarder, PeerForwarder};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let forwarder = LocalPeerForwarder::new("pipeline", "aggregate");
//! let record = Record::new(Event::builder("log").with("user", json!("a")).build());
//! let local = forwarder.forward_records(vec![record]).await;
//! assert_eq!(local.len(), 1);
//! assert!(forwarder.receive_records().is_empty());
//! # });
//! ```

mod decorator;
mod provider;

pub use decorator::{PeerForwardingProcessorDecorator, decorate_processors};
pub use provider::PeerForwarderProvider;

use crate::discovery::Peer;
use crate::event::Record;
use crate::hash_ring::OwnershipResolver;
use crate::identification::{Fingerprint, IdentificationKeySet};
use crate::metrics;
use crate::transport::{ForwardedEvent, ForwardingTransport, SendOutcome};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes records to their owning fleet member.
#[async_trait]
pub trait PeerForwarder: Send + Sync {
  /// Hands records owned by other members to them and returns the records to
  /// process on this instance, including those whose delivery failed.
  async fn forward_records(&self, records: Vec<Record>) -> Vec<Record>;

  /// Records other members handed to this instance since the last call.
  /// Never waits.
  fn receive_records(&self) -> Vec<Record>;

  /// Refuses new deliveries and waits, bounded, for in-flight ones.
  async fn shutdown(&self) {}
}

/// [`PeerForwarder`] for a single-instance deployment: every record is local.
#[derive(Debug, Clone)]
pub struct LocalPeerForwarder {
  pipeline_name: String,
  plugin_id: String,
}

impl LocalPeerForwarder {
  /// Creates a local forwarder.
  pub fn new(pipeline_name: impl Into<String>, plugin_id: impl Into<String>) -> Self {
    Self {
      pipeline_name: pipeline_name.into(),
      plugin_id: plugin_id.into(),
    }
  }
}

#[async_trait]
impl PeerForwarder for LocalPeerForwarder {
  async fn forward_records(&self, records: Vec<Record>) -> Vec<Record> {
    metrics::record_records_to_be_processed_locally(
      &self.pipeline_name,
      &self.plugin_id,
      records.len() as u64,
    );
    records
  }

  fn receive_records(&self) -> Vec<Record> {
    Vec::new()
  }
}

type Chunk = (Peer, Vec<(Fingerprint, Record)>);

/// [`PeerForwarder`] for a fleet: resolves owners on a shared
/// [`OwnershipResolver`] and delivers through a [`ForwardingTransport`].
pub struct RemotePeerForwarder {
  pipeline_name: String,
  plugin_id: String,
  identification_keys: IdentificationKeySet,
  resolver: Arc<dyn OwnershipResolver>,
  transport: Arc<dyn ForwardingTransport>,
  batch_size: usize,
  concurrency: usize,
}

impl RemotePeerForwarder {
  /// Creates a forwarder. `batch_size` caps events per send; `concurrency`
  /// caps sends running at once.
  pub fn new(
    pipeline_name: impl Into<String>,
    plugin_id: impl Into<String>,
    identification_keys: IdentificationKeySet,
    resolver: Arc<dyn OwnershipResolver>,
    transport: Arc<dyn ForwardingTransport>,
    batch_size: usize,
    concurrency: usize,
  ) -> Self {
    Self {
      pipeline_name: pipeline_name.into(),
      plugin_id: plugin_id.into(),
      identification_keys,
      resolver,
      transport,
      batch_size: batch_size.max(1),
      concurrency: concurrency.max(1),
    }
  }

  /// Keys this forwarder routes by.
  pub fn identification_keys(&self) -> &IdentificationKeySet {
    &self.identification_keys
  }

  fn chunk(&self, by_peer: HashMap<Peer, Vec<(Fingerprint, Record)>>) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for (peer, mut records) in by_peer {
      while records.len() > self.batch_size {
        let rest = records.split_off(self.batch_size);
        chunks.push((peer.clone(), records));
        records = rest;
      }
      chunks.push((peer, records));
    }
    chunks
  }

  async fn send_chunk(
    &self,
    peer: Peer,
    chunk: Vec<(Fingerprint, Record)>,
  ) -> (Peer, Vec<(Fingerprint, Record)>, SendOutcome) {
    let batch = chunk
      .iter()
      .map(|(fingerprint, record)| {
        ForwardedEvent::new(*fingerprint, Arc::clone(record.shared_data()))
      })
      .collect();
    let outcome = self.transport.send(&peer, batch).await;
    (peer, chunk, outcome)
  }
}

#[async_trait]
impl PeerForwarder for RemotePeerForwarder {
  async fn forward_records(&self, records: Vec<Record>) -> Vec<Record> {
    let mut local = Vec::new();
    let mut by_peer: HashMap<Peer, Vec<(Fingerprint, Record)>> = HashMap::new();

    for record in records {
      let fingerprint = self.identification_keys.fingerprint(record.data());
      match self.resolver.owner(fingerprint) {
        Some(owner) if !self.resolver.is_self(&owner) => {
          by_peer.entry(owner).or_default().push((fingerprint, record));
        }
        _ => local.push(record),
      }
    }

    let remote_count: usize = by_peer.values().map(Vec::len).sum();
    metrics::record_records_to_be_processed_locally(
      &self.pipeline_name,
      &self.plugin_id,
      local.len() as u64,
    );
    metrics::record_records_to_be_forwarded(
      &self.pipeline_name,
      &self.plugin_id,
      remote_count as u64,
    );
    if remote_count == 0 {
      return local;
    }

    let sends: Vec<_> = self
      .chunk(by_peer)
      .into_iter()
      .map(|(peer, chunk)| self.send_chunk(peer, chunk))
      .collect();
    let results: Vec<_> = stream::iter(sends)
      .buffer_unordered(self.concurrency)
      .collect()
      .await;

    for (peer, chunk, outcome) in results {
      match outcome {
        SendOutcome::Delivered => {
          metrics::record_request_successful(&self.pipeline_name, &self.plugin_id);
          metrics::record_records_successfully_forwarded(
            &self.pipeline_name,
            &self.plugin_id,
            chunk.len() as u64,
          );
        }
        SendOutcome::Failed(e) => {
          warn!(
            pipeline = %self.pipeline_name,
            plugin_id = %self.plugin_id,
            peer = %peer,
            count = chunk.len(),
            error = %e,
            "forwarding failed, processing records locally"
          );
          metrics::record_request_failed(&self.pipeline_name, &self.plugin_id, e.kind());
          metrics::record_records_failed_forwarding(
            &self.pipeline_name,
            &self.plugin_id,
            chunk.len() as u64,
          );
          local.extend(chunk.into_iter().map(|(_, record)| record));
        }
      }
    }
    local
  }

  fn receive_records(&self) -> Vec<Record> {
    let received: Vec<Record> = self
      .transport
      .poll()
      .into_iter()
      .map(Record::from_shared)
      .collect();
    if !received.is_empty() {
      debug!(
        pipeline = %self.pipeline_name,
        plugin_id = %self.plugin_id,
        count = received.len(),
        "received records from peers"
      );
      metrics::record_records_received(
        &self.pipeline_name,
        &self.plugin_id,
        received.len() as u64,
      );
    }
    received
  }

  async fn shutdown(&self) {
    self.transport.shutdown().await;
  }
}

#[cfg(test)]
mod forwarder_test;
#[cfg(test)]
mod provider_test;
