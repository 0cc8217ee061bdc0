//! In-process delivery between nodes sharing one address space.
//!
//! Several pipeline instances running in one process (a single-binary
//! cluster, or a test) attach their [`ReceiveBuffers`] to an
//! [`InProcessNetwork`] under their peer address; [`InProcessPeerClient`] then
//! delivers forward requests by calling the destination's routing table
//! directly, with the same atomicity and rejection rules as the HTTP server.

use crate::discovery::Peer;
use crate::error::TransportError;
use crate::transport::client::PeerClient;
use crate::transport::receive_buffer::ReceiveBuffers;
use crate::transport::wire::WireEvents;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Directory of reachable in-process nodes.
#[derive(Debug, Default)]
pub struct InProcessNetwork {
  nodes: RwLock<HashMap<Peer, Arc<ReceiveBuffers>>>,
}

impl InProcessNetwork {
  /// Creates an empty network.
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Makes `buffers` reachable as `peer`.
  pub fn attach(&self, peer: Peer, buffers: Arc<ReceiveBuffers>) {
    self
      .nodes
      .write()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .insert(peer, buffers);
  }

  /// Makes `peer` unreachable, as if its process had stopped.
  pub fn detach(&self, peer: &Peer) {
    self
      .nodes
      .write()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .remove(peer);
  }

  fn lookup(&self, peer: &Peer) -> Option<Arc<ReceiveBuffers>> {
    self
      .nodes
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .get(peer)
      .cloned()
  }
}

/// [`PeerClient`] delivering through an [`InProcessNetwork`].
#[derive(Clone, Debug)]
pub struct InProcessPeerClient {
  network: Arc<InProcessNetwork>,
}

impl InProcessPeerClient {
  /// Creates a client on `network`.
  pub fn new(network: Arc<InProcessNetwork>) -> Self {
    Self { network }
  }
}

#[async_trait]
impl PeerClient for InProcessPeerClient {
  async fn forward(&self, peer: &Peer, request: WireEvents) -> Result<(), TransportError> {
    let buffers = self
      .network
      .lookup(peer)
      .ok_or_else(|| TransportError::Connection(format!("{} is not reachable", peer)))?;
    buffers.accept(request).map(|_| ())
  }
}
