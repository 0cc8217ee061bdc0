//! # Forwarding Transport
//!
//! Moves batches of events between fleet members and queues the batches other
//! members sent here.
//!
//! - [`ForwardingTransport`]: the per-forwarder contract (`send` / `poll`).
//! - [`ForwardingChannel`]: the implementation used by remote peer forwarders,
//!   combining a [`PeerClient`], a per-send timeout and a [`ReceiveBuffer`].
//! - [`HttpPeerClient`] / [`PeerForwardingServer`]: HTTP/1.1 transport
//!   (`POST /event/forward`, JSON [`WireEvents`] body).
//! - [`InProcessPeerClient`]: delivers to other nodes in the same process.
//!
//! Batches are atomic: either every event of a `send` is enqueued at the
//! receiver or the send reports [`SendOutcome::Failed`]. The transport never
//! retries; the peer forwarder decides what a failure means.

mod channel;
mod client;
mod in_process;
mod receive_buffer;
mod server;
mod wire;

pub use channel::ForwardingChannel;
pub use client::{HttpPeerClient, PeerClient};
pub use in_process::{InProcessNetwork, InProcessPeerClient};
pub use receive_buffer::{ReceiveBuffer, ReceiveBuffers};
pub use server::{PeerForwardingServer, ServerHandle};
pub use wire::{FORWARD_PATH, ForwardedEvent, WireEvents};

use crate::discovery::Peer;
use crate::error::TransportError;
use crate::event::Event;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of one [`ForwardingTransport::send`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
  /// The peer enqueued the whole batch; it is now responsible for it.
  Delivered,
  /// Nothing was enqueued; the sender still owns every event of the batch.
  Failed(TransportError),
}

impl SendOutcome {
  /// True for [`SendOutcome::Delivered`].
  pub fn is_delivered(&self) -> bool {
    matches!(self, SendOutcome::Delivered)
  }
}

/// Sends batches to owning peers and exposes events peers sent here.
#[async_trait]
pub trait ForwardingTransport: Send + Sync {
  /// Hands `batch` to `peer`. Bounded by a timeout; a timeout is a failure.
  async fn send(&self, peer: &Peer, batch: Vec<ForwardedEvent>) -> SendOutcome;

  /// Drains events received from peers. Never waits for new events.
  fn poll(&self) -> Vec<Arc<Event>>;

  /// Refuses new sends and waits (bounded) for in-flight ones.
  async fn shutdown(&self) {}
}
