//! The [`ForwardingTransport`] of one remote peer forwarder.

use crate::discovery::Peer;
use crate::error::TransportError;
use crate::event::Event;
use crate::identification::IdentificationKeySet;
use crate::transport::client::PeerClient;
use crate::transport::receive_buffer::ReceiveBuffer;
use crate::transport::wire::{ForwardedEvent, WireEvents};
use crate::transport::{ForwardingTransport, SendOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Forwarding channel bound to one (pipeline, plugin id).
///
/// Sends go through a shared [`PeerClient`], each bounded by the request
/// timeout. At most `max_in_flight` sends run at once; [`shutdown`] refuses
/// new sends and waits up to the drain timeout for running ones.
///
/// [`shutdown`]: ForwardingTransport::shutdown
pub struct ForwardingChannel {
  pipeline_name: String,
  plugin_id: String,
  identification_keys: IdentificationKeySet,
  client: Arc<dyn PeerClient>,
  receive_buffer: Arc<ReceiveBuffer>,
  request_timeout: Duration,
  drain_timeout: Duration,
  in_flight: Semaphore,
  max_in_flight: u32,
}

impl ForwardingChannel {
  /// Creates a channel.
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    pipeline_name: impl Into<String>,
    plugin_id: impl Into<String>,
    identification_keys: IdentificationKeySet,
    client: Arc<dyn PeerClient>,
    receive_buffer: Arc<ReceiveBuffer>,
    request_timeout: Duration,
    drain_timeout: Duration,
    max_in_flight: usize,
  ) -> Self {
    let max_in_flight = max_in_flight.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
    Self {
      pipeline_name: pipeline_name.into(),
      plugin_id: plugin_id.into(),
      identification_keys,
      client,
      receive_buffer,
      request_timeout,
      drain_timeout,
      in_flight: Semaphore::new(max_in_flight),
      max_in_flight: max_in_flight as u32,
    }
  }

  /// The receive buffer this channel drains.
  pub fn receive_buffer(&self) -> &Arc<ReceiveBuffer> {
    &self.receive_buffer
  }
}

#[async_trait]
impl ForwardingTransport for ForwardingChannel {
  async fn send(&self, peer: &Peer, batch: Vec<ForwardedEvent>) -> SendOutcome {
    let Ok(_permit) = self.in_flight.acquire().await else {
      return SendOutcome::Failed(TransportError::ShuttingDown);
    };

    let count = batch.len();
    let request = WireEvents {
      destination_pipeline_name: self.pipeline_name.clone(),
      destination_plugin_id: self.plugin_id.clone(),
      identification_keys: self.identification_keys.clone(),
      events: batch,
    };

    let result = match tokio::time::timeout(self.request_timeout, self.client.forward(peer, request))
      .await
    {
      Ok(result) => result,
      Err(_) => Err(TransportError::Timeout {
        timeout_ms: self.request_timeout.as_millis() as u64,
      }),
    };

    match result {
      Ok(()) => {
        debug!(peer = %peer, count, plugin_id = %self.plugin_id, "batch delivered");
        SendOutcome::Delivered
      }
      Err(e) => SendOutcome::Failed(e),
    }
  }

  fn poll(&self) -> Vec<Arc<Event>> {
    self.receive_buffer.drain()
  }

  async fn shutdown(&self) {
    match tokio::time::timeout(
      self.drain_timeout,
      self.in_flight.acquire_many(self.max_in_flight),
    )
    .await
    {
      Ok(Ok(permits)) => {
        permits.forget();
        info!(
          pipeline = %self.pipeline_name,
          plugin_id = %self.plugin_id,
          "forwarding channel drained"
        );
      }
      Ok(Err(_)) => {}
      Err(_) => warn!(
        pipeline = %self.pipeline_name,
        plugin_id = %self.plugin_id,
        drain_timeout_ms = self.drain_timeout.as_millis() as u64,
        "in-flight forward requests did not finish before the drain timeout"
      ),
    }
    self.in_flight.close();
  }
}
