//! Outbound side of the transport.

use crate::discovery::Peer;
use crate::error::TransportError;
use crate::transport::wire::{FORWARD_PATH, WireEvents};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;

/// Delivers one forward request to one peer.
///
/// Implementations report whether the peer enqueued the whole batch; timeouts
/// are applied by the caller.
#[async_trait]
pub trait PeerClient: Send + Sync {
  /// Sends `request` to `peer`.
  async fn forward(&self, peer: &Peer, request: WireEvents) -> Result<(), TransportError>;
}

/// [`PeerClient`] posting JSON batches over pooled HTTP/1.1 connections.
#[derive(Clone)]
pub struct HttpPeerClient {
  client: Client<HttpConnector, Full<Bytes>>,
  default_port: u16,
}

impl HttpPeerClient {
  /// Creates a client. `default_port` is used for peers listed without a port.
  pub fn new(default_port: u16, connect_timeout: Duration, max_idle_per_peer: usize) -> Self {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);
    let client = Client::builder(TokioExecutor::new())
      .pool_timer(TokioTimer::new())
      .pool_idle_timeout(Duration::from_secs(90))
      .pool_max_idle_per_host(max_idle_per_peer)
      .build(connector);
    Self {
      client,
      default_port,
    }
  }

  fn uri(&self, peer: &Peer) -> String {
    format!("http://{}{}", peer.authority(self.default_port), FORWARD_PATH)
  }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
  async fn forward(&self, peer: &Peer, request: WireEvents) -> Result<(), TransportError> {
    let body = request
      .to_json()
      .map_err(|e| TransportError::Serialization(e.to_string()))?;

    let http_request = Request::builder()
      .method(Method::POST)
      .uri(self.uri(peer))
      .header(CONTENT_TYPE, "application/json")
      .body(Full::new(Bytes::from(body)))
      .map_err(|e| TransportError::Connection(format!("invalid request for {}: {}", peer, e)))?;

    let response = self
      .client
      .request(http_request)
      .await
      .map_err(|e| TransportError::Connection(format!("{}: {}", peer, e)))?;

    let status = response.status();
    if status == StatusCode::OK {
      return Ok(());
    }

    let reason = match response.into_body().collect().await {
      Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
      Err(_) => status
        .canonical_reason()
        .unwrap_or("unknown")
        .to_string(),
    };
    Err(TransportError::Rejected {
      status: status.as_u16(),
      reason,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_uri_uses_default_port_when_missing() {
    let client = HttpPeerClient::new(4994, Duration::from_secs(1), 4);
    assert_eq!(
      client.uri(&Peer::new("10.0.0.2")),
      "http://10.0.0.2:4994/event/forward"
    );
    assert_eq!(
      client.uri(&Peer::new("10.0.0.2:7000")),
      "http://10.0.0.2:7000/event/forward"
    );
  }
}
