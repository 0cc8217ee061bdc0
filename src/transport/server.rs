//! # Peer Forwarding Server
//!
//! Inbound side of the HTTP transport. Accepts `POST /event/forward` requests
//! carrying a JSON [`WireEvents`] body and enqueues the batch into the receive
//! buffer of the addressed peer forwarder.
//!
//! ## Responses
//!
//! | Status | Meaning                                                   |
//! |--------|-----------------------------------------------------------|
//! | `200`  | the whole batch was enqueued                              |
//! | `400`  | the body is not a valid forward request                   |
//! | `404`  | unknown path, or no forwarder for (pipeline, plugin id)   |
//! | `405`  | method other than `POST`                                  |
//! | `409`  | identification keys differ from the receiver's            |
//! | `413`  | body larger than `max_request_bytes`                      |
//! | `429`  | receive buffer full, or too many requests waiting         |
//! | `503`  | the server is shutting down                               |
//!
//! Any status other than `200` means nothing was enqueued.
//!
//! ## Concurrency
//!
//! At most `server_thread_count` requests are handled at once. A request
//! arriving while every handler is busy waits for one; once
//! `max_pending_requests` are waiting, new requests are answered `429`
//! immediately. Bodies are read up to `max_request_bytes` before any parsing.

use crate::config::PeerForwarderConfig;
use crate::error::{ServerError, TransportError};
use crate::metrics::record_server_request_rejected;
use crate::transport::receive_buffer::ReceiveBuffers;
use crate::transport::wire::{FORWARD_PATH, WireEvents};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct ServerState {
  buffers: Arc<ReceiveBuffers>,
  pending: Semaphore,
  handlers: Semaphore,
  max_request_bytes: usize,
}

/// HTTP server receiving batches forwarded by peers.
pub struct PeerForwardingServer {
  listener: TcpListener,
  local_addr: SocketAddr,
  state: Arc<ServerState>,
}

impl PeerForwardingServer {
  /// Binds to `config.bind_address:config.port`. Port `0` picks a free port;
  /// see [`PeerForwardingServer::local_addr`].
  pub async fn bind(
    config: &PeerForwarderConfig,
    buffers: Arc<ReceiveBuffers>,
  ) -> Result<Self, ServerError> {
    let ip: IpAddr = config
      .bind_address
      .parse()
      .map_err(|e: std::net::AddrParseError| ServerError::InvalidAddress {
        address: config.bind_address.clone(),
        reason: e.to_string(),
      })?;
    let addr = SocketAddr::new(ip, config.port);

    let listener = TcpListener::bind(addr)
      .await
      .map_err(|source| ServerError::Bind {
        address: addr.to_string(),
        source,
      })?;
    let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
      address: addr.to_string(),
      source,
    })?;

    Ok(Self {
      listener,
      local_addr,
      state: Arc::new(ServerState {
        buffers,
        pending: Semaphore::new(config.max_pending_requests),
        handlers: Semaphore::new(config.server_thread_count),
        max_request_bytes: config.max_request_bytes,
      }),
    })
  }

  /// Address the server is listening on.
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Starts accepting connections in a background task.
  pub fn spawn(self) -> ServerHandle {
    let token = CancellationToken::new();
    let local_addr = self.local_addr;
    let task = tokio::spawn(accept_loop(
      self.listener,
      Arc::clone(&self.state),
      token.clone(),
    ));
    info!(address = %local_addr, "peer forwarding server listening");
    ServerHandle {
      local_addr,
      state: self.state,
      token,
      task,
    }
  }
}

/// Handle of a running [`PeerForwardingServer`].
pub struct ServerHandle {
  local_addr: SocketAddr,
  state: Arc<ServerState>,
  token: CancellationToken,
  task: JoinHandle<()>,
}

impl ServerHandle {
  /// Address the server is listening on.
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Stops accepting connections. Requests already being handled complete;
  /// requests still waiting for a handler are answered `503`.
  pub async fn shutdown(self) {
    self.state.handlers.close();
    self.token.cancel();
    if let Err(e) = self.task.await {
      error!(error = %e, "peer forwarding server task failed");
    }
    info!(address = %self.local_addr, "peer forwarding server stopped");
  }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>, token: CancellationToken) {
  loop {
    tokio::select! {
      _ = token.cancelled() => break,
      accepted = listener.accept() => {
        let (stream, remote_addr) = match accepted {
          Ok(connection) => connection,
          Err(e) => {
            warn!(error = %e, "failed to accept connection");
            continue;
          }
        };
        let state = Arc::clone(&state);
        let token = token.clone();
        tokio::spawn(async move {
          let service = service_fn(move |req| handle(Arc::clone(&state), req));
          let connection =
            http1::Builder::new().serve_connection(TokioIo::new(stream), service);
          tokio::pin!(connection);
          let result = tokio::select! {
            result = connection.as_mut() => result,
            _ = token.cancelled() => {
              connection.as_mut().graceful_shutdown();
              connection.as_mut().await
            }
          };
          if let Err(e) = result {
            debug!(error = %e, remote_addr = %remote_addr, "connection closed with error");
          }
        });
      }
    }
  }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
  let mut response = Response::new(Full::new(body.into()));
  *response.status_mut() = status;
  response
}

fn reject(
  status: StatusCode,
  reason: &'static str,
  body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
  record_server_request_rejected(reason);
  respond(status, body)
}

fn shutting_down() -> Response<Full<Bytes>> {
  reject(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", "shutting down")
}

async fn handle(
  state: Arc<ServerState>,
  req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
  if req.uri().path() != FORWARD_PATH {
    return Ok(reject(StatusCode::NOT_FOUND, "not_found", "not found"));
  }
  if req.method() != Method::POST {
    return Ok(reject(
      StatusCode::METHOD_NOT_ALLOWED,
      "method_not_allowed",
      "method not allowed",
    ));
  }

  let _handler = match state.handlers.try_acquire() {
    Ok(permit) => permit,
    Err(TryAcquireError::Closed) => return Ok(shutting_down()),
    Err(TryAcquireError::NoPermits) => {
      let Ok(_waiting) = state.pending.try_acquire() else {
        warn!("too many pending forward requests");
        return Ok(reject(
          StatusCode::TOO_MANY_REQUESTS,
          "too_many_pending",
          "too many pending requests",
        ));
      };
      match state.handlers.acquire().await {
        Ok(permit) => permit,
        Err(_) => return Ok(shutting_down()),
      }
    }
  };

  let body = match Limited::new(req.into_body(), state.max_request_bytes)
    .collect()
    .await
  {
    Ok(collected) => collected.to_bytes(),
    Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
      warn!(limit = state.max_request_bytes, "forward request body too large");
      return Ok(reject(
        StatusCode::PAYLOAD_TOO_LARGE,
        "too_large",
        "request body too large",
      ));
    }
    Err(e) => {
      warn!(error = %e, "failed to read forward request body");
      return Ok(reject(StatusCode::BAD_REQUEST, "malformed", "failed to read body"));
    }
  };
  let request = match WireEvents::from_json(&body) {
    Ok(request) => request,
    Err(e) => {
      warn!(error = %e, body_size = body.len(), "malformed forward request");
      return Ok(reject(StatusCode::BAD_REQUEST, "malformed", e.to_string()));
    }
  };

  match state.buffers.accept(request) {
    Ok(count) => {
      debug!(count, "forward request accepted");
      Ok(respond(StatusCode::OK, "ok"))
    }
    Err(e) => {
      let (status, reason) = rejection(&e);
      warn!(error = %e, status = status.as_u16(), "forward request rejected");
      Ok(reject(status, reason, e.to_string()))
    }
  }
}

fn rejection(err: &TransportError) -> (StatusCode, &'static str) {
  match err {
    TransportError::UnknownDestination { .. } => (StatusCode::NOT_FOUND, "unknown_destination"),
    TransportError::KeyMismatch { .. } => (StatusCode::CONFLICT, "key_mismatch"),
    TransportError::BufferFull { .. } => (StatusCode::TOO_MANY_REQUESTS, "buffer_full"),
    _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
  }
}
