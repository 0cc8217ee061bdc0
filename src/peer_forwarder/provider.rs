//! # Peer Forwarder Registry
//!
//! [`PeerForwarderProvider`] hands out one [`PeerForwarder`] per
//! (pipeline name, plugin id), so every parallel instance of a stateful
//! processor shares one resolver view, one send path and one inbound queue.
//!
//! The provider is owned by the pipeline builder and passed to
//! [`decorate_processors`](super::decorate_processors). It also owns the
//! lifecycle of the forwarding server: [`start`](PeerForwarderProvider::start)
//! binds it once all forwarders are registered, and
//! [`shutdown`](PeerForwarderProvider::shutdown) drains every forwarder before
//! stopping it.

use crate::config::{DiscoveryMode, PeerForwarderConfig};
use crate::discovery::{Peer, PeerListProvider, StaticPeerListProvider};
use crate::error::{ConfigurationError, ServerError};
use crate::hash_ring::{HashRing, OwnershipResolver};
use crate::identification::IdentificationKeySet;
use crate::peer_forwarder::{LocalPeerForwarder, PeerForwarder, RemotePeerForwarder};
use crate::processor::RoutableProcessor;
use crate::transport::{
  ForwardingChannel, HttpPeerClient, PeerClient, PeerForwardingServer, ReceiveBuffers,
  ServerHandle,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

type ForwarderKey = (String, String);

/// Fleet-side state; absent in local-node mode.
struct Fleet {
  resolver: Arc<HashRing>,
  client: Arc<dyn PeerClient>,
}

/// Registry of peer forwarders for one pipeline process.
pub struct PeerForwarderProvider {
  config: PeerForwarderConfig,
  fleet: Option<Fleet>,
  receive_buffers: Arc<ReceiveBuffers>,
  forwarders: Mutex<HashMap<ForwarderKey, Arc<dyn PeerForwarder>>>,
  server: tokio::sync::Mutex<Option<ServerHandle>>,
}

impl PeerForwarderProvider {
  /// Provider for a single instance: every forwarder is local and no server
  /// is started.
  pub fn local() -> Self {
    Self {
      config: PeerForwarderConfig::default(),
      fleet: None,
      receive_buffers: Arc::new(ReceiveBuffers::new()),
      forwarders: Mutex::new(HashMap::new()),
      server: tokio::sync::Mutex::new(None),
    }
  }

  /// Provider following `peers`, delivering through `client`.
  ///
  /// In [`DiscoveryMode::LocalNode`] the peer list and client are ignored.
  pub fn new(
    config: PeerForwarderConfig,
    peers: &dyn PeerListProvider,
    client: Arc<dyn PeerClient>,
  ) -> Result<Self, ConfigurationError> {
    config.validate()?;
    let fleet = match (&config.discovery_mode, &config.local_address) {
      (DiscoveryMode::LocalNode, _) => None,
      (_, Some(local_address)) => Some(Fleet {
        resolver: Arc::new(HashRing::new(Peer::new(local_address.as_str()), peers)),
        client,
      }),
      (_, None) => {
        return Err(ConfigurationError::invalid_setting(
          "local_address",
          "required unless discovery_mode is local_node",
        ));
      }
    };
    Ok(Self {
      config,
      fleet,
      receive_buffers: Arc::new(ReceiveBuffers::new()),
      forwarders: Mutex::new(HashMap::new()),
      server: tokio::sync::Mutex::new(None),
    })
  }

  /// Provider built from configuration alone, using the HTTP transport.
  ///
  /// Dynamic discovery needs a peer list source and must go through
  /// [`PeerForwarderProvider::new`].
  pub fn from_config(config: PeerForwarderConfig) -> Result<Self, ConfigurationError> {
    match config.discovery_mode {
      DiscoveryMode::LocalNode => {
        config.validate()?;
        Ok(Self {
          config,
          ..Self::local()
        })
      }
      DiscoveryMode::Static => {
        let peers = StaticPeerListProvider::new(config.static_endpoints.iter().cloned());
        let client = Arc::new(HttpPeerClient::new(
          config.port,
          config.request_timeout(),
          config.client_thread_count,
        ));
        Self::new(config, &peers, client)
      }
      DiscoveryMode::Dynamic => Err(ConfigurationError::invalid_setting(
        "discovery_mode",
        "dynamic discovery requires a peer list provider",
      )),
    }
  }

  /// The configuration in effect.
  pub fn config(&self) -> &PeerForwarderConfig {
    &self.config
  }

  /// True when records may leave this instance.
  pub fn is_peer_forwarding_required(&self) -> bool {
    self.fleet.is_some()
  }

  /// Routing table of this process's inbound queues. Attach it to an
  /// [`InProcessNetwork`](crate::transport::InProcessNetwork) to receive
  /// in-process deliveries.
  pub fn receive_buffers(&self) -> &Arc<ReceiveBuffers> {
    &self.receive_buffers
  }

  /// Number of registered forwarders.
  pub fn forwarder_count(&self) -> usize {
    self.lock_forwarders().len()
  }

  /// Returns the forwarder for (pipeline, plugin id), creating it on first use.
  ///
  /// Later calls for the same pair return the same instance without looking
  /// at their arguments again. `worker_thread_count` bounds the forwarder's
  /// concurrent sends.
  pub fn register(
    &self,
    pipeline_name: &str,
    representative: &dyn RoutableProcessor,
    plugin_id: &str,
    identification_keys: &IdentificationKeySet,
    worker_thread_count: usize,
  ) -> Result<Arc<dyn PeerForwarder>, ConfigurationError> {
    let mut forwarders = self.lock_forwarders();
    let key = (pipeline_name.to_string(), plugin_id.to_string());
    if let Some(existing) = forwarders.get(&key) {
      return Ok(Arc::clone(existing));
    }

    if identification_keys.is_empty() {
      return Err(ConfigurationError::EmptyIdentificationKeys {
        plugin_id: plugin_id.to_string(),
      });
    }

    let forwarder: Arc<dyn PeerForwarder> = match &self.fleet {
      None => Arc::new(LocalPeerForwarder::new(pipeline_name, plugin_id)),
      Some(fleet) => {
        let concurrency = worker_thread_count
          .min(self.config.client_thread_count)
          .max(1);
        let receive_buffer = self.receive_buffers.register(
          pipeline_name,
          plugin_id,
          identification_keys.clone(),
          self.config.buffer_size,
        );
        let channel = ForwardingChannel::new(
          pipeline_name,
          plugin_id,
          identification_keys.clone(),
          Arc::clone(&fleet.client),
          receive_buffer,
          self.config.request_timeout(),
          self.config.drain_timeout(),
          concurrency,
        );
        let resolver: Arc<dyn OwnershipResolver> = fleet.resolver.clone();
        Arc::new(RemotePeerForwarder::new(
          pipeline_name,
          plugin_id,
          identification_keys.clone(),
          resolver,
          Arc::new(channel),
          self.config.batch_size,
          concurrency,
        ))
      }
    };

    info!(
      pipeline = %pipeline_name,
      plugin_id = %plugin_id,
      processor = %representative.name(),
      identification_keys = %identification_keys,
      remote = self.fleet.is_some(),
      "peer forwarder created"
    );
    forwarders.insert(key, Arc::clone(&forwarder));
    Ok(forwarder)
  }

  /// Starts the forwarding server when forwarding is required. Returns the
  /// address it listens on. Concurrent calls share one server.
  pub async fn start(&self) -> Result<Option<SocketAddr>, ServerError> {
    if !self.is_peer_forwarding_required() {
      return Ok(None);
    }
    let mut server = self.server.lock().await;
    if let Some(handle) = server.as_ref() {
      return Ok(Some(handle.local_addr()));
    }
    let handle = PeerForwardingServer::bind(&self.config, Arc::clone(&self.receive_buffers))
      .await?
      .spawn();
    let addr = handle.local_addr();
    *server = Some(handle);
    Ok(Some(addr))
  }

  /// Drains every forwarder's in-flight sends, then stops the server.
  pub async fn shutdown(&self) {
    let forwarders: Vec<_> = self.lock_forwarders().values().cloned().collect();
    for forwarder in forwarders {
      forwarder.shutdown().await;
    }
    let server = self.server.lock().await.take();
    if let Some(handle) = server {
      handle.shutdown().await;
    }
  }

  fn lock_forwarders(&self) -> MutexGuard<'_, HashMap<ForwarderKey, Arc<dyn PeerForwarder>>> {
    self
      .forwarders
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
