//! Tests for [`PeerForwarderProvider`].

use super::*;
use crate::config::{DiscoveryMode, PeerForwarderConfig};
use crate::discovery::StaticPeerListProvider;
use crate::error::ConfigurationError;
use crate::processor::{Processor, RoutableProcessor};
use crate::transport::{InProcessNetwork, InProcessPeerClient};

struct Aggregate;

#[async_trait]
impl Processor for Aggregate {
  fn name(&self) -> &str {
    "aggregate"
  }

  async fn execute(&mut self, records: Vec<Record>) -> Vec<Record> {
    records
  }
}

impl RoutableProcessor for Aggregate {
  fn identification_keys(&self) -> IdentificationKeySet {
    IdentificationKeySet::new(["user"])
  }
}

fn same(a: &Arc<dyn PeerForwarder>, b: &Arc<dyn PeerForwarder>) -> bool {
  std::ptr::eq(
    Arc::as_ptr(a) as *const (),
    Arc::as_ptr(b) as *const (),
  )
}

fn static_config(local: &str) -> PeerForwarderConfig {
  PeerForwarderConfig::default()
    .with_discovery_mode(DiscoveryMode::Static)
    .with_local_address(local)
    .with_static_endpoints(["node-a", "node-b"])
    .with_bind("127.0.0.1", 0)
}

fn fleet_provider(local: &str) -> PeerForwarderProvider {
  let config = static_config(local);
  let peers = StaticPeerListProvider::new(config.static_endpoints.clone());
  let client = Arc::new(InProcessPeerClient::new(InProcessNetwork::new()));
  PeerForwarderProvider::new(config, &peers, client).unwrap()
}

#[test]
fn test_register_is_singleton_per_pipeline_and_plugin() {
  let provider = PeerForwarderProvider::local();
  let keys = IdentificationKeySet::new(["user"]);

  let first = provider.register("p", &Aggregate, "agg", &keys, 4).unwrap();
  let second = provider
    .register("p", &Aggregate, "agg", &IdentificationKeySet::new(["other"]), 8)
    .unwrap();
  let other_plugin = provider.register("p", &Aggregate, "dedup", &keys, 4).unwrap();
  let other_pipeline = provider.register("q", &Aggregate, "agg", &keys, 4).unwrap();

  assert!(same(&first, &second));
  assert!(!same(&first, &other_plugin));
  assert!(!same(&first, &other_pipeline));
  assert_eq!(provider.forwarder_count(), 3);
}

#[test]
fn test_register_rejects_empty_keys() {
  let provider = PeerForwarderProvider::local();
  let empty: [&str; 0] = [];
  let err = provider
    .register("p", &Aggregate, "agg", &IdentificationKeySet::new(empty), 4)
    .err()
    .unwrap();
  assert!(matches!(err, ConfigurationError::EmptyIdentificationKeys { .. }));
  assert_eq!(provider.forwarder_count(), 0);
}

#[tokio::test]
async fn test_local_provider_starts_no_server() {
  let provider = PeerForwarderProvider::local();
  assert!(!provider.is_peer_forwarding_required());
  assert_eq!(provider.start().await.unwrap(), None);
  provider.shutdown().await;
}

#[test]
fn test_fleet_register_creates_receive_buffer() {
  let provider = fleet_provider("node-a");
  assert!(provider.is_peer_forwarding_required());

  provider
    .register("p", &Aggregate, "agg", &IdentificationKeySet::new(["user"]), 4)
    .unwrap();

  let buffer = provider.receive_buffers().get("p", "agg").unwrap();
  assert_eq!(buffer.capacity(), provider.config().buffer_size);
  assert_eq!(buffer.identification_keys(), &IdentificationKeySet::new(["user"]));
}

#[test]
fn test_invalid_config_is_rejected() {
  let config = PeerForwarderConfig::default()
    .with_discovery_mode(DiscoveryMode::Static)
    .with_static_endpoints(["node-a"]);
  let peers = StaticPeerListProvider::new(["node-a"]);
  let client = Arc::new(InProcessPeerClient::new(InProcessNetwork::new()));
  let err = PeerForwarderProvider::new(config, &peers, client).err().unwrap();
  assert!(matches!(err, ConfigurationError::InvalidSetting { .. }));
}

#[tokio::test]
async fn test_from_config_modes() {
  let local = PeerForwarderProvider::from_config(PeerForwarderConfig::default()).unwrap();
  assert!(!local.is_peer_forwarding_required());

  let fleet = PeerForwarderProvider::from_config(static_config("node-a")).unwrap();
  assert!(fleet.is_peer_forwarding_required());

  let dynamic = PeerForwarderConfig::default()
    .with_discovery_mode(DiscoveryMode::Dynamic)
    .with_local_address("node-a");
  assert!(PeerForwarderProvider::from_config(dynamic).is_err());
}

#[tokio::test]
async fn test_start_binds_once_and_shutdown_stops() {
  let provider = fleet_provider("node-a");
  provider
    .register("p", &Aggregate, "agg", &IdentificationKeySet::new(["user"]), 4)
    .unwrap();

  let addr = provider.start().await.unwrap().unwrap();
  assert_ne!(addr.port(), 0);
  assert_eq!(provider.start().await.unwrap(), Some(addr));

  provider.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_start_shares_one_server() {
  let provider = fleet_provider("node-a");
  let (first, second) = tokio::join!(provider.start(), provider.start());
  let first = first.unwrap().unwrap();
  assert_eq!(second.unwrap(), Some(first));

  provider.shutdown().await;
  assert!(tokio::net::TcpStream::connect(first).await.is_err());
}
