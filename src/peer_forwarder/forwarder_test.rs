//! Tests for [`RemotePeerForwarder`] and [`LocalPeerForwarder`] against a
//! scripted resolver and transport.

use super::*;
use crate::error::TransportError;
use crate::event::Event;
use serde_json::json;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Owner table keyed by the value of the `key` field.
struct ScriptedResolver {
  local: Peer,
  owners: HashMap<Fingerprint, Peer>,
}

impl ScriptedResolver {
  fn new(keys: &IdentificationKeySet, local: &str, owners: &[(&str, &str)]) -> Arc<Self> {
    Arc::new(Self {
      local: Peer::new(local),
      owners: owners
        .iter()
        .map(|(key, peer)| (keys.fingerprint(&event(key, 0)), Peer::new(*peer)))
        .collect(),
    })
  }
}

impl OwnershipResolver for ScriptedResolver {
  fn owner(&self, fingerprint: Fingerprint) -> Option<Peer> {
    self.owners.get(&fingerprint).cloned()
  }

  fn is_self(&self, peer: &Peer) -> bool {
    *peer == self.local
  }
}

#[derive(Default)]
struct ScriptedTransport {
  fail: bool,
  sent: Mutex<Vec<(Peer, usize)>>,
  inbound: Mutex<Vec<Arc<Event>>>,
  shut_down: AtomicBool,
}

#[async_trait]
impl ForwardingTransport for ScriptedTransport {
  async fn send(&self, peer: &Peer, batch: Vec<ForwardedEvent>) -> SendOutcome {
    self.sent.lock().unwrap().push((peer.clone(), batch.len()));
    if self.fail {
      SendOutcome::Failed(TransportError::Connection("refused".into()))
    } else {
      SendOutcome::Delivered
    }
  }

  fn poll(&self) -> Vec<Arc<Event>> {
    std::mem::take(&mut *self.inbound.lock().unwrap())
  }

  async fn shutdown(&self) {
    self.shut_down.store(true, Ordering::SeqCst);
  }
}

fn event(key: &str, seq: i64) -> Event {
  Event::builder("log")
    .with("key", json!(key))
    .with("seq", json!(seq))
    .build()
}

fn record(key: &str, seq: i64) -> Record {
  Record::new(event(key, seq))
}

fn keys() -> IdentificationKeySet {
  IdentificationKeySet::new(["key"])
}

fn forwarder(
  transport: Arc<ScriptedTransport>,
  owners: &[(&str, &str)],
  batch_size: usize,
) -> RemotePeerForwarder {
  RemotePeerForwarder::new(
    "pipeline",
    "aggregate",
    keys(),
    ScriptedResolver::new(&keys(), "self", owners),
    transport,
    batch_size,
    4,
  )
}

fn seqs(records: &[Record]) -> Vec<i64> {
  let mut seqs: Vec<i64> = records
    .iter()
    .filter_map(|r| r.data().get("seq").and_then(|v| v.as_i64()))
    .collect();
  seqs.sort_unstable();
  seqs
}

#[tokio::test]
async fn test_delivered_records_leave_local_result() {
  let transport = Arc::new(ScriptedTransport::default());
  let forwarder = forwarder(Arc::clone(&transport), &[("A", "peer-x"), ("B", "self")], 48);

  let local = forwarder
    .forward_records(vec![record("A", 1), record("A", 2), record("B", 3)])
    .await;

  assert_eq!(seqs(&local), vec![3]);
  assert_eq!(
    *transport.sent.lock().unwrap(),
    vec![(Peer::new("peer-x"), 2)]
  );
}

#[tokio::test]
async fn test_failed_delivery_falls_back_to_local() {
  let transport = Arc::new(ScriptedTransport {
    fail: true,
    ..Default::default()
  });
  let forwarder = forwarder(Arc::clone(&transport), &[("A", "peer-x"), ("B", "self")], 48);

  let local = forwarder
    .forward_records(vec![record("A", 1), record("A", 2), record("B", 3)])
    .await;

  assert_eq!(seqs(&local), vec![1, 2, 3]);
  assert_eq!(transport.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_batches_are_split_by_batch_size() {
  let transport = Arc::new(ScriptedTransport::default());
  let forwarder = forwarder(Arc::clone(&transport), &[("A", "peer-x")], 2);

  let records = (0..5).map(|i| record("A", i)).collect();
  assert!(forwarder.forward_records(records).await.is_empty());

  let mut sizes: Vec<usize> = transport
    .sent
    .lock()
    .unwrap()
    .iter()
    .map(|(_, n)| *n)
    .collect();
  sizes.sort_unstable();
  assert_eq!(sizes, vec![1, 2, 2]);
}

#[tokio::test]
async fn test_records_grouped_per_destination() {
  let transport = Arc::new(ScriptedTransport::default());
  let forwarder = forwarder(
    Arc::clone(&transport),
    &[("A", "peer-x"), ("B", "peer-y")],
    48,
  );

  forwarder
    .forward_records(vec![record("A", 1), record("B", 2), record("A", 3)])
    .await;

  let mut sent = transport.sent.lock().unwrap().clone();
  sent.sort();
  assert_eq!(
    sent,
    vec![(Peer::new("peer-x"), 2), (Peer::new("peer-y"), 1)]
  );
}

#[tokio::test]
async fn test_unowned_records_stay_local() {
  let transport = Arc::new(ScriptedTransport::default());
  let forwarder = forwarder(Arc::clone(&transport), &[], 48);

  let local = forwarder.forward_records(vec![record("Z", 1)]).await;

  assert_eq!(seqs(&local), vec![1]);
  assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_batch_sends_nothing() {
  let transport = Arc::new(ScriptedTransport::default());
  let forwarder = forwarder(Arc::clone(&transport), &[("A", "peer-x")], 48);

  assert!(forwarder.forward_records(Vec::new()).await.is_empty());
  assert!(transport.sent.lock().unwrap().is_empty());
}

#[test]
fn test_receive_records_drains_transport() {
  let transport = Arc::new(ScriptedTransport::default());
  transport
    .inbound
    .lock()
    .unwrap()
    .extend([Arc::new(event("A", 7)), Arc::new(event("B", 8))]);
  let forwarder = forwarder(Arc::clone(&transport), &[], 48);

  let received = forwarder.receive_records();
  assert_eq!(seqs(&received), vec![7, 8]);
  assert!(received.iter().all(|r| r.acknowledgement().is_none()));
  assert!(forwarder.receive_records().is_empty());
}

#[tokio::test]
async fn test_shutdown_reaches_transport() {
  let transport = Arc::new(ScriptedTransport::default());
  let forwarder = forwarder(Arc::clone(&transport), &[], 48);
  forwarder.shutdown().await;
  assert!(transport.shut_down.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_local_forwarder_keeps_everything() {
  let forwarder = LocalPeerForwarder::new("pipeline", "aggregate");
  let local = forwarder
    .forward_records(vec![record("A", 1), record("B", 2)])
    .await;
  assert_eq!(seqs(&local), vec![1, 2]);
  assert!(forwarder.receive_records().is_empty());
}
