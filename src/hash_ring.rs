//! # Ownership Resolution
//!
//! Maps a [`Fingerprint`] to the fleet member that owns it.
//!
//! [`HashRing`] is a consistent-hash ring: each peer is placed on a `u64` ring
//! at [`VIRTUAL_NODES_PER_PEER`] pseudo-random positions derived from its
//! address, and a fingerprint belongs to the first position at or after it,
//! wrapping around. Positions depend only on peer addresses, so every member
//! observing the same [`PeerSet`] computes the same owner, and a join or leave
//! only moves the keys adjacent to the affected peer's positions.
//!
//! The ring follows its [`PeerListProvider`]: when the published generation
//! changes, the next lookup rebuilds the ring.

use crate::discovery::{Peer, PeerListProvider, PeerSet};
use crate::identification::{Fingerprint, stable_hash};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

/// Ring positions per peer.
pub const VIRTUAL_NODES_PER_PEER: u32 = 128;

/// Decides which peer owns a fingerprint.
pub trait OwnershipResolver: Send + Sync {
  /// Owner of `fingerprint`, or `None` when the peer set is empty.
  fn owner(&self, fingerprint: Fingerprint) -> Option<Peer>;

  /// True when `peer` is this instance.
  fn is_self(&self, peer: &Peer) -> bool;
}

#[derive(Debug, Default)]
struct Ring {
  generation: u64,
  positions: BTreeMap<u64, Peer>,
}

impl Ring {
  fn build(peers: &PeerSet) -> Self {
    let mut positions = BTreeMap::new();
    for peer in peers.peers() {
      for vnode in 0..VIRTUAL_NODES_PER_PEER {
        let position = stable_hash(format!("{}#{}", peer.address(), vnode).as_bytes());
        // Ties resolve to the smallest address so every member agrees.
        positions
          .entry(position)
          .and_modify(|existing: &mut Peer| {
            if peer < &*existing {
              *existing = peer.clone();
            }
          })
          .or_insert_with(|| peer.clone());
      }
    }
    Self {
      generation: peers.generation(),
      positions,
    }
  }

  fn owner(&self, fingerprint: Fingerprint) -> Option<Peer> {
    self
      .positions
      .range(fingerprint.as_u64()..)
      .next()
      .or_else(|| self.positions.iter().next())
      .map(|(_, peer)| peer.clone())
  }
}

/// Consistent-hash [`OwnershipResolver`] over a live peer set.
pub struct HashRing {
  local: Peer,
  peers: watch::Receiver<PeerSet>,
  ring: RwLock<Ring>,
}

impl HashRing {
  /// Creates a ring for `local`, following `provider`.
  pub fn new(local: Peer, provider: &dyn PeerListProvider) -> Self {
    let peers = provider.subscribe();
    let ring = Ring::build(&peers.borrow());
    let hash_ring = Self {
      local,
      peers,
      ring: RwLock::new(ring),
    };
    hash_ring.check_membership(&hash_ring.peers.borrow());
    hash_ring
  }

  /// The local peer.
  pub fn local(&self) -> &Peer {
    &self.local
  }

  /// Generation of the peer set the ring was last built from.
  pub fn generation(&self) -> u64 {
    self
      .ring
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .generation
  }

  fn check_membership(&self, peers: &PeerSet) {
    if !peers.is_empty() && !peers.contains(&self.local) {
      warn!(
        local = %self.local,
        generation = peers.generation(),
        "local address is not part of the peer set; this instance will own no keys"
      );
    }
  }

  fn refresh_if_stale(&self) {
    let latest = self.peers.borrow();
    if latest.generation() == self.generation() {
      return;
    }
    let mut ring = self
      .ring
      .write()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if ring.generation != latest.generation() {
      *ring = Ring::build(&latest);
      info!(
        generation = latest.generation(),
        peer_count = latest.len(),
        "hash ring rebuilt"
      );
      self.check_membership(&latest);
    }
  }
}

impl OwnershipResolver for HashRing {
  fn owner(&self, fingerprint: Fingerprint) -> Option<Peer> {
    self.refresh_if_stale();
    self
      .ring
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .owner(fingerprint)
  }

  fn is_self(&self, peer: &Peer) -> bool {
    *peer == self.local
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::discovery::{DynamicPeerListProvider, StaticPeerListProvider};
  use std::collections::HashMap;

  fn fingerprints(n: u64) -> impl Iterator<Item = Fingerprint> {
    (0..n).map(|i| Fingerprint(stable_hash(&i.to_be_bytes())))
  }

  #[test]
  fn test_owner_is_deterministic_across_instances() {
    let a = HashRing::new(Peer::new("a"), &StaticPeerListProvider::new(["a", "b", "c"]));
    let b = HashRing::new(Peer::new("b"), &StaticPeerListProvider::new(["c", "b", "a"]));
    for fp in fingerprints(1000) {
      let owner = a.owner(fp);
      assert!(owner.is_some());
      assert_eq!(owner, a.owner(fp));
      assert_eq!(owner, b.owner(fp));
    }
  }

  #[test]
  fn test_empty_peer_set_has_no_owner() {
    let empty: [&str; 0] = [];
    let ring = HashRing::new(Peer::new("a"), &StaticPeerListProvider::new(empty));
    assert_eq!(ring.owner(Fingerprint(42)), None);
  }

  #[test]
  fn test_single_peer_owns_everything() {
    let ring = HashRing::new(Peer::new("solo"), &StaticPeerListProvider::new(["solo"]));
    for fp in fingerprints(100) {
      let owner = ring.owner(fp).unwrap();
      assert!(ring.is_self(&owner));
    }
  }

  #[test]
  fn test_keys_spread_over_peers() {
    let ring = HashRing::new(Peer::new("a"), &StaticPeerListProvider::new(["a", "b", "c", "d"]));
    let mut counts: HashMap<Peer, usize> = HashMap::new();
    for fp in fingerprints(10_000) {
      *counts.entry(ring.owner(fp).unwrap()).or_default() += 1;
    }
    assert_eq!(counts.len(), 4);
    for (peer, count) in counts {
      assert!(
        (1500..=3500).contains(&count),
        "peer {peer} owns {count} of 10000 keys"
      );
    }
  }

  #[test]
  fn test_join_only_moves_keys_to_new_peer() {
    let provider = DynamicPeerListProvider::new(["a", "b", "c"]);
    let ring = HashRing::new(Peer::new("a"), &provider);
    let before: Vec<_> = fingerprints(5000).map(|fp| ring.owner(fp).unwrap()).collect();

    assert!(provider.update(["a", "b", "c", "d"]));
    let after: Vec<_> = fingerprints(5000).map(|fp| ring.owner(fp).unwrap()).collect();
    assert_eq!(ring.generation(), 2);

    let mut moved = 0;
    for (old, new) in before.iter().zip(&after) {
      if old != new {
        assert_eq!(new.address(), "d", "key moved between surviving peers");
        moved += 1;
      }
    }
    let moved_fraction = moved as f64 / 5000.0;
    assert!(
      (0.1..0.4).contains(&moved_fraction),
      "moved fraction {moved_fraction}"
    );
  }

  #[test]
  fn test_leave_only_moves_departed_keys() {
    let provider = DynamicPeerListProvider::new(["a", "b", "c"]);
    let ring = HashRing::new(Peer::new("a"), &provider);
    let before: Vec<_> = fingerprints(5000).map(|fp| ring.owner(fp).unwrap()).collect();

    provider.update(["a", "b"]);
    for (fp, old) in fingerprints(5000).zip(before) {
      let new = ring.owner(fp).unwrap();
      if old.address() != "c" {
        assert_eq!(new, old);
      } else {
        assert_ne!(new.address(), "c");
      }
    }
  }
}
