//! # Peer Discovery
//!
//! The forwarding layer does not discover peers itself. It consumes a
//! [`PeerSet`] published by a [`PeerListProvider`] and rebuilds its ownership
//! view whenever the set's generation changes.
//!
//! Two providers ship with the crate:
//!
//! - [`StaticPeerListProvider`]: a fixed endpoint list from configuration.
//! - [`DynamicPeerListProvider`]: a set pushed by an external discovery
//!   collaborator (DNS poller, cloud directory, ...) through
//!   [`DynamicPeerListProvider::update`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tokio::sync::watch;
use tracing::info;

/// Address of one fleet member, as `host` or `host:port`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Peer(String);

impl Peer {
  /// Creates a peer from its address.
  pub fn new(address: impl Into<String>) -> Self {
    Self(address.into())
  }

  /// Returns the address.
  pub fn address(&self) -> &str {
    &self.0
  }

  /// Returns `host:port`, appending `default_port` when the address has none.
  pub fn authority(&self, default_port: u16) -> String {
    if self.has_port() {
      self.0.clone()
    } else if self.0.contains(':') && !self.0.starts_with('[') {
      // Bare IPv6 literal.
      format!("[{}]:{}", self.0, default_port)
    } else {
      format!("{}:{}", self.0, default_port)
    }
  }

  fn has_port(&self) -> bool {
    // Bracketed IPv6 literals carry colons of their own.
    if let Some(end) = self.0.rfind(']') {
      return self.0[end..].contains(':');
    }
    match self.0.rsplit_once(':') {
      Some((host, port)) => !host.contains(':') && port.parse::<u16>().is_ok(),
      None => false,
    }
  }
}

impl fmt::Display for Peer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for Peer {
  fn from(s: &str) -> Self {
    Self::new(s)
  }
}

impl From<String> for Peer {
  fn from(s: String) -> Self {
    Self::new(s)
  }
}

/// A membership view of the fleet, including this instance.
///
/// The generation increases with every published change; consumers compare
/// generations to detect that their derived state is stale.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PeerSet {
  generation: u64,
  peers: BTreeSet<Peer>,
}

impl PeerSet {
  /// Creates a peer set at the given generation.
  pub fn new<I: IntoIterator<Item = Peer>>(generation: u64, peers: I) -> Self {
    Self {
      generation,
      peers: peers.into_iter().collect(),
    }
  }

  /// Generation of this view.
  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Iterates peers in address order.
  pub fn peers(&self) -> impl Iterator<Item = &Peer> {
    self.peers.iter()
  }

  /// True when `peer` is a member.
  pub fn contains(&self, peer: &Peer) -> bool {
    self.peers.contains(peer)
  }

  /// Number of peers.
  pub fn len(&self) -> usize {
    self.peers.len()
  }

  /// True when there are no peers.
  pub fn is_empty(&self) -> bool {
    self.peers.is_empty()
  }
}

/// Source of the current [`PeerSet`].
pub trait PeerListProvider: Send + Sync {
  /// Subscribes to peer set changes. The receiver always holds the latest view.
  fn subscribe(&self) -> watch::Receiver<PeerSet>;

  /// Returns the latest view.
  fn current(&self) -> PeerSet {
    self.subscribe().borrow().clone()
  }
}

/// Provider of a fixed endpoint list.
pub struct StaticPeerListProvider {
  sender: watch::Sender<PeerSet>,
}

impl StaticPeerListProvider {
  /// Creates a provider for `endpoints`.
  pub fn new<I, S>(endpoints: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let peers = PeerSet::new(1, endpoints.into_iter().map(Peer::new));
    info!(peer_count = peers.len(), "static peer list loaded");
    let (sender, _) = watch::channel(peers);
    Self { sender }
  }
}

impl PeerListProvider for StaticPeerListProvider {
  fn subscribe(&self) -> watch::Receiver<PeerSet> {
    self.sender.subscribe()
  }
}

/// Provider whose peer set is pushed by an external discovery collaborator.
pub struct DynamicPeerListProvider {
  sender: watch::Sender<PeerSet>,
}

impl DynamicPeerListProvider {
  /// Creates a provider with an initial peer list.
  pub fn new<I, S>(initial: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let (sender, _) = watch::channel(PeerSet::new(
      1,
      initial.into_iter().map(Peer::new),
    ));
    Self { sender }
  }

  /// Replaces the peer set. Publishes a new generation only when membership
  /// actually changed; returns whether it did.
  pub fn update<I, S>(&self, peers: I) -> bool
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let peers: BTreeSet<Peer> = peers.into_iter().map(Peer::new).collect();
    self.sender.send_if_modified(|current| {
      if current.peers == peers {
        return false;
      }
      let generation = current.generation + 1;
      info!(
        generation,
        previous = current.peers.len(),
        current = peers.len(),
        "peer set changed"
      );
      *current = PeerSet { generation, peers };
      true
    })
  }
}

impl PeerListProvider for DynamicPeerListProvider {
  fn subscribe(&self) -> watch::Receiver<PeerSet> {
    self.sender.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_peer_authority_appends_default_port() {
    assert_eq!(Peer::new("10.0.0.1").authority(4994), "10.0.0.1:4994");
    assert_eq!(Peer::new("10.0.0.1:5000").authority(4994), "10.0.0.1:5000");
    assert_eq!(Peer::new("node-a").authority(80), "node-a:80");
    assert_eq!(Peer::new("[::1]").authority(4994), "[::1]:4994");
    assert_eq!(Peer::new("[::1]:7000").authority(4994), "[::1]:7000");
    assert_eq!(Peer::new("::1").authority(4994), "[::1]:4994");
    assert_eq!(Peer::new("fd00::2").authority(80), "[fd00::2]:80");
  }

  #[test]
  fn test_static_provider_publishes_generation_one() {
    let provider = StaticPeerListProvider::new(["b", "a", "a"]);
    let set = provider.current();
    assert_eq!(set.generation(), 1);
    assert_eq!(set.len(), 2);
    assert_eq!(
      set.peers().map(Peer::address).collect::<Vec<_>>(),
      vec!["a", "b"]
    );
  }

  #[test]
  fn test_dynamic_provider_bumps_generation_only_on_change() {
    let provider = DynamicPeerListProvider::new(["a"]);
    let receiver = provider.subscribe();

    assert!(!provider.update(["a"]));
    assert_eq!(receiver.borrow().generation(), 1);

    assert!(provider.update(["a", "b"]));
    assert_eq!(receiver.borrow().generation(), 2);
    assert!(receiver.borrow().contains(&Peer::new("b")));

    assert!(provider.update(["b"]));
    assert_eq!(provider.current().generation(), 3);
    assert!(!provider.current().contains(&Peer::new("a")));
  }
}
