//! # Identification Keys and Fingerprints
//!
//! A stateful processor declares the event fields that decide which instance
//! must see an event: its [`IdentificationKeySet`]. Hashing an event's values at
//! those fields yields a [`Fingerprint`], the unit of routing.
//!
//! Fingerprints are SHA-256 based so every fleet member computes the same value
//! for the same field values, regardless of process, platform or build.
//!
//! ```rust
//! use peerweave::event::Event;
//! use peerweave::identification::IdentificationKeySet;
//! use serde_json::json;
//!
//! let keys = IdentificationKeySet::new(["user", "session"]);
//! let a = Event::builder("log").with("user", json!("u1")).with("session", json!(1)).build();
//! let b = Event::builder("log").with("session", json!(1)).with("user", json!("u1")).build();
//! assert_eq!(keys.fingerprint(&a), keys.fingerprint(&b));
//! ```

use crate::event::Event;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

const KEY_VALUE_SEPARATOR: u8 = 0x1f;
const ENTRY_SEPARATOR: u8 = 0x1e;

/// Deterministic routing value derived from an event's identification-key values.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
  /// Returns the raw value.
  pub const fn as_u64(self) -> u64 {
    self.0
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:016x}", self.0)
  }
}

/// Returns the first eight bytes of the SHA-256 digest of `bytes` as a big-endian `u64`.
pub(crate) fn stable_hash(bytes: &[u8]) -> u64 {
  let digest = Sha256::digest(bytes);
  let mut prefix = [0u8; 8];
  prefix.copy_from_slice(&digest[..8]);
  u64::from_be_bytes(prefix)
}

/// Ordered, deduplicated set of field names that determine event ownership.
///
/// Declaration order does not matter: `["a", "b"]` and `["b", "a"]` are the
/// same set and produce the same fingerprints.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct IdentificationKeySet(BTreeSet<String>);

impl IdentificationKeySet {
  /// Creates a key set from field names.
  pub fn new<I, S>(keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(keys.into_iter().map(Into::into).collect())
  }

  /// Returns true when no keys are declared.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Number of keys.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Iterates keys in sorted order.
  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }

  /// Computes the fingerprint of `event` for this key set.
  ///
  /// Missing fields hash as JSON `null`, so events lacking a key still route
  /// deterministically (all of them to the same owner).
  pub fn fingerprint(&self, event: &Event) -> Fingerprint {
    let mut buf = Vec::with_capacity(64);
    for key in &self.0 {
      buf.extend_from_slice(key.as_bytes());
      buf.push(KEY_VALUE_SEPARATOR);
      match event.get(key) {
        Some(value) => buf.extend_from_slice(value.to_string().as_bytes()),
        None => buf.extend_from_slice(b"null"),
      }
      buf.push(ENTRY_SEPARATOR);
    }
    Fingerprint(stable_hash(&buf))
  }
}

impl fmt::Display for IdentificationKeySet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, key) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}", key)?;
    }
    write!(f, "]")
  }
}

impl<S: Into<String>> FromIterator<S> for IdentificationKeySet {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self::new(iter)
  }
}

/// Identification key sets for which peer forwarding is administratively disabled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExcludeSet(HashSet<IdentificationKeySet>);

impl ExcludeSet {
  /// Creates an empty exclude set.
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a key set.
  pub fn insert(&mut self, keys: IdentificationKeySet) -> bool {
    self.0.insert(keys)
  }

  /// True when `keys` (in any declaration order) is excluded.
  pub fn contains(&self, keys: &IdentificationKeySet) -> bool {
    self.0.contains(keys)
  }

  /// True when nothing is excluded.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<IdentificationKeySet> for ExcludeSet {
  fn from_iter<I: IntoIterator<Item = IdentificationKeySet>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn event(user: &str, n: i64) -> Event {
    Event::builder("log")
      .with("user", json!(user))
      .with("n", json!(n))
      .with("noise", json!(n * 31))
      .build()
  }

  #[test]
  fn test_key_set_ignores_order_and_duplicates() {
    let a = IdentificationKeySet::new(["b", "a", "a"]);
    let b = IdentificationKeySet::new(["a", "b"]);
    assert_eq!(a, b);
    assert_eq!(a.len(), 2);
    assert_eq!(a.to_string(), "[a, b]");
  }

  #[test]
  fn test_fingerprint_depends_only_on_key_fields() {
    let keys = IdentificationKeySet::new(["user"]);
    assert_eq!(keys.fingerprint(&event("u1", 1)), keys.fingerprint(&event("u1", 2)));
    assert_ne!(keys.fingerprint(&event("u1", 1)), keys.fingerprint(&event("u2", 1)));
  }

  #[test]
  fn test_fingerprint_is_stable_across_calls() {
    let keys = IdentificationKeySet::new(["user", "n"]);
    let e = event("u1", 5);
    let first = keys.fingerprint(&e);
    for _ in 0..10 {
      assert_eq!(keys.fingerprint(&e), first);
    }
  }

  #[test]
  fn test_fingerprint_distinguishes_value_boundaries() {
    let keys = IdentificationKeySet::new(["a", "b"]);
    let left = Event::builder("log")
      .with("a", json!("x"))
      .with("b", json!("yz"))
      .build();
    let right = Event::builder("log")
      .with("a", json!("xy"))
      .with("b", json!("z"))
      .build();
    assert_ne!(keys.fingerprint(&left), keys.fingerprint(&right));
  }

  #[test]
  fn test_missing_field_hashes_as_null() {
    let keys = IdentificationKeySet::new(["user"]);
    let missing = Event::builder("log").build();
    let null = Event::builder("log").with("user", json!(null)).build();
    assert_eq!(keys.fingerprint(&missing), keys.fingerprint(&null));
  }

  #[test]
  fn test_exclude_set_matches_regardless_of_order() {
    let exclude: ExcludeSet = [IdentificationKeySet::new(["x", "y"])].into_iter().collect();
    assert!(exclude.contains(&IdentificationKeySet::new(["y", "x"])));
    assert!(!exclude.contains(&IdentificationKeySet::new(["x"])));
  }
}
