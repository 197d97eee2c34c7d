use crate::key::CacheKey;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// How an entry may be served at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Inside the TTL. Served as a plain hit.
  Fresh,
  /// Past the TTL but inside the stale window, and the read allows it.
  Stale,
  /// Unusable. Treated exactly like an absent entry.
  Expired,
}

/// A cached value together with all the metadata the cache tracks for it.
///
/// This is also the on-disk representation: the persistence layer writes
/// the whole struct as JSON (minus the in-memory bookkeeping fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub(crate) key: CacheKey,
  /// The user's value, stored as JSON so one cache can serve many types.
  pub(crate) value: Arc<serde_json::Value>,
  /// Creation time, in milliseconds since the Unix epoch.
  pub(crate) created_at: u64,
  /// Time-to-live in milliseconds.
  pub(crate) ttl: u64,
  /// Length of the stale window after the TTL, in milliseconds.
  pub(crate) stale_ttl: u64,
  pub(crate) last_accessed_at: u64,
  /// True while the value has not been confirmed written to disk.
  #[serde(skip)]
  pub(crate) dirty: bool,
  /// Monotonic write counter assigned by the store. Lets a flush clear
  /// `dirty` only for the exact version it wrote.
  #[serde(skip)]
  pub(crate) version: u64,
}

impl CacheEntry {
  /// Creates a new, dirty entry created at `now`.
  pub(crate) fn new(key: CacheKey, value: serde_json::Value, now: u64, ttl: u64, stale_ttl: u64) -> Self {
    Self {
      key,
      value: Arc::new(value),
      created_at: now,
      ttl,
      stale_ttl,
      last_accessed_at: now,
      dirty: true,
      version: 0,
    }
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn namespace(&self) -> &str {
    self.key.namespace()
  }

  pub fn value(&self) -> &serde_json::Value {
    &self.value
  }

  pub(crate) fn shared_value(&self) -> Arc<serde_json::Value> {
    Arc::clone(&self.value)
  }

  pub fn created_at(&self) -> u64 {
    self.created_at
  }

  pub fn ttl(&self) -> u64 {
    self.ttl
  }

  pub fn stale_ttl(&self) -> u64 {
    self.stale_ttl
  }

  pub fn last_accessed_at(&self) -> u64 {
    self.last_accessed_at
  }

  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  #[inline]
  fn fresh_until(&self) -> u64 {
    self.created_at.saturating_add(self.ttl)
  }

  #[inline]
  fn stale_until(&self) -> u64 {
    self.fresh_until().saturating_add(self.stale_ttl)
  }

  /// Classifies the entry at `now`.
  ///
  /// Without `allow_stale`, an entry past its TTL is `Expired` even if it is
  /// still inside its stale window.
  pub fn freshness(&self, now: u64, allow_stale: bool) -> Freshness {
    if now < self.fresh_until() {
      Freshness::Fresh
    } else if allow_stale && now < self.stale_until() {
      Freshness::Stale
    } else {
      Freshness::Expired
    }
  }

  /// True once the entry can no longer be served under any read options.
  pub fn is_dead(&self, now: u64) -> bool {
    now >= self.stale_until()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn entry(ttl: u64, stale_ttl: u64) -> CacheEntry {
    let key = CacheKey::derive("ns", &json!({"q": 1})).unwrap();
    CacheEntry::new(key, json!("v"), 1_000, ttl, stale_ttl)
  }

  #[test]
  fn fresh_before_ttl() {
    let e = entry(100, 50);
    assert_eq!(e.freshness(1_000, false), Freshness::Fresh);
    assert_eq!(e.freshness(1_099, false), Freshness::Fresh);
  }

  #[test]
  fn expired_at_ttl_without_swr() {
    let e = entry(100, 50);
    assert_eq!(e.freshness(1_100, false), Freshness::Expired);
  }

  #[test]
  fn stale_window_only_with_swr() {
    let e = entry(100, 50);
    assert_eq!(e.freshness(1_100, true), Freshness::Stale);
    assert_eq!(e.freshness(1_149, true), Freshness::Stale);
    assert_eq!(e.freshness(1_150, true), Freshness::Expired);
    assert!(e.is_dead(1_150));
    assert!(!e.is_dead(1_149));
  }

  #[test]
  fn zero_stale_window_never_stale() {
    let e = entry(100, 0);
    assert_eq!(e.freshness(1_100, true), Freshness::Expired);
  }

  #[test]
  fn huge_ttl_does_not_overflow() {
    let e = entry(u64::MAX, u64::MAX);
    assert_eq!(e.freshness(u64::MAX - 1, false), Freshness::Fresh);
  }

  #[test]
  fn bookkeeping_fields_are_not_serialized() {
    let mut e = entry(100, 0);
    e.version = 7;
    let json = serde_json::to_value(&e).unwrap();
    assert!(json.get("dirty").is_none());
    assert!(json.get("version").is_none());
    let back: CacheEntry = serde_json::from_value(json).unwrap();
    assert!(!back.dirty);
    assert_eq!(back.version, 0);
    assert_eq!(back.value, e.value);
  }
}
