mod lru_list;

use crate::entry::{CacheEntry, Freshness};
use crate::key::CacheKey;

use std::collections::BTreeSet;
use std::fmt;

use ahash::{HashMap, HashMapExt};
use lru_list::LruList;
use parking_lot::Mutex;

/// The outcome of a read against the store.
#[derive(Debug, Clone)]
pub(crate) struct StoreRead {
  pub(crate) entry: CacheEntry,
  pub(crate) freshness: Freshness,
}

struct StoreInner {
  entries: LruList<CacheKey, CacheEntry>,
  // Dirty entries pushed out by the LRU bound whose spill to disk has not
  // claimed them yet, by version.
  spilling: HashMap<CacheKey, u64>,
  next_version: u64,
}

/// The bounded, in-memory tier of the cache.
///
/// Entries are kept in strict least-recently-used order: every served read
/// and every write moves the entry to the front, and overflow evicts from the
/// back. The store knows nothing about disks or strategies; it only tracks
/// which entries are `dirty` so that the engine can flush them.
pub(crate) struct EntryStore {
  inner: Mutex<StoreInner>,
  max_size: usize,
}

impl fmt::Debug for EntryStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntryStore")
      .field("max_size", &self.max_size)
      .field("size", &self.size())
      .finish()
  }
}

impl EntryStore {
  pub(crate) fn new(max_size: usize) -> Self {
    Self {
      inner: Mutex::new(StoreInner {
        entries: LruList::new(),
        spilling: HashMap::new(),
        next_version: 1,
      }),
      max_size,
    }
  }

  pub(crate) fn max_size(&self) -> usize {
    self.max_size
  }

  /// Returns a copy of the entry without affecting its recency.
  pub(crate) fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.inner.lock().entries.get(key).cloned()
  }

  /// Looks up `key` and classifies it at `now`. Entries that can be served
  /// (fresh, or stale when `allow_stale`) are touched; expired ones are left
  /// alone and reported as such.
  pub(crate) fn read(&self, key: &CacheKey, now: u64, allow_stale: bool) -> Option<StoreRead> {
    let mut inner = self.inner.lock();
    let freshness = inner.entries.get(key)?.freshness(now, allow_stale);
    if freshness != Freshness::Expired {
      inner.entries.move_to_front(key);
      if let Some(entry) = inner.entries.get_mut(key) {
        entry.last_accessed_at = now;
      }
    }
    let entry = inner.entries.get(key)?.clone();
    Some(StoreRead { entry, freshness })
  }

  /// Inserts or replaces an entry, marks it most recently used, and evicts
  /// whatever no longer fits.
  ///
  /// Returns the version assigned to the entry and the evicted entries.
  pub(crate) fn put(&self, mut entry: CacheEntry, now: u64) -> (u64, Vec<CacheEntry>) {
    let mut inner = self.inner.lock();
    let version = inner.next_version;
    inner.next_version += 1;

    entry.version = version;
    entry.last_accessed_at = now;
    if entry.dirty {
      // The new version owns the file now.
      inner.spilling.remove(&entry.key);
    }
    inner.entries.push_front(entry.key.clone(), entry);

    let evicted = Self::evict_if_over_capacity(&mut inner, self.max_size);
    (version, evicted)
  }

  /// Updates recency for `key`. Returns `false` if the key is absent.
  pub(crate) fn touch(&self, key: &CacheKey, now: u64) -> bool {
    let mut inner = self.inner.lock();
    if !inner.entries.move_to_front(key) {
      return false;
    }
    if let Some(entry) = inner.entries.get_mut(key) {
      entry.last_accessed_at = now;
    }
    true
  }

  /// Removes `key`, including any evicted version still waiting to be
  /// spilled.
  pub(crate) fn delete(&self, key: &CacheKey) -> Option<CacheEntry> {
    let mut inner = self.inner.lock();
    inner.spilling.remove(key);
    inner.entries.remove(key)
  }

  pub(crate) fn size(&self) -> usize {
    self.inner.lock().entries.len()
  }

  // Evicts least-recently-used entries until the store is within bounds.
  // Runs under the same lock as the insert that overflowed it, so no reader
  // ever observes more than `max_size` entries.
  fn evict_if_over_capacity(inner: &mut StoreInner, max_size: usize) -> Vec<CacheEntry> {
    let mut evicted = Vec::new();
    while inner.entries.len() > max_size {
      match inner.entries.pop_back() {
        Some((key, entry)) => {
          if entry.dirty {
            inner.spilling.insert(key, entry.version);
          }
          evicted.push(entry);
        }
        None => break,
      }
    }
    evicted
  }

  /// Claims the spill of an evicted entry. Returns `false` if the key was
  /// deleted, cleared or written again since `version` was evicted, in which
  /// case the evicted value must not reach disk.
  pub(crate) fn claim_spill(&self, key: &CacheKey, version: u64) -> bool {
    let mut inner = self.inner.lock();
    match inner.spilling.get(key) {
      Some(&pending) if pending == version => {
        inner.spilling.remove(key);
        true
      }
      _ => false,
    }
  }

  /// Returns a copy of `key`'s entry only if it is still dirty.
  pub(crate) fn dirty_snapshot(&self, key: &CacheKey) -> Option<CacheEntry> {
    let inner = self.inner.lock();
    inner.entries.get(key).filter(|e| e.dirty).cloned()
  }

  /// Keys of all entries not yet confirmed on disk, least recently used
  /// first so that a partial flush saves the most exposed entries first.
  pub(crate) fn dirty_keys(&self) -> Vec<CacheKey> {
    let inner = self.inner.lock();
    let mut keys: Vec<CacheKey> = inner
      .entries
      .iter()
      .filter(|(_, e)| e.dirty)
      .map(|(k, _)| k.clone())
      .collect();
    keys.reverse();
    keys
  }

  pub(crate) fn dirty_count(&self) -> usize {
    let inner = self.inner.lock();
    inner.entries.iter().filter(|(_, e)| e.dirty).count()
  }

  /// Clears `dirty` if the stored entry is still at `version`. A newer write
  /// that raced with the flush keeps its own dirty flag.
  pub(crate) fn mark_clean(&self, key: &CacheKey, version: u64) -> bool {
    let mut inner = self.inner.lock();
    match inner.entries.get_mut(key) {
      Some(entry) if entry.version == version => {
        entry.dirty = false;
        true
      }
      _ => false,
    }
  }

  /// Distinct namespaces currently held in memory, sorted.
  pub(crate) fn namespaces(&self) -> Vec<String> {
    let inner = self.inner.lock();
    let set: BTreeSet<&str> = inner.entries.iter().map(|(k, _)| k.namespace()).collect();
    set.into_iter().map(str::to_owned).collect()
  }

  /// Removes every entry and returns how many were dropped.
  pub(crate) fn clear(&self) -> usize {
    let mut inner = self.inner.lock();
    let count = inner.entries.len();
    inner.entries.clear();
    inner.spilling.clear();
    count
  }
}
