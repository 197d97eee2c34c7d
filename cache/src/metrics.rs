use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;
use serde::Serialize;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,
  pub(crate) stale_hits: CachePadded<AtomicU64>,
  pub(crate) disk_hits: CachePadded<AtomicU64>,

  // --- Computations ---
  pub(crate) computes: CachePadded<AtomicU64>,
  pub(crate) compute_failures: CachePadded<AtomicU64>,
  pub(crate) revalidations: CachePadded<AtomicU64>,

  // --- Eviction ---
  pub(crate) evictions: CachePadded<AtomicU64>,

  // --- Persistence ---
  pub(crate) persisted: CachePadded<AtomicU64>,
  pub(crate) persist_failures: CachePadded<AtomicU64>,

  // --- Timestamps for Uptime ---
  created_at: Instant,
}

// Manual implementation of Default to handle the non-default `Instant`.
impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      stale_hits: CachePadded::new(AtomicU64::new(0)),
      disk_hits: CachePadded::new(AtomicU64::new(0)),
      computes: CachePadded::new(AtomicU64::new(0)),
      compute_failures: CachePadded::new(AtomicU64::new(0)),
      revalidations: CachePadded::new(AtomicU64::new(0)),
      evictions: CachePadded::new(AtomicU64::new(0)),
      persisted: CachePadded::new(AtomicU64::new(0)),
      persist_failures: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

#[inline]
pub(crate) fn incr(counter: &CachePadded<AtomicU64>) {
  counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the counters. The caller supplies
  /// the figures that live in the store rather than in the counters.
  pub(crate) fn snapshot(&self, size: usize, dirty: usize, namespaces: Vec<String>) -> CacheStats {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    CacheStats {
      size,
      hits,
      misses,
      evictions: self.evictions.load(Ordering::Relaxed),
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      namespaces,
      stale_hits: self.stale_hits.load(Ordering::Relaxed),
      disk_hits: self.disk_hits.load(Ordering::Relaxed),
      computes: self.computes.load(Ordering::Relaxed),
      compute_failures: self.compute_failures.load(Ordering::Relaxed),
      revalidations: self.revalidations.load(Ordering::Relaxed),
      persisted: self.persisted.load(Ordering::Relaxed),
      persist_failures: self.persist_failures.load(Ordering::Relaxed),
      dirty,
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's statistics.
///
/// Every `get_or_compute` call counts as exactly one hit or one miss: a hit
/// when it was answered without waiting on a computation (fresh memory,
/// stale memory under stale-while-revalidate, or disk), a miss otherwise,
/// including callers that joined someone else's computation.
#[derive(Clone, PartialEq, Serialize)]
pub struct CacheStats {
  /// The number of entries currently held in memory.
  pub size: usize,
  pub hits: u64,
  pub misses: u64,
  /// The number of entries dropped from memory by the LRU bound.
  pub evictions: u64,
  /// `hits / (hits + misses)`, or 0 before the first lookup.
  pub hit_ratio: f64,
  /// Distinct namespaces currently held in memory, sorted.
  pub namespaces: Vec<String>,
  /// Hits that were served a stale value.
  pub stale_hits: u64,
  /// Hits answered by loading an entry from disk.
  pub disk_hits: u64,
  /// Compute closures invoked, including background revalidations.
  pub computes: u64,
  pub compute_failures: u64,
  /// Background revalidations launched.
  pub revalidations: u64,
  /// Entries successfully written to disk.
  pub persisted: u64,
  /// Disk writes that failed.
  pub persist_failures: u64,
  /// Entries in memory not yet confirmed on disk.
  pub dirty: usize,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for CacheStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheStats")
      .field("size", &self.size)
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("evictions", &self.evictions)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("namespaces", &self.namespaces)
      .field("stale_hits", &self.stale_hits)
      .field("disk_hits", &self.disk_hits)
      .field("computes", &self.computes)
      .field("compute_failures", &self.compute_failures)
      .field("revalidations", &self.revalidations)
      .field("persisted", &self.persisted)
      .field("persist_failures", &self.persist_failures)
      .field("dirty", &self.dirty)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
