use crate::builder::DurableCacheBuilder;
use crate::entry::Freshness;
use crate::error::{CacheError, ComputeError, Result};
use crate::key::CacheKey;
use crate::loader::LoadFuture;
use crate::metrics::{incr, CacheStats};
use crate::options::ComputeOptions;
use crate::runtime::run_blocking;
use crate::shared::{CacheShared, ComputeTask, FlushReport};
use crate::strategy::DurabilityStrategy;

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// How the leader of a lookup settled it.
enum Lead {
  /// A usable value was found; the in-flight registration is done.
  Hit(Arc<serde_json::Value>),
  /// A stale value was found and a revalidation now owns the registration.
  Stale(Arc<serde_json::Value>),
  /// A task now settles the lookup from disk or by computing. The caller
  /// waits on the future it carries.
  Loading(Arc<LoadFuture>),
}

/// A durable, namespaced get-or-compute cache.
///
/// `DurableCache` is a cheap handle: clones share the same memory tier, disk
/// tier and background flusher. Values are stored as JSON so a single cache
/// can serve results of any `Serialize + DeserializeOwned` type.
#[derive(Clone)]
pub struct DurableCache {
  pub(crate) shared: Arc<CacheShared>,
}

impl fmt::Debug for DurableCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DurableCache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl DurableCache {
  pub fn builder() -> DurableCacheBuilder {
    DurableCacheBuilder::new()
  }

  /// Returns the cached value for `(namespace, args)`, computing it with
  /// `compute` if neither memory nor disk can serve it.
  ///
  /// Concurrent calls for the same key share a single computation; a compute
  /// failure is returned to every one of them and is not cached. With
  /// stale-while-revalidate enabled, a value past its TTL but inside its
  /// stale window is returned immediately while at most one background
  /// computation refreshes it.
  ///
  /// The computation runs on its own task, so it completes and is cached even
  /// if this call is dropped.
  pub async fn get_or_compute<A, T, F, Fut, E>(
    &self,
    namespace: &str,
    args: &A,
    compute: F,
    options: ComputeOptions,
  ) -> Result<T>
  where
    A: Serialize + ?Sized,
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync>> + 'static,
  {
    let key = CacheKey::derive(namespace, args)?;
    let shared = &self.shared;
    let allow_stale = options.stale_while_revalidate;
    let ttl = options.ttl.unwrap_or(shared.default_ttl);
    let stale_ttl = if allow_stale {
      options.stale_time.unwrap_or(ttl)
    } else {
      Duration::ZERO
    };
    let work = into_task(compute);

    // 1. Memory.
    if let Some(read) = shared.store().read(&key, shared.now(), allow_stale) {
      match read.freshness {
        Freshness::Fresh => {
          incr(&shared.metrics().hits);
          tracing::trace!(key = %key, "memory hit");
          return decode(read.entry.value());
        }
        Freshness::Stale => {
          incr(&shared.metrics().hits);
          incr(&shared.metrics().stale_hits);
          tracing::trace!(key = %key, "stale hit");
          self.revalidate(&key, work, ttl, stale_ttl);
          return decode(read.entry.value());
        }
        Freshness::Expired => {}
      }
    }

    // 2. Join a computation in flight, or become its leader.
    let (future, is_leader) = {
      let mut pending = shared.pending_for(&key).lock();
      match pending.get(&key) {
        Some(future) => (Arc::clone(future), false),
        None => {
          let future = Arc::new(LoadFuture::new());
          pending.insert(key.clone(), Arc::clone(&future));
          (future, true)
        }
      }
    };

    let waiter = if is_leader {
      // No await point between registering and handing the lead off, so a
      // dropped caller can never leave the registration orphaned.
      match self.lead(&key, &future, work, allow_stale, ttl, stale_ttl) {
        Lead::Hit(value) => {
          shared.finish_pending(&key, &future);
          future.complete(Ok(Arc::clone(&value)));
          return decode(&value);
        }
        Lead::Stale(value) => return decode(&value),
        Lead::Loading(leader) => leader,
      }
    } else {
      incr(&shared.metrics().misses);
      tracing::trace!(key = %key, "joining in-flight computation");
      future
    };

    let value = (&*waiter).await?;
    shared.store().touch(&key, shared.now());
    decode(&value)
  }

  // 3. Memory again, then hand disk and compute to a task.
  fn lead(
    &self,
    key: &CacheKey,
    future: &Arc<LoadFuture>,
    work: ComputeTask,
    allow_stale: bool,
    ttl: Duration,
    stale_ttl: Duration,
  ) -> Lead {
    let shared = &self.shared;
    let metrics = shared.metrics();

    // A computation may have finished between the first read and the
    // registration.
    if let Some(read) = shared.store().read(key, shared.now(), allow_stale) {
      match read.freshness {
        Freshness::Fresh => {
          incr(&metrics.hits);
          return Lead::Hit(read.entry.shared_value());
        }
        Freshness::Stale => {
          incr(&metrics.hits);
          incr(&metrics.stale_hits);
          shared.spawn_compute(key.clone(), Arc::clone(future), work, ttl, stale_ttl, true);
          return Lead::Stale(read.entry.shared_value());
        }
        Freshness::Expired => {}
      }
    }

    let leader = Arc::new(LoadFuture::new());
    shared.spawn_lead(
      key.clone(),
      Arc::clone(future),
      Arc::clone(&leader),
      work,
      allow_stale,
      ttl,
      stale_ttl,
    );
    Lead::Loading(leader)
  }

  /// Starts a background refresh of `key` unless one is already running.
  fn revalidate(&self, key: &CacheKey, work: ComputeTask, ttl: Duration, stale_ttl: Duration) {
    let future = {
      let mut pending = self.shared.pending_for(key).lock();
      if pending.contains_key(key) {
        return;
      }
      let future = Arc::new(LoadFuture::new());
      pending.insert(key.clone(), Arc::clone(&future));
      future
    };
    tracing::debug!(key = %key, "revalidating stale entry");
    self
      .shared
      .spawn_compute(key.clone(), future, work, ttl, stale_ttl, true);
  }

  /// Returns the in-memory value for `(namespace, args)` if it is fresh.
  ///
  /// Neither recency nor statistics are updated, and disk is not consulted.
  pub fn peek<A, T>(&self, namespace: &str, args: &A) -> Result<Option<T>>
  where
    A: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let key = CacheKey::derive(namespace, args)?;
    match self.shared.store().get(&key) {
      Some(entry) if entry.freshness(self.shared.now(), false) == Freshness::Fresh => {
        decode(entry.value()).map(Some)
      }
      _ => Ok(None),
    }
  }

  /// Removes the entry for `(namespace, args)` from memory and disk.
  /// Returns `true` if anything was removed.
  ///
  /// A computation already in flight for the key is not cancelled and will
  /// store its result when it completes.
  pub fn invalidate<A>(&self, namespace: &str, args: &A) -> Result<bool>
  where
    A: Serialize + ?Sized,
  {
    let key = CacheKey::derive(namespace, args)?;
    let in_memory = self.shared.store().delete(&key).is_some();
    let on_disk = self.shared.persister.remove(&key);
    tracing::debug!(key = %key, in_memory, on_disk, "invalidated");
    Ok(in_memory || on_disk)
  }

  /// Removes every entry from memory and disk.
  pub fn clear(&self) {
    let dropped = self.shared.persister.clear_all();
    tracing::debug!(dropped, "cache cleared");
  }

  /// Writes every dirty entry to disk now, regardless of the strategy.
  ///
  /// Disk failures are counted in the report and the affected entries stay
  /// dirty; a cipher failure aborts the flush with an error.
  pub async fn persist_to_disk(&self) -> Result<FlushReport> {
    let persister = Arc::clone(&self.shared.persister);
    run_blocking(move || persister.flush_dirty()).await
  }

  /// Stops the periodic flusher and performs the final flush.
  ///
  /// Every strategy flushes its dirty entries here, including entries a
  /// failed write-through left behind. The flush is bounded by the configured shutdown grace period and its
  /// failures are logged, never returned. Calling `dispose` more than once
  /// is a no-op. The cache stays usable afterwards, but nothing is flushed
  /// in the background anymore.
  pub async fn dispose(&self) {
    if self.shared.disposed.swap(true, Ordering::AcqRel) {
      return;
    }

    let flusher = self.shared.flusher.lock().take();
    let persister = Arc::clone(&self.shared.persister);
    let final_flush = run_blocking(move || {
      if let Some(flusher) = flusher {
        flusher.stop_and_join();
      }
      persister.flush_dirty()
    });

    match tokio::time::timeout(self.shared.shutdown_grace, final_flush).await {
      Ok(Ok(report)) if report.failed > 0 => {
        tracing::warn!(saved = report.saved, failed = report.failed, "final flush incomplete");
      }
      Ok(Ok(report)) => {
        tracing::debug!(saved = report.saved, "final flush complete");
      }
      Ok(Err(e)) => {
        tracing::error!(error = %e, "final flush aborted");
      }
      Err(_) => {
        tracing::warn!(
          grace = ?self.shared.shutdown_grace,
          "final flush exceeded the shutdown grace period"
        );
      }
    }
  }

  pub fn is_disposed(&self) -> bool {
    self.shared.disposed.load(Ordering::Acquire)
  }

  /// Returns a point-in-time snapshot of the cache's statistics.
  pub fn stats(&self) -> CacheStats {
    let store = self.shared.store();
    self
      .shared
      .metrics()
      .snapshot(store.size(), store.dirty_count(), store.namespaces())
  }

  pub fn strategy(&self) -> &DurabilityStrategy {
    &self.shared.strategy
  }

  pub fn storage_path(&self) -> &Path {
    self.shared.persister.persistence.root()
  }
}

fn into_task<T, F, Fut, E>(compute: F) -> ComputeTask
where
  T: Serialize + Send + 'static,
  F: FnOnce() -> Fut + Send + 'static,
  Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
  E: Into<Box<dyn StdError + Send + Sync>> + 'static,
{
  Box::pin(async move {
    let value = compute()
      .await
      .map_err(|e| CacheError::Compute(ComputeError::new(e)))?;
    Ok(serde_json::to_value(&value)?)
  })
}

fn decode<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T> {
  Ok(T::deserialize(value)?)
}
