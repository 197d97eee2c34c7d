use crate::entry::{CacheEntry, Freshness};
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::loader::{LoadFuture, LoadResult};
use crate::metrics::{incr, Metrics};
use crate::persistence::PersistenceManager;
use crate::runtime::run_blocking;
use crate::store::EntryStore;
use crate::strategy::{DurabilityStrategy, PersistAdvice};
use crate::task::flusher::Flusher;
use crate::time::{duration_to_millis, Clock};
use crate::TaskSpawner;

use std::fmt;
use std::future::Future;
use std::hash::BuildHasher;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use ahash::{HashMap, RandomState};
use parking_lot::{Mutex, MutexGuard};

/// A type-erased computation producing the JSON form of a value.
pub(crate) type ComputeTask = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// The outcome of a flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
  /// Entries written to disk during the pass.
  pub saved: usize,
  /// Entries whose write failed. They stay dirty and are retried later.
  pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PersistOutcome {
  Saved,
  /// Nothing to write: the entry is gone or already clean.
  Clean,
  Failed,
}

fn stripe_count() -> usize {
  (num_cpus::get() * 4).next_power_of_two()
}

/// Moves dirty entries from the store to disk.
///
/// Every write for a key happens under that key's stripe lock and always
/// writes the latest dirty snapshot, so concurrent flushes, write-through
/// saves and invalidations of one key are serialized and an older version
/// can never overwrite a newer one.
pub(crate) struct Persister {
  pub(crate) store: Arc<EntryStore>,
  pub(crate) persistence: Arc<PersistenceManager>,
  pub(crate) metrics: Arc<Metrics>,
  stripes: Box<[Mutex<()>]>,
  hasher: RandomState,
}

impl Persister {
  pub(crate) fn new(store: Arc<EntryStore>, persistence: Arc<PersistenceManager>, metrics: Arc<Metrics>) -> Self {
    Self {
      store,
      persistence,
      metrics,
      stripes: (0..stripe_count()).map(|_| Mutex::new(())).collect(),
      hasher: RandomState::new(),
    }
  }

  fn lock(&self, key: &CacheKey) -> MutexGuard<'_, ()> {
    let index = self.hasher.hash_one(key) as usize & (self.stripes.len() - 1);
    self.stripes[index].lock()
  }

  /// Writes the current dirty version of `key`, if any.
  ///
  /// Disk failures are logged and reported as `Failed`; only cipher failures
  /// are returned as errors.
  pub(crate) fn persist_key(&self, key: &CacheKey) -> Result<PersistOutcome> {
    let _guard = self.lock(key);
    let Some(snapshot) = self.store.dirty_snapshot(key) else {
      return Ok(PersistOutcome::Clean);
    };
    match self.save(&snapshot)? {
      PersistOutcome::Saved => {
        self.store.mark_clean(key, snapshot.version);
        Ok(PersistOutcome::Saved)
      }
      other => Ok(other),
    }
  }

  /// Writes every dirty entry. Stops at the first cipher failure.
  pub(crate) fn flush_dirty(&self) -> Result<FlushReport> {
    let mut report = FlushReport::default();
    for key in self.store.dirty_keys() {
      match self.persist_key(&key)? {
        PersistOutcome::Saved => report.saved += 1,
        PersistOutcome::Failed => report.failed += 1,
        PersistOutcome::Clean => {}
      }
    }
    Ok(report)
  }

  /// Persists dirty entries that the LRU bound pushed out of memory so that
  /// eviction never loses data that has not reached disk yet.
  ///
  /// An entry invalidated, cleared or rewritten after its eviction is
  /// skipped: the store no longer holds a pending spill for it.
  pub(crate) fn spill(&self, evicted: Vec<CacheEntry>) -> Result<()> {
    let mut first_error = None;
    for entry in evicted.into_iter().filter(CacheEntry::is_dirty) {
      let _guard = self.lock(&entry.key);
      if !self.store.claim_spill(&entry.key, entry.version) {
        tracing::trace!(key = %entry.key, "evicted entry superseded; not spilling");
        continue;
      }
      tracing::debug!(key = %entry.key, "spilling evicted dirty entry");
      if let Err(e) = self.save(&entry) {
        first_error.get_or_insert(e);
      }
    }
    first_error.map_or(Ok(()), Err)
  }

  /// Removes the file for `key`.
  pub(crate) fn remove(&self, key: &CacheKey) -> bool {
    let _guard = self.lock(key);
    self.persistence.invalidate(key)
  }

  /// Drops every entry from memory and disk while no write is in progress.
  pub(crate) fn clear_all(&self) -> usize {
    let _guards: Vec<_> = self.stripes.iter().map(|stripe| stripe.lock()).collect();
    let dropped = self.store.clear();
    self.persistence.clear_all();
    dropped
  }

  fn save(&self, entry: &CacheEntry) -> Result<PersistOutcome> {
    match self.persistence.save(entry) {
      Ok(()) => {
        incr(&self.metrics.persisted);
        Ok(PersistOutcome::Saved)
      }
      Err(e) if e.is_encryption() => {
        incr(&self.metrics.persist_failures);
        Err(e)
      }
      Err(e) => {
        incr(&self.metrics.persist_failures);
        tracing::warn!(key = %entry.key, error = %e, "failed to persist entry; keeping it in memory only");
        Ok(PersistOutcome::Failed)
      }
    }
  }
}

/// The internal, thread-safe core of the cache.
pub(crate) struct CacheShared {
  pub(crate) persister: Arc<Persister>,
  pub(crate) strategy: DurabilityStrategy,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) default_ttl: Duration,
  pub(crate) spawner: Arc<dyn TaskSpawner>,
  pub(crate) pending: Box<[Mutex<HashMap<CacheKey, Arc<LoadFuture>>>]>,
  pending_hasher: RandomState,
  pub(crate) flusher: Mutex<Option<Flusher>>,
  pub(crate) disposed: AtomicBool,
  pub(crate) shutdown_grace: Duration,
}

impl fmt::Debug for CacheShared {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("strategy", &self.strategy)
      .field("default_ttl", &self.default_ttl)
      .field("store", &self.persister.store)
      .field("persistence", &self.persister.persistence)
      .finish_non_exhaustive()
  }
}

impl Drop for CacheShared {
  fn drop(&mut self) {
    if let Some(flusher) = self.flusher.get_mut().take() {
      flusher.stop();
    }
  }
}

impl CacheShared {
  pub(crate) fn new(
    persister: Arc<Persister>,
    strategy: DurabilityStrategy,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    spawner: Arc<dyn TaskSpawner>,
    shutdown_grace: Duration,
  ) -> Self {
    Self {
      persister,
      strategy,
      clock,
      default_ttl,
      spawner,
      pending: (0..stripe_count()).map(|_| Mutex::new(HashMap::default())).collect(),
      pending_hasher: RandomState::new(),
      flusher: Mutex::new(None),
      disposed: AtomicBool::new(false),
      shutdown_grace,
    }
  }

  #[inline]
  pub(crate) fn store(&self) -> &EntryStore {
    &self.persister.store
  }

  #[inline]
  pub(crate) fn metrics(&self) -> &Metrics {
    &self.persister.metrics
  }

  #[inline]
  pub(crate) fn now(&self) -> u64 {
    self.clock.now_millis()
  }

  pub(crate) fn pending_for(&self, key: &CacheKey) -> &Mutex<HashMap<CacheKey, Arc<LoadFuture>>> {
    let index = self.pending_hasher.hash_one(key) as usize & (self.pending.len() - 1);
    &self.pending[index]
  }

  /// Clears the in-flight registration for `key` if it still belongs to
  /// `future`.
  pub(crate) fn finish_pending(&self, key: &CacheKey, future: &Arc<LoadFuture>) {
    let mut pending = self.pending_for(key).lock();
    if pending.get(key).is_some_and(|f| Arc::ptr_eq(f, future)) {
      pending.remove(key);
    }
  }

  /// Stores a computed value, spills what the write evicted and applies the
  /// durability strategy. Returns the stored value.
  pub(crate) async fn store_computed(
    &self,
    key: &CacheKey,
    value: serde_json::Value,
    ttl: Duration,
    stale_ttl: Duration,
  ) -> Result<Arc<serde_json::Value>> {
    let now = self.now();
    let entry = CacheEntry::new(
      key.clone(),
      value,
      now,
      duration_to_millis(ttl),
      duration_to_millis(stale_ttl),
    );
    let value = entry.shared_value();
    let (_, evicted) = self.store().put(entry, now);
    self.count_evicted(&evicted);

    let persist_now = match self.strategy.advise(key.namespace()) {
      PersistAdvice::Now => true,
      PersistAdvice::Deferred | PersistAdvice::AtShutdown => {
        tracing::trace!(key = %key, strategy = self.strategy.name(), "entry left dirty");
        false
      }
    };
    if evicted.is_empty() && !persist_now {
      return Ok(value);
    }

    let persister = Arc::clone(&self.persister);
    let key = key.clone();
    run_blocking(move || {
      persister.spill(evicted)?;
      if persist_now {
        persister.persist_key(&key)?;
      }
      Ok(())
    })
    .await?;
    Ok(value)
  }

  /// Inserts an entry read from disk. It is already durable, so it stays
  /// clean.
  async fn store_loaded(&self, entry: CacheEntry) -> Result<()> {
    let now = self.now();
    let (_, evicted) = self.store().put(entry, now);
    self.count_evicted(&evicted);
    if evicted.is_empty() {
      return Ok(());
    }
    let persister = Arc::clone(&self.persister);
    run_blocking(move || persister.spill(evicted)).await
  }

  fn count_evicted(&self, evicted: &[CacheEntry]) {
    if !evicted.is_empty() {
      self
        .metrics()
        .evictions
        .fetch_add(evicted.len() as u64, std::sync::atomic::Ordering::Relaxed);
    }
  }

  /// Reads `key` from disk and, if it can be served, inserts it into the
  /// store. Expired files are reported as absent.
  async fn load_from_disk(
    &self,
    key: &CacheKey,
    allow_stale: bool,
  ) -> Result<Option<(Arc<serde_json::Value>, Freshness)>> {
    let persister = Arc::clone(&self.persister);
    let lookup = key.clone();
    let Some(entry) = run_blocking(move || persister.persistence.load(&lookup)).await? else {
      return Ok(None);
    };

    let freshness = entry.freshness(self.now(), allow_stale);
    let metrics = self.metrics();
    match freshness {
      Freshness::Fresh => {
        tracing::debug!(key = %key, "disk hit");
      }
      Freshness::Stale => {
        tracing::debug!(key = %key, "stale disk hit");
        incr(&metrics.stale_hits);
      }
      Freshness::Expired => {
        tracing::trace!(key = %key, "disk entry expired");
        return Ok(None);
      }
    }
    incr(&metrics.hits);
    incr(&metrics.disk_hits);

    let value = entry.shared_value();
    self.store_loaded(entry).await?;
    Ok(Some((value, freshness)))
  }

  /// Settles a lookup that memory could not answer: disk first, then
  /// compute.
  ///
  /// `leader` receives what the caller that registered `future` should
  /// return. It is the same as what `future` receives, except for a stale
  /// disk entry: the leader gets the stale value at once while `future`
  /// waits for the revalidation.
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn spawn_lead(
    self: &Arc<Self>,
    key: CacheKey,
    future: Arc<LoadFuture>,
    leader: Arc<LoadFuture>,
    work: ComputeTask,
    allow_stale: bool,
    ttl: Duration,
    stale_ttl: Duration,
  ) {
    let guard = AbortGuard {
      shared: Arc::clone(self),
      key,
      future,
      leader: Some(leader),
    };

    let task = async move {
      let shared = Arc::clone(&guard.shared);
      match shared.load_from_disk(&guard.key, allow_stale).await {
        Ok(Some((value, Freshness::Stale))) => {
          guard.complete_leader(Ok(value));
          shared.run_compute(&guard, work, ttl, stale_ttl, true).await;
        }
        Ok(Some((value, _))) => {
          shared.finish_pending(&guard.key, &guard.future);
          guard.complete(Ok(value));
        }
        Ok(None) => {
          incr(&shared.metrics().misses);
          tracing::debug!(key = %guard.key, "miss; computing");
          shared.run_compute(&guard, work, ttl, stale_ttl, false).await;
        }
        Err(e) => {
          if e.is_encryption() {
            tracing::error!(key = %guard.key, error = %e, "failed to decrypt entry file");
          }
          shared.finish_pending(&guard.key, &guard.future);
          guard.complete(Err(e));
        }
      }
    };

    self.spawner.spawn(Box::pin(task));
  }

  /// Runs `work` on a spawned task and completes `future` with its result.
  ///
  /// If the task dies before finishing, every waiter receives
  /// [`CacheError::TaskAborted`] instead of hanging.
  pub(crate) fn spawn_compute(
    self: &Arc<Self>,
    key: CacheKey,
    future: Arc<LoadFuture>,
    work: ComputeTask,
    ttl: Duration,
    stale_ttl: Duration,
    revalidation: bool,
  ) {
    let guard = AbortGuard {
      shared: Arc::clone(self),
      key,
      future,
      leader: None,
    };

    let task = async move {
      let shared = Arc::clone(&guard.shared);
      shared.run_compute(&guard, work, ttl, stale_ttl, revalidation).await;
    };

    self.spawner.spawn(Box::pin(task));
  }

  async fn run_compute(
    &self,
    guard: &AbortGuard,
    work: ComputeTask,
    ttl: Duration,
    stale_ttl: Duration,
    revalidation: bool,
  ) {
    incr(&self.metrics().computes);
    if revalidation {
      incr(&self.metrics().revalidations);
    }

    let result = match work.await {
      Ok(value) => self.store_computed(&guard.key, value, ttl, stale_ttl).await,
      Err(e) => Err(e),
    };
    self.finish_pending(&guard.key, &guard.future);

    if let Err(e) = &result {
      if e.is_compute() {
        incr(&self.metrics().compute_failures);
      }
      if revalidation {
        tracing::warn!(key = %guard.key, error = %e, "background revalidation failed; stale value kept");
      } else if e.is_encryption() {
        tracing::error!(key = %guard.key, error = %e, "failed to encrypt computed entry");
      } else {
        tracing::debug!(key = %guard.key, error = %e, "compute failed");
      }
    }
    guard.complete(result);
  }
}

struct AbortGuard {
  shared: Arc<CacheShared>,
  key: CacheKey,
  future: Arc<LoadFuture>,
  leader: Option<Arc<LoadFuture>>,
}

impl AbortGuard {
  fn complete_leader(&self, result: LoadResult) {
    if let Some(leader) = &self.leader {
      leader.complete(result);
    }
  }

  fn complete(&self, result: LoadResult) {
    self.complete_leader(result.clone());
    self.future.complete(result);
  }
}

impl Drop for AbortGuard {
  fn drop(&mut self) {
    let leader_done = self.leader.as_ref().map_or(true, |leader| leader.is_complete());
    if self.future.is_complete() && leader_done {
      return;
    }
    tracing::warn!(key = %self.key, "compute task dropped before completing");
    self.shared.finish_pending(&self.key, &self.future);
    self.complete(Err(CacheError::TaskAborted {
      namespace: self.key.namespace().to_string(),
    }));
  }
}
