use crate::cipher::EntryCipher;
use crate::config::DurableCacheConfig;
use crate::error::{CacheError, ConfigError, Result};
use crate::handle::DurableCache;
use crate::metrics::Metrics;
use crate::persistence::PersistenceManager;
use crate::runtime::TokioSpawner;
use crate::shared::{CacheShared, Persister};
use crate::store::EntryStore;
use crate::strategy::DurabilityStrategy;
use crate::task::flusher::Flusher;
use crate::time::{Clock, SystemClock};
use crate::TaskSpawner;

use core::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// TTL applied when a call does not specify one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
/// Maximum number of entries held in memory.
pub const DEFAULT_MAX_SIZE: usize = 1000;
pub const DEFAULT_STORAGE_PATH: &str = "./.cache/fibre_durable";
/// Upper bound on the final flush performed by `dispose`.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A builder for creating [`DurableCache`] instances.
///
/// `build` is the cache's init step: it validates the options, prepares the
/// storage root, optionally loads the entries already on disk and starts the
/// periodic flusher when the strategy needs one.
pub struct DurableCacheBuilder {
  default_ttl: Duration,
  max_size: usize,
  storage_path: PathBuf,
  eager_loading: bool,
  strategy: DurabilityStrategy,
  remove_corrupt_files: bool,
  shutdown_grace: Duration,
  cipher: Option<Arc<dyn EntryCipher>>,
  clock: Option<Arc<dyn Clock>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

// Manual Debug implementation for DurableCacheBuilder.
impl fmt::Debug for DurableCacheBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DurableCacheBuilder")
      .field("default_ttl", &self.default_ttl)
      .field("max_size", &self.max_size)
      .field("storage_path", &self.storage_path)
      .field("eager_loading", &self.eager_loading)
      .field("strategy", &self.strategy)
      .field("has_cipher", &self.cipher.is_some())
      .finish_non_exhaustive()
  }
}

impl Default for DurableCacheBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl DurableCacheBuilder {
  /// Creates a new `DurableCacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      default_ttl: DEFAULT_TTL,
      max_size: DEFAULT_MAX_SIZE,
      storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
      eager_loading: false,
      strategy: DurabilityStrategy::default(),
      remove_corrupt_files: true,
      shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
      cipher: None,
      clock: None,
      spawner: None,
    }
  }

  /// Creates a builder from a declarative configuration.
  pub fn from_config(config: DurableCacheConfig) -> Self {
    Self::new()
      .default_ttl(config.default_ttl)
      .max_size(config.max_size)
      .storage_path(config.storage_path)
      .eager_loading(config.eager_loading)
      .strategy(config.strategy)
      .remove_corrupt_files(config.remove_corrupt_files)
      .shutdown_grace(config.shutdown_grace)
  }

  /// Sets the TTL used when a call does not provide its own.
  pub fn default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Sets the maximum number of entries kept in memory.
  pub fn max_size(mut self, max_size: usize) -> Self {
    self.max_size = max_size;
    self
  }

  /// Sets the directory under which namespaces are persisted.
  pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.storage_path = path.into();
    self
  }

  /// Loads every entry already on disk into memory at build time.
  pub fn eager_loading(mut self, enabled: bool) -> Self {
    self.eager_loading = enabled;
    self
  }

  pub fn strategy(mut self, strategy: DurabilityStrategy) -> Self {
    self.strategy = strategy;
    self
  }

  /// Deletes entry files that fail to parse. Enabled by default.
  pub fn remove_corrupt_files(mut self, enabled: bool) -> Self {
    self.remove_corrupt_files = enabled;
    self
  }

  /// Bounds how long `dispose` waits for the final flush.
  pub fn shutdown_grace(mut self, grace: Duration) -> Self {
    self.shutdown_grace = grace;
    self
  }

  /// Encrypts every file the cache writes.
  pub fn cipher<C>(mut self, cipher: C) -> Self
  where
    C: EntryCipher,
  {
    self.cipher = Some(Arc::new(cipher));
    self
  }

  /// Replaces the wall clock. Mostly useful in tests.
  pub fn clock<C>(mut self, clock: C) -> Self
  where
    C: Clock,
  {
    self.clock = Some(Arc::new(clock));
    self
  }

  /// Sets the runtime used to run computations. Defaults to the Tokio
  /// runtime the builder is called from.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.max_size == 0 {
      return Err(ConfigError::ZeroCapacity);
    }
    if self.strategy.flush_interval() == Some(Duration::ZERO) {
      return Err(ConfigError::ZeroFlushInterval);
    }
    if self.default_ttl.is_zero() {
      return Err(ConfigError::InvalidValue {
        field: "default_ttl".into(),
        message: "must be greater than zero".into(),
      });
    }
    Ok(())
  }

  /// Builds the cache.
  ///
  /// Fails if the options are invalid, if the storage root cannot be
  /// created, if no spawner is available, or if eager loading hits a cipher
  /// failure.
  pub fn build(mut self) -> Result<DurableCache> {
    self.validate()?;

    let spawner: Arc<dyn TaskSpawner> = match self.spawner.take() {
      Some(spawner) => spawner,
      None => Arc::new(TokioSpawner::try_current().ok_or(ConfigError::SpawnerRequired)?),
    };

    fs::create_dir_all(&self.storage_path).map_err(|e| CacheError::io(&self.storage_path, e))?;

    let clock = self.clock.take().unwrap_or_else(|| Arc::new(SystemClock));
    let store = Arc::new(EntryStore::new(self.max_size));
    let metrics = Arc::new(Metrics::new());
    let persistence = Arc::new(PersistenceManager::new(
      self.storage_path.clone(),
      self.cipher.take(),
      self.remove_corrupt_files,
    ));
    let persister = Arc::new(Persister::new(store, persistence, metrics));

    if self.eager_loading {
      let loaded = eager_load(&persister, clock.now_millis())?;
      tracing::debug!(loaded, path = %self.storage_path.display(), "eager loading complete");
    }

    let flush_interval = self.strategy.flush_interval();
    let shared = Arc::new(CacheShared::new(
      Arc::clone(&persister),
      self.strategy,
      clock,
      self.default_ttl,
      spawner,
      self.shutdown_grace,
    ));

    if let Some(interval) = flush_interval {
      *shared.flusher.lock() = Some(Flusher::spawn(persister, interval));
    }

    tracing::debug!(
      strategy = shared.strategy.name(),
      max_size = self.max_size,
      path = %self.storage_path.display(),
      "durable cache built"
    );
    Ok(DurableCache { shared })
  }
}

/// Loads every namespace under the storage root into memory.
///
/// Dead entries are skipped. When the disk holds more than the store can
/// keep, the most recently accessed entries win.
fn eager_load(persister: &Persister, now: u64) -> Result<usize> {
  let mut entries = Vec::new();
  for namespace in persister.persistence.namespaces() {
    let loaded = persister.persistence.load_all_for_namespace(&namespace)?;
    entries.extend(loaded.into_iter().filter(|entry| !entry.is_dead(now)));
  }

  entries.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
  entries.truncate(persister.store.max_size());

  let count = entries.len();
  // Oldest first, so the most recent entry ends at the front of the LRU.
  for entry in entries.into_iter().rev() {
    let accessed_at = entry.last_accessed_at;
    persister.store.put(entry, accessed_at);
  }
  Ok(count)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validate_rejects_zero_capacity() {
    let err = DurableCacheBuilder::new().max_size(0).validate().unwrap_err();
    assert_eq!(err, ConfigError::ZeroCapacity);
  }

  #[test]
  fn validate_rejects_zero_interval() {
    let err = DurableCacheBuilder::new()
      .strategy(DurabilityStrategy::periodic(Duration::ZERO))
      .validate()
      .unwrap_err();
    assert_eq!(err, ConfigError::ZeroFlushInterval);
  }

  #[test]
  fn build_outside_runtime_requires_spawner() {
    let dir = tempfile::tempdir().unwrap();
    let err = DurableCacheBuilder::new()
      .storage_path(dir.path())
      .build()
      .unwrap_err();
    assert!(matches!(err, CacheError::Config(ConfigError::SpawnerRequired)));
  }
}
