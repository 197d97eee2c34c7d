use std::collections::HashSet;
use std::time::Duration;

/// The default sweep interval for periodic and hybrid persistence.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// What the engine should do with a freshly written entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistAdvice {
  /// Write it to disk before the caller gets its value back.
  Now,
  /// Leave it dirty; the periodic flusher will pick it up.
  Deferred,
  /// Leave it dirty until the cache is disposed.
  AtShutdown,
}

/// When in-memory writes reach disk.
///
/// The strategy is pure policy: it never touches the store or the disk, it
/// only answers the engine's questions. Switching strategies changes no part
/// of the get-or-compute algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurabilityStrategy {
  /// Never persist on write; a recurring sweep flushes dirty entries.
  Periodic { interval: Duration },
  /// Persist synchronously on every write.
  WriteThrough,
  /// Persist nothing until the cache is disposed, then flush once.
  OnShutdown,
  /// Write-through for the critical namespaces, periodic for the rest.
  Hybrid {
    critical_namespaces: HashSet<String>,
    interval: Duration,
  },
}

impl Default for DurabilityStrategy {
  fn default() -> Self {
    DurabilityStrategy::Hybrid {
      critical_namespaces: HashSet::new(),
      interval: DEFAULT_FLUSH_INTERVAL,
    }
  }
}

impl DurabilityStrategy {
  pub fn periodic(interval: Duration) -> Self {
    DurabilityStrategy::Periodic { interval }
  }

  pub fn hybrid<I, S>(critical_namespaces: I, interval: Duration) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    DurabilityStrategy::Hybrid {
      critical_namespaces: critical_namespaces.into_iter().map(Into::into).collect(),
      interval,
    }
  }

  /// Whether a write to `namespace` must reach disk before returning.
  pub fn should_persist_on_write(&self, namespace: &str) -> bool {
    match self {
      DurabilityStrategy::WriteThrough => true,
      DurabilityStrategy::Hybrid {
        critical_namespaces,
        ..
      } => critical_namespaces.contains(namespace),
      DurabilityStrategy::Periodic { .. } | DurabilityStrategy::OnShutdown => false,
    }
  }

  /// Whether a recurring flusher should run at all.
  pub fn should_persist_periodically(&self) -> bool {
    self.flush_interval().is_some()
  }

  /// The sweep interval, if this strategy uses one.
  pub fn flush_interval(&self) -> Option<Duration> {
    match self {
      DurabilityStrategy::Periodic { interval } | DurabilityStrategy::Hybrid { interval, .. } => {
        Some(*interval)
      }
      DurabilityStrategy::WriteThrough | DurabilityStrategy::OnShutdown => None,
    }
  }

  /// Whether dirty entries are flushed when the cache is disposed.
  ///
  /// Every variant flushes on shutdown: for write-through this only catches
  /// writes whose synchronous save failed.
  pub fn on_shutdown(&self) -> bool {
    true
  }

  /// Combines the capability checks into a single decision for a write.
  pub fn advise(&self, namespace: &str) -> PersistAdvice {
    if self.should_persist_on_write(namespace) {
      PersistAdvice::Now
    } else if self.should_persist_periodically() {
      PersistAdvice::Deferred
    } else {
      PersistAdvice::AtShutdown
    }
  }

  pub(crate) fn name(&self) -> &'static str {
    match self {
      DurabilityStrategy::Periodic { .. } => "periodic",
      DurabilityStrategy::WriteThrough => "write_through",
      DurabilityStrategy::OnShutdown => "on_shutdown",
      DurabilityStrategy::Hybrid { .. } => "hybrid",
    }
  }
}
