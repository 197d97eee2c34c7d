use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of wall-clock time for the cache.
///
/// Timestamps are milliseconds since the Unix epoch so that entries written
/// to disk keep their meaning across process restarts.
pub trait Clock: Send + Sync + 'static {
  fn now_millis(&self) -> u64;
}

/// The default clock, backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now_millis(&self) -> u64 {
    SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis() as u64)
      // A clock set before 1970 is treated as the epoch itself.
      .unwrap_or(0)
  }
}

/// A manually driven clock. Cloned handles share the same time.
///
/// Useful for exercising TTL and stale-while-revalidate windows without
/// sleeping.
#[derive(Clone, Default)]
pub struct ManualClock {
  now: Arc<AtomicU64>,
}

impl ManualClock {
  /// Creates a clock frozen at `start_millis`.
  pub fn new(start_millis: u64) -> Self {
    Self {
      now: Arc::new(AtomicU64::new(start_millis)),
    }
  }

  /// Creates a clock frozen at the current system time.
  pub fn starting_now() -> Self {
    Self::new(SystemClock.now_millis())
  }

  /// Moves the clock forward.
  pub fn advance(&self, by: Duration) {
    self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
  }

  pub fn set(&self, millis: u64) {
    self.now.store(millis, Ordering::SeqCst);
  }
}

impl fmt::Debug for ManualClock {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManualClock")
      .field("now", &self.now.load(Ordering::SeqCst))
      .finish()
  }
}

impl Clock for ManualClock {
  #[inline]
  fn now_millis(&self) -> u64 {
    self.now.load(Ordering::SeqCst)
  }
}

/// Converts a `Duration` to whole milliseconds, saturating at `u64::MAX`.
#[inline]
pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
  u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
