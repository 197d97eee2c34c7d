use std::time::Duration;

/// Per-call options for [`DurableCache::get_or_compute`](crate::DurableCache::get_or_compute).
///
/// Fields left as `None` fall back to the cache's configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputeOptions {
  /// How long a freshly computed value is served as a plain hit.
  pub ttl: Option<Duration>,
  /// Serve values that are past their TTL but inside their stale window,
  /// refreshing them in the background.
  pub stale_while_revalidate: bool,
  /// The length of the stale window that follows the TTL.
  pub stale_time: Option<Duration>,
}

impl ComputeOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  /// Enables stale-while-revalidate with the given stale window.
  pub fn stale_while_revalidate(mut self, stale_time: Duration) -> Self {
    self.stale_while_revalidate = true;
    self.stale_time = Some(stale_time);
    self
  }
}
