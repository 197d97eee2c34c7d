#![allow(dead_code)]

use fibre_durable::{CacheKey, DurabilityStrategy, DurableCache, DurableCacheBuilder, ManualClock};

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tempfile::TempDir;

/// The boxed future every test compute closure returns.
pub type Compute<T> = Pin<Box<dyn Future<Output = Result<T, io::Error>> + Send>>;

/// An arbitrary fixed instant, so timestamps in tests are predictable.
pub const START_MILLIS: u64 = 1_700_000_000_000;

pub fn clock() -> ManualClock {
  ManualClock::new(START_MILLIS)
}

/// A builder rooted in `dir`, driven by `clock`, that never flushes in the
/// background unless a test picks a strategy that does.
pub fn builder(dir: &TempDir, clock: &ManualClock) -> DurableCacheBuilder {
  DurableCache::builder()
    .storage_path(dir.path())
    .clock(clock.clone())
    .strategy(DurabilityStrategy::OnShutdown)
}

pub fn build_test_cache(dir: &TempDir, clock: &ManualClock) -> DurableCache {
  builder(dir, clock).build().unwrap()
}

/// A compute closure that counts its invocations and returns `value`.
pub fn counted<T>(counter: &Arc<AtomicUsize>, value: T) -> impl FnOnce() -> Compute<T> + Send + 'static
where
  T: Send + 'static,
{
  let counter = counter.clone();
  move || {
    Box::pin(async move {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(value)
    })
  }
}

/// Like [`counted`], but takes `delay` to produce its value.
pub fn slow_counted<T>(counter: &Arc<AtomicUsize>, value: T, delay: Duration) -> impl FnOnce() -> Compute<T> + Send + 'static
where
  T: Send + 'static,
{
  let counter = counter.clone();
  move || {
    Box::pin(async move {
      tokio::time::sleep(delay).await;
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(value)
    })
  }
}

/// A compute closure that counts its invocations and fails after `delay`.
pub fn failing<T>(counter: &Arc<AtomicUsize>, delay: Duration) -> impl FnOnce() -> Compute<T> + Send + 'static
where
  T: Send + 'static,
{
  let counter = counter.clone();
  move || {
    Box::pin(async move {
      tokio::time::sleep(delay).await;
      counter.fetch_add(1, Ordering::SeqCst);
      Err(io::Error::new(io::ErrorKind::Other, "upstream returned 503"))
    })
  }
}

/// The file an entry for `(namespace, args)` is persisted to.
pub fn entry_file<A: Serialize + ?Sized>(root: &Path, namespace: &str, args: &A) -> PathBuf {
  let key = CacheKey::derive(namespace, args).unwrap();
  root.join(namespace).join(format!("{}.json", key.digest()))
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  condition()
}
