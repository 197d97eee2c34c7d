use crate::error::{CacheError, Result};

use std::{fmt, future::Future, pin::Pin};

/// A trait for spawning a future onto an asynchronous runtime.
///
/// Computations and background revalidations run on tasks spawned through
/// this seam, so a caller that stops waiting never cancels work other
/// callers depend on.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

#[derive(Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Like [`TokioSpawner::new`], but returns `None` outside of a runtime.
  pub fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }

  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

impl Default for TokioSpawner {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for TokioSpawner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("TokioSpawner").finish()
  }
}

impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}

/// Runs blocking disk work off the async workers.
///
/// Inside a Tokio runtime the closure goes to the blocking pool; outside of
/// one it simply runs on the calling thread. A panic in the closure is
/// resumed on the caller.
pub(crate) async fn run_blocking<F, R>(work: F) -> Result<R>
where
  F: FnOnce() -> Result<R> + Send + 'static,
  R: Send + 'static,
{
  let Ok(handle) = tokio::runtime::Handle::try_current() else {
    return work();
  };
  match handle.spawn_blocking(work).await {
    Ok(result) => result,
    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
    Err(_) => Err(CacheError::DiskTaskCancelled),
  }
}
