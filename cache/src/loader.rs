use crate::error::CacheError;

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// What every caller waiting on a computation receives.
pub(crate) type LoadResult = Result<Arc<serde_json::Value>, CacheError>;

/// The internal state of a value being loaded.
pub(crate) enum State {
  Computing,
  Complete(LoadResult),
}

/// The internal, mutex-protected core of the LoadFuture.
pub(crate) struct Inner {
  pub(crate) state: State,
  pub(crate) waiters: Vec<Waker>,
}

/// A future that represents a value being computed for the cache.
///
/// Exactly one task drives the computation; any number of callers may await
/// it concurrently and all of them observe the same result, success or
/// failure. The first completion wins; later ones are ignored.
pub(crate) struct LoadFuture {
  pub(crate) inner: Mutex<Inner>,
}

impl LoadFuture {
  /// Creates a new `LoadFuture` in the "Computing" state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: Vec::new(),
      }),
    }
  }

  /// Completes the future, waking all waiters. Returns `false` if the future
  /// had already been completed.
  pub(crate) fn complete(&self, result: LoadResult) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if let State::Complete(_) = inner.state {
        return false;
      }
      inner.state = State::Complete(result);
      std::mem::take(&mut inner.waiters)
    };
    for waker in waiters {
      waker.wake();
    }
    true
  }

  pub(crate) fn is_complete(&self) -> bool {
    matches!(self.inner.lock().state, State::Complete(_))
  }
}

impl Future for &LoadFuture {
  type Output = LoadResult;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(result) => Poll::Ready(result.clone()),
      State::Computing => {
        let waker = cx.waker();
        if !inner.waiters.iter().any(|w| w.will_wake(waker)) {
          inner.waiters.push(waker.clone());
        }
        Poll::Pending
      }
    }
  }
}
