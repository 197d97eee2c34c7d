use crate::shared::Persister;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct StopSignal {
  stopped: Mutex<bool>,
  condvar: Condvar,
}

/// The background thread that flushes dirty entries on a fixed interval.
///
/// It sleeps on a condition variable rather than a plain `sleep` so that
/// `stop` takes effect immediately instead of after the current interval.
pub(crate) struct Flusher {
  handle: Option<JoinHandle<()>>,
  signal: Arc<StopSignal>,
}

impl Flusher {
  /// Spawns a new flusher thread.
  pub(crate) fn spawn(persister: Arc<Persister>, interval: Duration) -> Self {
    let signal = Arc::new(StopSignal::default());
    let thread_signal = signal.clone();

    let handle = thread::Builder::new()
      .name("fibre-durable-flusher".into())
      .spawn(move || Self::run(&persister, &thread_signal, interval))
      .map_err(|e| {
        // Dirty entries are still flushed on dispose.
        tracing::warn!(error = %e, "failed to spawn flusher thread; periodic flushing disabled");
      })
      .ok();

    Self { handle, signal }
  }

  fn run(persister: &Persister, signal: &StopSignal, interval: Duration) {
    loop {
      {
        let mut stopped = signal.stopped.lock();
        if !*stopped {
          signal.condvar.wait_for(&mut stopped, interval);
        }
        if *stopped {
          break;
        }
      }
      Self::flush_once(persister);
    }
    tracing::trace!("flusher stopped");
  }

  fn flush_once(persister: &Persister) {
    match persister.flush_dirty() {
      Ok(report) if report.saved > 0 || report.failed > 0 => {
        tracing::debug!(saved = report.saved, failed = report.failed, "periodic flush");
      }
      Ok(_) => {}
      Err(e) => {
        tracing::error!(error = %e, "periodic flush aborted");
      }
    }
  }

  /// Signals the flusher thread to stop without waiting for it.
  pub(crate) fn stop(self) {
    self.signal();
  }

  /// Signals the flusher thread to stop and waits for an in-progress flush
  /// to finish.
  pub(crate) fn stop_and_join(self) {
    self.signal();
    if let Some(handle) = self.handle {
      if handle.join().is_err() {
        tracing::warn!("flusher thread panicked");
      }
    }
  }

  fn signal(&self) {
    *self.signal.stopped.lock() = true;
    self.signal.condvar.notify_all();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entry::CacheEntry;
  use crate::key::CacheKey;
  use crate::metrics::Metrics;
  use crate::persistence::PersistenceManager;
  use crate::store::EntryStore;
  use serde_json::json;
  use std::time::Instant;

  fn persister(root: &std::path::Path) -> Arc<Persister> {
    Arc::new(Persister::new(
      Arc::new(EntryStore::new(16)),
      Arc::new(PersistenceManager::new(root, None, true)),
      Arc::new(Metrics::new()),
    ))
  }

  #[test]
  fn flushes_dirty_entries_on_interval() {
    let dir = tempfile::tempdir().unwrap();
    let p = persister(dir.path());
    let key = CacheKey::derive("search", &json!({ "q": "x" })).unwrap();
    p.store.put(CacheEntry::new(key.clone(), json!(1), 0, 60_000, 0), 0);

    let flusher = Flusher::spawn(p.clone(), Duration::from_millis(20));
    let deadline = Instant::now() + Duration::from_secs(5);
    while p.store.dirty_count() > 0 && Instant::now() < deadline {
      thread::sleep(Duration::from_millis(5));
    }
    flusher.stop_and_join();

    assert_eq!(p.store.dirty_count(), 0);
    assert!(p.persistence.entry_path(&key).is_file());
  }

  #[test]
  fn stop_is_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let flusher = Flusher::spawn(persister(dir.path()), Duration::from_secs(3600));
    let start = Instant::now();
    flusher.stop_and_join();
    assert!(start.elapsed() < Duration::from_secs(5));
  }
}
