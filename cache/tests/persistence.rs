mod common;

use common::*;
use fibre_durable::{CipherError, ComputeOptions, DurabilityStrategy, EntryCipher};

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use serde_json::json;

struct XorCipher(u8);

impl EntryCipher for XorCipher {
  fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    Ok(plaintext.iter().map(|b| b ^ self.0).collect())
  }

  fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    Ok(ciphertext.iter().map(|b| b ^ self.0).collect())
  }
}

struct LockedVault;

impl EntryCipher for LockedVault {
  fn encrypt(&self, _: &[u8]) -> Result<Vec<u8>, CipherError> {
    Err(CipherError::encrypt("vault is sealed"))
  }

  fn decrypt(&self, _: &[u8]) -> Result<Vec<u8>, CipherError> {
    Err(CipherError::decrypt("vault is sealed"))
  }
}

/// Passes bytes through unchanged and records which threads touched them.
#[derive(Clone, Default)]
struct ThreadRecorder(Arc<Mutex<Vec<ThreadId>>>);

impl ThreadRecorder {
  fn threads(&self) -> Vec<ThreadId> {
    self.0.lock().unwrap().clone()
  }
}

impl EntryCipher for ThreadRecorder {
  fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    self.0.lock().unwrap().push(thread::current().id());
    Ok(plaintext.to_vec())
  }

  fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    self.0.lock().unwrap().push(thread::current().id());
    Ok(ciphertext.to_vec())
  }
}

#[tokio::test]
async fn test_disk_io_stays_off_the_runtime_thread() {
  let dir = tempfile::tempdir().unwrap();
  let clock = clock();
  let recorder = ThreadRecorder::default();
  let computes = Arc::new(AtomicUsize::new(0));
  let runtime_thread = thread::current().id();

  let first = builder(&dir, &clock)
    .strategy(DurabilityStrategy::WriteThrough)
    .cipher(recorder.clone())
    .build()
    .unwrap();
  let _: u32 = first
    .get_or_compute("search", &json!({ "q": "x" }), counted(&computes, 1u32), ComputeOptions::new())
    .await
    .unwrap();
  drop(first);

  let second = builder(&dir, &clock)
    .max_size(1)
    .cipher(recorder.clone())
    .build()
    .unwrap();
  let loaded: u32 = second
    .get_or_compute("search", &json!({ "q": "x" }), counted(&computes, 2u32), ComputeOptions::new())
    .await
    .unwrap();
  assert_eq!(loaded, 1);
  // "y" evicts the clean loaded entry; "z" evicts "y", which is spilled.
  let _: u32 = second
    .get_or_compute("search", &json!({ "q": "y" }), counted(&computes, 3u32), ComputeOptions::new())
    .await
    .unwrap();
  let _: u32 = second
    .get_or_compute("search", &json!({ "q": "z" }), counted(&computes, 4u32), ComputeOptions::new())
    .await
    .unwrap();
  second.persist_to_disk().await.unwrap();

  let threads = recorder.threads();
  assert!(threads.len() >= 4, "save, load, spill and flush all ran: {threads:?}");
  assert!(threads.iter().all(|id| *id != runtime_thread));
}

#[tokio::test]
async fn test_files_are_atomic_json_named_by_sha256() {
  let dir = tempfile::tempdir().unwrap();
  let cache = builder(&dir, &clock())
    .strategy(DurabilityStrategy::WriteThrough)
    .build()
    .unwrap();
  let computes = Arc::new(AtomicUsize::new(0));
  let args = json!({ "q": "x" });

  let _: String = cache
    .get_or_compute("search", &args, counted(&computes, "hit".to_string()), ComputeOptions::new())
    .await
    .unwrap();

  let ns_dir = dir.path().join("search");
  let files: Vec<_> = fs::read_dir(&ns_dir)
    .unwrap()
    .map(|e| e.unwrap().file_name().into_string().unwrap())
    .collect();
  assert_eq!(files.len(), 1, "no temporary files are left behind");
  let name = &files[0];
  assert!(name.ends_with(".json"));
  assert_eq!(name.len(), 64 + ".json".len());
  assert!(!name.contains('x'), "raw arguments never appear in file names");

  let stored: serde_json::Value = serde_json::from_slice(&fs::read(ns_dir.join(name)).unwrap()).unwrap();
  assert_eq!(stored["value"], json!("hit"));
  assert_eq!(stored["key"]["namespace"], json!("search"));
}

#[tokio::test]
async fn test_interrupted_write_does_not_corrupt_reads() {
  let dir = tempfile::tempdir().unwrap();
  let clock = clock();
  let computes = Arc::new(AtomicUsize::new(0));
  let args = json!({ "q": "x" });

  let cache = builder(&dir, &clock)
    .strategy(DurabilityStrategy::WriteThrough)
    .build()
    .unwrap();
  let _: u32 = cache
    .get_or_compute("search", &args, counted(&computes, 1u32), ComputeOptions::new())
    .await
    .unwrap();
  drop(cache);

  // A crash mid-write leaves only a half-written temporary file.
  fs::write(dir.path().join("search").join(".tmpK3y9Qz"), b"{\"key\":{\"names").unwrap();

  let restarted = builder(&dir, &clock).eager_loading(true).build().unwrap();
  assert_eq!(restarted.stats().size, 1);
  let value: u32 = restarted
    .get_or_compute("search", &args, counted(&computes, 2u32), ComputeOptions::new())
    .await
    .unwrap();
  assert_eq!(value, 1);
}

#[tokio::test]
async fn test_corrupt_entry_is_a_miss() {
  let dir = tempfile::tempdir().unwrap();
  let clock = clock();
  let computes = Arc::new(AtomicUsize::new(0));
  let args = json!({ "q": "x" });
  let path = entry_file(dir.path(), "search", &args);

  let cache = builder(&dir, &clock)
    .strategy(DurabilityStrategy::WriteThrough)
    .build()
    .unwrap();
  let _: u32 = cache
    .get_or_compute("search", &args, counted(&computes, 1u32), ComputeOptions::new())
    .await
    .unwrap();
  drop(cache);
  fs::write(&path, b"\x00\x01 definitely not json").unwrap();

  let restarted = builder(&dir, &clock)
    .strategy(DurabilityStrategy::WriteThrough)
    .build()
    .unwrap();
  let value: u32 = restarted
    .get_or_compute("search", &args, counted(&computes, 2u32), ComputeOptions::new())
    .await
    .unwrap();
  assert_eq!(value, 2);
  assert_eq!(computes.load(Ordering::SeqCst), 2);

  // The recomputed entry replaced the corrupt file.
  let stored: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
  assert_eq!(stored["value"], json!(2));
}

#[tokio::test]
async fn test_namespace_isolation_on_disk() {
  let dir = tempfile::tempdir().unwrap();
  let cache = builder(&dir, &clock())
    .strategy(DurabilityStrategy::WriteThrough)
    .build()
    .unwrap();
  let computes = Arc::new(AtomicUsize::new(0));
  let args = json!({ "id": 1 });

  let _: String = cache
    .get_or_compute("fetch", &args, counted(&computes, "page".to_string()), ComputeOptions::new())
    .await
    .unwrap();
  let _: String = cache
    .get_or_compute("summarize", &args, counted(&computes, "summary".to_string()), ComputeOptions::new())
    .await
    .unwrap();

  let fetch = entry_file(dir.path(), "fetch", &args);
  let summarize = entry_file(dir.path(), "summarize", &args);
  assert!(fetch.is_file());
  assert!(summarize.is_file());
  assert_eq!(fetch.file_name(), summarize.file_name(), "same digest, separate directories");

  cache.invalidate("fetch", &args).unwrap();
  assert!(!fetch.exists());
  assert!(summarize.is_file());
}

#[tokio::test]
async fn test_disk_failure_degrades_to_memory() {
  let dir = tempfile::tempdir().unwrap();
  let cache = builder(&dir, &clock())
    .strategy(DurabilityStrategy::WriteThrough)
    .build()
    .unwrap();
  let computes = Arc::new(AtomicUsize::new(0));

  // A plain file where the namespace directory should go.
  fs::write(dir.path().join("search"), b"").unwrap();

  let value: u32 = cache
    .get_or_compute("search", &json!({ "q": "x" }), counted(&computes, 5u32), ComputeOptions::new())
    .await
    .unwrap();
  assert_eq!(value, 5);

  let stats = cache.stats();
  assert_eq!(stats.persist_failures, 1);
  assert_eq!(stats.dirty, 1, "the entry stays dirty for a later retry");

  let report = cache.persist_to_disk().await.unwrap();
  assert_eq!(report.failed, 1);
  cache.dispose().await;
}

#[tokio::test]
async fn test_encrypted_round_trip() {
  let dir = tempfile::tempdir().unwrap();
  let clock = clock();
  let computes = Arc::new(AtomicUsize::new(0));
  let args = json!({ "q": "secret" });

  let cache = builder(&dir, &clock)
    .strategy(DurabilityStrategy::WriteThrough)
    .cipher(XorCipher(0x42))
    .build()
    .unwrap();
  let _: String = cache
    .get_or_compute("search", &args, counted(&computes, "classified".to_string()), ComputeOptions::new())
    .await
    .unwrap();
  drop(cache);

  let raw = fs::read(entry_file(dir.path(), "search", &args)).unwrap();
  assert!(!String::from_utf8_lossy(&raw).contains("classified"));

  let restarted = builder(&dir, &clock)
    .cipher(XorCipher(0x42))
    .eager_loading(true)
    .build()
    .unwrap();
  let value: String = restarted
    .get_or_compute("search", &args, counted(&computes, "recomputed".to_string()), ComputeOptions::new())
    .await
    .unwrap();
  assert_eq!(value, "classified");
  assert_eq!(computes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_encryption_failure_is_fatal() {
  let dir = tempfile::tempdir().unwrap();
  let cache = builder(&dir, &clock())
    .strategy(DurabilityStrategy::WriteThrough)
    .cipher(LockedVault)
    .build()
    .unwrap();
  let computes = Arc::new(AtomicUsize::new(0));
  let args = json!({ "q": "x" });

  let err = cache
    .get_or_compute::<_, u32, _, _, _>("search", &args, counted(&computes, 1u32), ComputeOptions::new())
    .await
    .unwrap_err();
  assert!(err.is_encryption());
  assert!(!entry_file(dir.path(), "search", &args).exists(), "never falls back to plaintext");

  assert!(cache.persist_to_disk().await.unwrap_err().is_encryption());
}

#[tokio::test]
async fn test_decryption_failure_is_not_a_silent_miss() {
  let dir = tempfile::tempdir().unwrap();
  let clock = clock();
  let computes = Arc::new(AtomicUsize::new(0));
  let args = json!({ "q": "x" });

  let cache = builder(&dir, &clock)
    .strategy(DurabilityStrategy::WriteThrough)
    .cipher(XorCipher(7))
    .build()
    .unwrap();
  let _: u32 = cache
    .get_or_compute("search", &args, counted(&computes, 1u32), ComputeOptions::new())
    .await
    .unwrap();
  drop(cache);

  let wrong_key = builder(&dir, &clock).cipher(LockedVault).build().unwrap();
  let err = wrong_key
    .get_or_compute::<_, u32, _, _, _>("search", &args, counted(&computes, 2u32), ComputeOptions::new())
    .await
    .unwrap_err();
  assert!(err.is_encryption());
  assert_eq!(computes.load(Ordering::SeqCst), 1);

  let eager = builder(&dir, &clock).cipher(LockedVault).eager_loading(true).build();
  assert!(eager.unwrap_err().is_encryption());
}
