mod common;

use common::*;
use fibre_durable::ComputeOptions;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

#[tokio::test]
async fn test_lru_bound_and_spill() {
  let dir = tempfile::tempdir().unwrap();
  let cache = builder(&dir, &clock()).max_size(3).build().unwrap();
  let computes = Arc::new(AtomicUsize::new(0));

  for q in ["a", "b", "c"] {
    let _: String = cache
      .get_or_compute("search", &json!({ "q": q }), counted(&computes, q.to_string()), ComputeOptions::new())
      .await
      .unwrap();
  }

  // Touch "a" so that "b" becomes the least recently used entry.
  let _: String = cache
    .get_or_compute("search", &json!({ "q": "a" }), counted(&computes, "a2".to_string()), ComputeOptions::new())
    .await
    .unwrap();

  let _: String = cache
    .get_or_compute("search", &json!({ "q": "d" }), counted(&computes, "d".to_string()), ComputeOptions::new())
    .await
    .unwrap();

  let stats = cache.stats();
  assert_eq!(stats.size, 3, "store never exceeds max_size");
  assert_eq!(stats.evictions, 1);
  assert_eq!(computes.load(Ordering::SeqCst), 4);

  // The evicted entry was dirty, so it went to disk instead of vanishing.
  assert!(entry_file(dir.path(), "search", &json!({ "q": "b" })).is_file());
  assert!(!entry_file(dir.path(), "search", &json!({ "q": "a" })).exists());

  let b: String = cache
    .get_or_compute("search", &json!({ "q": "b" }), counted(&computes, "b2".to_string()), ComputeOptions::new())
    .await
    .unwrap();
  assert_eq!(b, "b");
  assert_eq!(computes.load(Ordering::SeqCst), 4);
  assert_eq!(cache.stats().disk_hits, 1);
  assert_eq!(cache.stats().size, 3);
}

#[tokio::test]
async fn test_size_stays_bounded_under_churn() {
  let dir = tempfile::tempdir().unwrap();
  let cache = builder(&dir, &clock()).max_size(8).build().unwrap();
  let computes = Arc::new(AtomicUsize::new(0));

  for i in 0..100u32 {
    let _: u32 = cache
      .get_or_compute("numbers", &i, counted(&computes, i), ComputeOptions::new())
      .await
      .unwrap();
    assert!(cache.stats().size <= 8);
  }

  let stats = cache.stats();
  assert_eq!(stats.size, 8);
  assert_eq!(stats.evictions, 92);
  assert_eq!(stats.dirty, 8, "evicted entries were spilled; only residents are dirty");
}
