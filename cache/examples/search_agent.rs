use fibre_durable::{ComputeOptions, DurabilityStrategy, DurableCache};
use serde::{Deserialize, Serialize};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchHit {
  title: String,
  url: String,
}

async fn search(query: &str, calls: &AtomicUsize) -> Result<Vec<SearchHit>, std::io::Error> {
  let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
  println!("[Search] call #{} for '{}'...", call, query);
  tokio::time::sleep(Duration::from_millis(300)).await;
  Ok(vec![SearchHit {
    title: format!("Result for {} (call {})", query, call),
    url: format!("https://example.org/search?q={}", query.replace(' ', "+")),
  }])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let dir = tempfile::tempdir()?;
  let calls = Arc::new(AtomicUsize::new(0));

  let cache = DurableCache::builder()
    .storage_path(dir.path())
    .strategy(DurabilityStrategy::hybrid(["analysis"], Duration::from_secs(30)))
    .build()?;

  let lookup = |query: &'static str| {
    let cache = cache.clone();
    let calls = calls.clone();
    async move {
      cache
        .get_or_compute(
          "search",
          &serde_json::json!({ "q": query }),
          move || async move { search(query, &calls).await },
          ComputeOptions::new()
            .ttl(Duration::from_secs(1))
            .stale_while_revalidate(Duration::from_secs(10)),
        )
        .await
    }
  };

  println!("--- Step 1: Five concurrent lookups share one search ---");
  let results = futures_util::future::join_all((0..5).map(|_| lookup("atomic rename"))).await;
  for hits in results {
    let hits: Vec<SearchHit> = hits?;
    println!("Received: {:?}", hits[0].title);
  }
  println!("Search calls: {}", calls.load(Ordering::SeqCst));

  println!("\n--- Step 2: Wait for the TTL to pass ---");
  tokio::time::sleep(Duration::from_millis(1200)).await;

  println!("\n--- Step 3: Stale read returns at once and refreshes in the background ---");
  let stale: Vec<SearchHit> = lookup("atomic rename").await?;
  println!("Received: {:?}", stale[0].title);
  tokio::time::sleep(Duration::from_millis(500)).await;
  let fresh: Vec<SearchHit> = lookup("atomic rename").await?;
  println!("Received: {:?}", fresh[0].title);

  println!("\n--- Step 4: Flush and inspect ---");
  let report = cache.persist_to_disk().await?;
  println!("Flushed: {:?}", report);
  println!("Stats: {:#?}", cache.stats());

  cache.dispose().await;
  Ok(())
}
