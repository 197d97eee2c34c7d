//! A durable, namespaced get-or-compute cache for expensive or rate-limited
//! remote work: search calls, page fetches, model invocations.
//!
//! # Features
//! - **Get-or-compute**: one call checks memory, then disk, and only then runs
//!   the caller's computation.
//! - **Thundering Herd Protection**: concurrent requests for the same key share
//!   a single computation, and its failure is delivered to all of them.
//! - **Stale-While-Revalidate**: values past their TTL can be served while a
//!   single background task refreshes them.
//! - **Bounded Memory**: a strict LRU bound on the in-memory tier. Evicted
//!   entries that never reached disk are written out first.
//! - **Pluggable Durability**: write-through, periodic, on-shutdown, or a
//!   hybrid of write-through for critical namespaces and periodic for the rest.
//! - **Crash Safety**: entries are written to a temporary file and renamed into
//!   place, so a crash never leaves a torn entry behind.
//!
//! # Example
//!
//! ```no_run
//! use fibre_durable::{ComputeOptions, DurabilityStrategy, DurableCache};
//! use std::time::Duration;
//!
//! # async fn run() -> fibre_durable::error::Result<()> {
//! let cache = DurableCache::builder()
//!   .storage_path("./.cache/agent")
//!   .strategy(DurabilityStrategy::hybrid(["analysis"], Duration::from_secs(30)))
//!   .build()?;
//!
//! let hits: Vec<String> = cache
//!   .get_or_compute(
//!     "search",
//!     &serde_json::json!({ "q": "rust atomic rename" }),
//!     || async { Ok::<_, std::io::Error>(vec!["https://doc.rust-lang.org".to_string()]) },
//!     ComputeOptions::new().ttl(Duration::from_secs(600)),
//!   )
//!   .await?;
//! # let _ = hits;
//!
//! cache.dispose().await;
//! # Ok(())
//! # }
//! ```

// Public modules that form the API
pub mod builder;
pub mod cipher;
pub mod config;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod strategy;
pub mod time;

// Internal, crate-only modules
mod entry;
mod handle;
mod key;
mod loader;
mod options;
mod persistence;
mod shared;
mod store;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::DurableCacheBuilder;
pub use cipher::EntryCipher;
pub use config::DurableCacheConfig;
pub use entry::{CacheEntry, Freshness};
pub use error::{CacheError, CipherError, ComputeError, ConfigError};
pub use handle::DurableCache;
pub use key::CacheKey;
pub use metrics::CacheStats;
pub use options::ComputeOptions;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use shared::FlushReport;
pub use strategy::{DurabilityStrategy, PersistAdvice};
pub use time::{Clock, ManualClock, SystemClock};
