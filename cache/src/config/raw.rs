// Structs mapping one-to-one to the YAML/JSON configuration. Durations are
// kept as strings here and parsed when the raw config is processed.

use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct DurableCacheConfigRaw {
  #[serde(default = "default_ttl")]
  pub default_ttl: String,
  #[serde(default = "default_max_size")]
  pub max_size: usize,
  #[serde(default = "default_storage_path")]
  pub storage_path: String,
  #[serde(default)]
  pub eager_loading: bool,
  #[serde(default)]
  pub persistence_strategy: StrategyConfigRaw,
  #[serde(default = "default_true")]
  pub remove_corrupt_files: bool,
  #[serde(default = "default_shutdown_grace")]
  pub shutdown_grace: String,
}

fn default_ttl() -> String {
  "1h".to_string()
}

fn default_max_size() -> usize {
  crate::builder::DEFAULT_MAX_SIZE
}

fn default_storage_path() -> String {
  crate::builder::DEFAULT_STORAGE_PATH.to_string()
}

fn default_true() -> bool {
  true
}

fn default_shutdown_grace() -> String {
  "5s".to_string()
}

fn default_flush_interval() -> String {
  "30s".to_string()
}

// --- Strategy Config ---
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)] // "kind" determines the enum variant
pub(crate) enum StrategyConfigRaw {
  Periodic(PeriodicConfigRaw),
  WriteThrough,
  OnShutdown,
  Hybrid(HybridConfigRaw),
}

impl Default for StrategyConfigRaw {
  fn default() -> Self {
    StrategyConfigRaw::Hybrid(HybridConfigRaw {
      critical_namespaces: Vec::new(),
      flush_interval: default_flush_interval(),
    })
  }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct PeriodicConfigRaw {
  #[serde(default = "default_flush_interval")]
  pub flush_interval: String,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct HybridConfigRaw {
  /// Namespaces persisted on every write.
  #[serde(default)]
  pub critical_namespaces: Vec<String>,
  #[serde(default = "default_flush_interval")]
  pub flush_interval: String,
}
