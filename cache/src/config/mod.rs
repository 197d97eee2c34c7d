//! Declarative configuration, read from YAML or JSON.
//!
//! ```yaml
//! default_ttl: 10m
//! max_size: 5000
//! storage_path: /var/cache/agent
//! eager_loading: true
//! persistence_strategy:
//!   kind: hybrid
//!   critical_namespaces: [analysis]
//!   flush_interval: 30s
//! ```

mod raw;

use crate::builder::{DEFAULT_MAX_SIZE, DEFAULT_SHUTDOWN_GRACE, DEFAULT_STORAGE_PATH, DEFAULT_TTL};
use crate::error::{CacheError, ConfigError, Result};
use crate::strategy::DurabilityStrategy;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use raw::{DurableCacheConfigRaw, StrategyConfigRaw};

/// The validated form of a cache configuration file.
///
/// Feed it to [`DurableCacheBuilder::from_config`](crate::DurableCacheBuilder::from_config)
/// to add the options that cannot be expressed in a file, such as a cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableCacheConfig {
  pub default_ttl: Duration,
  pub max_size: usize,
  pub storage_path: PathBuf,
  pub eager_loading: bool,
  pub strategy: DurabilityStrategy,
  pub remove_corrupt_files: bool,
  pub shutdown_grace: Duration,
}

impl Default for DurableCacheConfig {
  fn default() -> Self {
    Self {
      default_ttl: DEFAULT_TTL,
      max_size: DEFAULT_MAX_SIZE,
      storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
      eager_loading: false,
      strategy: DurabilityStrategy::default(),
      remove_corrupt_files: true,
      shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
    }
  }
}

impl DurableCacheConfig {
  pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
    let raw: DurableCacheConfigRaw =
      serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Self::from_raw(raw)
  }

  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let raw: DurableCacheConfigRaw =
      serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Self::from_raw(raw)
  }

  /// Reads a configuration file, choosing the format from its extension
  /// (`.yaml`, `.yml` or `.json`).
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
    let config = match path.extension().and_then(|ext| ext.to_str()) {
      Some("yaml") | Some("yml") => Self::from_yaml_str(&contents)?,
      Some("json") => Self::from_json_str(&contents)?,
      other => {
        return Err(
          ConfigError::InvalidValue {
            field: "path".into(),
            message: format!("unsupported configuration format: {:?}", other.unwrap_or("")),
          }
          .into(),
        )
      }
    };
    Ok(config)
  }

  fn from_raw(raw: DurableCacheConfigRaw) -> Result<Self, ConfigError> {
    let strategy = match raw.persistence_strategy {
      StrategyConfigRaw::Periodic(p) => {
        DurabilityStrategy::periodic(parse_duration("persistence_strategy.flush_interval", &p.flush_interval)?)
      }
      StrategyConfigRaw::WriteThrough => DurabilityStrategy::WriteThrough,
      StrategyConfigRaw::OnShutdown => DurabilityStrategy::OnShutdown,
      StrategyConfigRaw::Hybrid(h) => DurabilityStrategy::hybrid(
        h.critical_namespaces,
        parse_duration("persistence_strategy.flush_interval", &h.flush_interval)?,
      ),
    };

    Ok(Self {
      default_ttl: parse_duration("default_ttl", &raw.default_ttl)?,
      max_size: raw.max_size,
      storage_path: PathBuf::from(raw.storage_path),
      eager_loading: raw.eager_loading,
      strategy,
      remove_corrupt_files: raw.remove_corrupt_files,
      shutdown_grace: parse_duration("shutdown_grace", &raw.shutdown_grace)?,
    })
  }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
  humantime::parse_duration(value).map_err(|e| ConfigError::InvalidValue {
    field: field.to_string(),
    message: e.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn empty_document_yields_defaults() {
    let config = DurableCacheConfig::from_yaml_str("{}").unwrap();
    assert_eq!(config, DurableCacheConfig::default());
  }

  #[test]
  fn yaml_hybrid_strategy() {
    let yaml = r#"
default_ttl: 10m
max_size: 50
storage_path: /tmp/agent-cache
eager_loading: true
persistence_strategy:
  kind: hybrid
  critical_namespaces: [analysis, model]
  flush_interval: 250ms
"#;
    let config = DurableCacheConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.default_ttl, Duration::from_secs(600));
    assert_eq!(config.max_size, 50);
    assert_eq!(config.storage_path, PathBuf::from("/tmp/agent-cache"));
    assert!(config.eager_loading);
    assert_eq!(
      config.strategy,
      DurabilityStrategy::hybrid(["analysis", "model"], Duration::from_millis(250))
    );
  }

  #[test]
  fn json_write_through() {
    let json = r#"{ "persistence_strategy": { "kind": "write_through" }, "shutdown_grace": "1s" }"#;
    let config = DurableCacheConfig::from_json_str(json).unwrap();
    assert_eq!(config.strategy, DurabilityStrategy::WriteThrough);
    assert_eq!(config.shutdown_grace, Duration::from_secs(1));
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let err = DurableCacheConfig::from_yaml_str("max_sise: 10").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));

    let err = DurableCacheConfig::from_yaml_str("persistence_strategy: { kind: sometimes }").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
  }

  #[test]
  fn bad_duration_names_the_field() {
    let err = DurableCacheConfig::from_yaml_str("default_ttl: soon").unwrap_err();
    match err {
      ConfigError::InvalidValue { field, .. } => assert_eq!(field, "default_ttl"),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[test]
  fn from_path_dispatches_on_extension() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = dir.path().join("cache.yml");
    fs::write(&yaml, "persistence_strategy: { kind: on_shutdown }").unwrap();
    assert_eq!(
      DurableCacheConfig::from_path(&yaml).unwrap().strategy,
      DurabilityStrategy::OnShutdown
    );

    let toml = dir.path().join("cache.toml");
    fs::write(&toml, "").unwrap();
    assert!(matches!(
      DurableCacheConfig::from_path(&toml),
      Err(CacheError::Config(ConfigError::InvalidValue { .. }))
    ));

    assert!(matches!(
      DurableCacheConfig::from_path(dir.path().join("missing.yaml")),
      Err(CacheError::Io { .. })
    ));
  }
}
