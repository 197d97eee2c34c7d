use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// The main error type for `fibre_durable` operations.
///
/// Every variant is cheap to clone so that a single failure can be delivered
/// to all callers waiting on the same in-flight computation.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  /// The caller's compute closure failed. The original error is preserved
  /// and available through `source()`.
  #[error("compute failed: {0}")]
  Compute(#[source] ComputeError),

  /// The arguments or the value could not be (de)serialized.
  #[error("serialization failed: {0}")]
  Serialization(#[source] Arc<serde_json::Error>),

  /// At-rest encryption or decryption failed. This is never downgraded to a
  /// miss or to a plaintext write.
  #[error("encryption failed: {0}")]
  Encryption(#[source] CipherError),

  /// An I/O failure on a path that cannot degrade to memory-only operation,
  /// e.g. reading a configuration file.
  #[error("I/O error on '{}': {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: Arc<std::io::Error>,
  },

  /// The cache was configured with invalid options.
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),

  /// The task running a computation was dropped before producing a result,
  /// usually because the compute closure panicked.
  #[error("compute task for '{namespace}' was aborted before completing")]
  TaskAborted { namespace: String },

  /// The blocking task running disk I/O was cancelled, usually because the
  /// runtime is shutting down.
  #[error("disk task was cancelled before completing")]
  DiskTaskCancelled,
}

impl CacheError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    CacheError::Io {
      path: path.into(),
      source: Arc::new(source),
    }
  }

  /// Returns `true` if this error came from the caller's compute closure.
  pub fn is_compute(&self) -> bool {
    matches!(self, CacheError::Compute(_))
  }

  /// Returns `true` if this error is an at-rest encryption failure.
  pub fn is_encryption(&self) -> bool {
    matches!(self, CacheError::Encryption(_))
  }
}

impl From<serde_json::Error> for CacheError {
  fn from(err: serde_json::Error) -> Self {
    CacheError::Serialization(Arc::new(err))
  }
}

impl From<CipherError> for CacheError {
  fn from(err: CipherError) -> Self {
    CacheError::Encryption(err)
  }
}

/// A shareable wrapper around the error returned by a compute closure.
#[derive(Clone)]
pub struct ComputeError(Arc<dyn StdError + Send + Sync>);

impl ComputeError {
  pub fn new<E>(err: E) -> Self
  where
    E: Into<Box<dyn StdError + Send + Sync>>,
  {
    Self(Arc::from(err.into()))
  }

  /// Attempts to view the original error as a concrete type.
  pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
    self.0.downcast_ref::<E>()
  }
}

impl fmt::Debug for ComputeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&*self.0, f)
  }
}

impl fmt::Display for ComputeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&*self.0, f)
  }
}

impl StdError for ComputeError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.0.source()
  }
}

/// An error raised by an [`EntryCipher`](crate::cipher::EntryCipher).
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {message}")]
pub struct CipherError {
  pub operation: CipherOperation,
  pub message: String,
}

impl CipherError {
  pub fn encrypt(message: impl Into<String>) -> Self {
    Self {
      operation: CipherOperation::Encrypt,
      message: message.into(),
    }
  }

  pub fn decrypt(message: impl Into<String>) -> Self {
    Self {
      operation: CipherOperation::Decrypt,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherOperation {
  Encrypt,
  Decrypt,
}

impl fmt::Display for CipherOperation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CipherOperation::Encrypt => write!(f, "encryption"),
      CipherOperation::Decrypt => write!(f, "decryption"),
    }
  }
}

/// Errors that can occur when building a cache or parsing its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  /// The cache was configured with a `max_size` of zero.
  #[error("max_size cannot be zero")]
  ZeroCapacity,

  /// A periodic or hybrid strategy was configured with a zero interval.
  #[error("flush interval cannot be zero")]
  ZeroFlushInterval,

  /// No `TaskSpawner` was configured and the builder was not called from
  /// within a Tokio runtime.
  #[error("a task spawner is required when building outside of a Tokio runtime")]
  SpawnerRequired,

  #[error("failed to parse configuration: {0}")]
  Parse(String),

  #[error("invalid configuration value for '{field}': {message}")]
  InvalidValue { field: String, message: String },
}

/// A specialized `Result` type for `fibre_durable` operations.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
