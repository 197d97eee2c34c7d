use crate::error::Result;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// The identity of a cached computation.
///
/// A key is the pair of a namespace and the SHA-256 digest of the canonical
/// JSON encoding of the call's arguments. Both parts take part in equality
/// and hashing, so identical arguments under two namespaces never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
  namespace: String,
  digest: String,
}

impl CacheKey {
  /// Derives the key for `args` within `namespace`.
  ///
  /// Arguments are first converted to a `serde_json::Value`, whose objects
  /// keep their fields sorted, so two structurally equal argument sets
  /// produce the same digest regardless of field declaration order.
  pub fn derive<A>(namespace: &str, args: &A) -> Result<Self>
  where
    A: Serialize + ?Sized,
  {
    let canonical = canonical_json(args)?;
    Ok(Self {
      namespace: namespace.to_owned(),
      digest: sha256_hex(canonical.as_bytes()),
    })
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  /// The hex-encoded SHA-256 digest of the serialized arguments. This is
  /// also the stem of the entry's file name on disk.
  pub fn digest(&self) -> &str {
    &self.digest
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.namespace, self.digest)
  }
}

/// Serializes `args` to compact JSON with object keys in sorted order.
pub(crate) fn canonical_json<A>(args: &A) -> Result<String>
where
  A: Serialize + ?Sized,
{
  let value = canonicalize(serde_json::to_value(args)?);
  Ok(serde_json::to_string(&value)?)
}

// Object keys are sorted explicitly: `serde_json::Map` keeps insertion order
// when its `preserve_order` feature is enabled anywhere in the build.
fn canonicalize(value: Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut fields: Vec<(String, Value)> = map.into_iter().collect();
      fields.sort_by(|(a, _), (b, _)| a.cmp(b));
      Value::Object(
        fields
          .into_iter()
          .map(|(k, v)| (k, canonicalize(v)))
          .collect::<Map<String, Value>>(),
      )
    }
    Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
    other => other,
  }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}
