use crate::cipher::EntryCipher;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::key::CacheKey;

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

const ENTRY_EXTENSION: &str = "json";

/// Reads and writes entries under `root/<namespace>/<digest>.json`.
///
/// Writes go to a temporary file in the target directory which is then
/// renamed over the destination, so a reader sees either the previous file
/// or the new one and never a torn write. Reads never fail on a missing or
/// corrupt file; they log and report absence. The only error a read can
/// raise is a cipher failure.
pub(crate) struct PersistenceManager {
  root: PathBuf,
  cipher: Option<Arc<dyn EntryCipher>>,
  remove_corrupt: bool,
}

impl fmt::Debug for PersistenceManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PersistenceManager")
      .field("root", &self.root)
      .field("encrypted", &self.cipher.is_some())
      .field("remove_corrupt", &self.remove_corrupt)
      .finish()
  }
}

impl PersistenceManager {
  pub(crate) fn new(
    root: impl Into<PathBuf>,
    cipher: Option<Arc<dyn EntryCipher>>,
    remove_corrupt: bool,
  ) -> Self {
    Self {
      root: root.into(),
      cipher,
      remove_corrupt,
    }
  }

  pub(crate) fn root(&self) -> &Path {
    &self.root
  }

  pub(crate) fn namespace_dir(&self, namespace: &str) -> PathBuf {
    self.root.join(encode_namespace(namespace))
  }

  pub(crate) fn entry_path(&self, key: &CacheKey) -> PathBuf {
    self
      .namespace_dir(key.namespace())
      .join(format!("{}.{}", key.digest(), ENTRY_EXTENSION))
  }

  /// Loads the entry stored for `key`.
  ///
  /// Missing, unreadable or corrupt files yield `Ok(None)`. Corrupt files are
  /// deleted when the manager was configured to do so.
  pub(crate) fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let path = self.entry_path(key);
    let entry = match self.read_entry(&path)? {
      Some(entry) => entry,
      None => return Ok(None),
    };

    if &entry.key != key {
      tracing::warn!(
        path = %path.display(),
        expected = %key,
        found = %entry.key,
        "entry file holds a different key; treating as corrupt"
      );
      self.discard_corrupt(&path);
      return Ok(None);
    }

    Ok(Some(entry))
  }

  /// Atomically writes `entry` to its file.
  ///
  /// Returns [`CacheError::Encryption`] if the cipher fails and
  /// [`CacheError::Io`] for any disk failure; in both cases the previously
  /// committed file, if any, is left untouched.
  pub(crate) fn save(&self, entry: &CacheEntry) -> Result<()> {
    let dir = self.namespace_dir(entry.namespace());
    let path = self.entry_path(&entry.key);

    let json = serde_json::to_vec(entry)?;
    let bytes = match &self.cipher {
      Some(cipher) => cipher.encrypt(&json)?,
      None => json,
    };

    fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| CacheError::io(&dir, e))?;
    tmp
      .write_all(&bytes)
      .and_then(|_| tmp.as_file().sync_all())
      .map_err(|e| CacheError::io(tmp.path(), e))?;
    // On failure the temporary file is removed when `PersistError` drops.
    tmp
      .persist(&path)
      .map_err(|e| CacheError::io(&path, e.error))?;

    tracing::trace!(key = %entry.key, path = %path.display(), "entry saved");
    Ok(())
  }

  /// Loads every readable entry of `namespace`. Used for eager loading.
  pub(crate) fn load_all_for_namespace(&self, namespace: &str) -> Result<Vec<CacheEntry>> {
    let dir = self.namespace_dir(namespace);
    let read_dir = match fs::read_dir(&dir) {
      Ok(rd) => rd,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => {
        tracing::warn!(path = %dir.display(), error = %e, "failed to list namespace directory");
        return Ok(Vec::new());
      }
    };

    let mut entries = Vec::new();
    for dir_entry in read_dir.flatten() {
      let path = dir_entry.path();
      if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
        // Temporary files from interrupted writes, or foreign files.
        continue;
      }
      let Some(entry) = self.read_entry(&path)? else {
        continue;
      };
      if entry.namespace() != namespace || !file_matches_digest(&path, entry.key.digest()) {
        tracing::warn!(path = %path.display(), "entry file does not match its location; treating as corrupt");
        self.discard_corrupt(&path);
        continue;
      }
      entries.push(entry);
    }
    Ok(entries)
  }

  /// Namespaces that have a directory under the storage root.
  pub(crate) fn namespaces(&self) -> Vec<String> {
    let read_dir = match fs::read_dir(&self.root) {
      Ok(rd) => rd,
      Err(e) => {
        if e.kind() != io::ErrorKind::NotFound {
          tracing::warn!(path = %self.root.display(), error = %e, "failed to list storage root");
        }
        return Vec::new();
      }
    };

    let mut namespaces: Vec<String> = read_dir
      .flatten()
      .filter(|d| d.file_type().map(|t| t.is_dir()).unwrap_or(false))
      .filter_map(|d| d.file_name().to_str().and_then(decode_namespace))
      .collect();
    namespaces.sort();
    namespaces
  }

  /// Removes the file for `key`. Returns `true` if a file was deleted.
  pub(crate) fn invalidate(&self, key: &CacheKey) -> bool {
    let path = self.entry_path(key);
    match fs::remove_file(&path) {
      Ok(()) => true,
      Err(e) if e.kind() == io::ErrorKind::NotFound => false,
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove entry file");
        false
      }
    }
  }

  /// Removes every file of `namespace`.
  pub(crate) fn clear_namespace(&self, namespace: &str) {
    let dir = self.namespace_dir(namespace);
    match fs::remove_dir_all(&dir) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => tracing::warn!(path = %dir.display(), error = %e, "failed to clear namespace"),
    }
  }

  /// Removes every namespace directory under the root. The root itself is
  /// kept.
  pub(crate) fn clear_all(&self) {
    for namespace in self.namespaces() {
      self.clear_namespace(&namespace);
    }
  }

  // Reads and decodes one file. Only cipher failures are errors.
  fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>> {
    let bytes = match fs::read(path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "failed to read entry file");
        return Ok(None);
      }
    };

    let json = match &self.cipher {
      Some(cipher) => cipher.decrypt(&bytes)?,
      None => bytes,
    };

    match serde_json::from_slice::<CacheEntry>(&json) {
      Ok(mut entry) => {
        entry.dirty = false;
        Ok(Some(entry))
      }
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "corrupt entry file");
        self.discard_corrupt(path);
        Ok(None)
      }
    }
  }

  fn discard_corrupt(&self, path: &Path) {
    if !self.remove_corrupt {
      return;
    }
    if let Err(e) = fs::remove_file(path) {
      if e.kind() != io::ErrorKind::NotFound {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove corrupt entry file");
      }
    }
  }
}

fn file_matches_digest(path: &Path, digest: &str) -> bool {
  path.file_stem().and_then(|s| s.to_str()) == Some(digest)
}

/// Maps a namespace to a directory name that is safe on every filesystem.
///
/// Lowercase ASCII letters, digits, `-` and `_` pass through, as does `.`
/// when it is not the first character. Everything else, uppercase letters
/// included, is written as `%XX` per UTF-8 byte, so namespaces differing only
/// in case never share a directory on case-insensitive filesystems. The
/// empty namespace is written as a lone `%`.
pub(crate) fn encode_namespace(namespace: &str) -> String {
  if namespace.is_empty() {
    return "%".to_string();
  }
  let mut out = String::with_capacity(namespace.len());
  for (i, byte) in namespace.bytes().enumerate() {
    let keep = byte.is_ascii_lowercase()
      || byte.is_ascii_digit()
      || byte == b'-'
      || byte == b'_'
      || (byte == b'.' && i > 0);
    if keep {
      out.push(byte as char);
    } else {
      out.push_str(&format!("%{:02X}", byte));
    }
  }
  out
}

/// Reverses [`encode_namespace`]. Returns `None` for names it could not
/// have produced.
pub(crate) fn decode_namespace(name: &str) -> Option<String> {
  if name == "%" {
    return Some(String::new());
  }
  let bytes = name.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' {
      let hex = name.get(i + 1..i + 3)?;
      out.push(u8::from_str_radix(hex, 16).ok()?);
      i += 3;
    } else if bytes[i].is_ascii_uppercase() {
      return None;
    } else {
      out.push(bytes[i]);
      i += 1;
    }
  }
  String::from_utf8(out).ok()
}
