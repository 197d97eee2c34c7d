use crate::error::CipherError;

/// At-rest encryption for persisted entries.
///
/// When a cipher is configured, every file written by the cache holds
/// `encrypt(json)` and every file read is passed through `decrypt` before
/// parsing. Errors are never swallowed: a failing cipher aborts the
/// operation with [`CacheError::Encryption`](crate::CacheError::Encryption)
/// instead of falling back to plaintext or to a silent miss.
pub trait EntryCipher: Send + Sync + 'static {
  fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

  fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}
