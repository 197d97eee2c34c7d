//! Background work owned by the cache: the periodic flusher that moves
//! dirty entries to disk.

pub(crate) mod flusher;
