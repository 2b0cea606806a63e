//! Key hashes used by the Chromium simple cache.
//!
//! Three independent functions, all over the raw bytes of an entry's key
//! (usually a URL):
//!
//! - [`lookup_hash`] names the files of an entry on disk. It is the first
//!   eight bytes of the key's SHA-1 digest, read as a little-endian integer.
//! - [`integrity_hash`] is the 32-bit SuperFastHash stored in every entry
//!   header, used to detect a truncated or corrupted key.
//! - [`key_digest`] is the SHA-256 digest optionally stored after stream 0.
//!
//! None of these can fail; any byte slice (including an empty one) is a
//! valid input.

mod superfast;

use sha1::Sha1;
use sha2::{Digest, Sha256};

pub use crate::superfast::integrity_hash;

/// Length in bytes of [`key_digest`] output.
pub const KEY_DIGEST_SIZE: usize = 32;

/// Compute the 64-bit hash that names an entry's files.
///
/// # Examples
///
/// ```
/// let hash = simplecache_hash::lookup_hash("https://golang.org/doc/gopher/pkg.png");
/// assert_eq!(format!("{hash:016x}"), "bb9d1cda868d278c");
/// ```
#[must_use]
pub fn lookup_hash(key: impl AsRef<[u8]>) -> u64 {
    let digest = Sha1::digest(key.as_ref());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// SHA-256 digest of the key, as written between stream 0 and its trailer.
#[must_use]
pub fn key_digest(key: impl AsRef<[u8]>) -> [u8; KEY_DIGEST_SIZE] {
    Sha256::digest(key.as_ref()).into()
}
