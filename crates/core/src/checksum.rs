//! Content checksums used for local cache validation.
//!
//! This is a dedup/integrity check between a producer and its consumers on
//! the same machine, not a security boundary, so a fast 64-bit FxHash is
//! used. The digest is always computed over the exact bytes that were
//! written, and is kept outside the file it describes.

use std::hash::Hasher;

use rustc_hash::FxHasher;

/// Hex-encoded 64-bit digest of `buffer` (always 16 characters).
pub fn buffer_checksum(buffer: impl AsRef<[u8]>) -> String {
    let bytes = buffer.as_ref();
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    // Mix in the length so trailing zero bytes change the digest.
    hasher.write_usize(bytes.len());
    format!("{:016x}", hasher.finish())
}
