//! SHA-256 helpers
//!
//! All hashes in the ledger are lowercase hex digests of UTF-8 strings.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `content`
pub fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// First `len` hex characters of the SHA-256 of `content`
pub fn short_hash(content: &str, len: usize) -> String {
    let mut digest = sha256_hex(content);
    digest.truncate(len);
    digest
}
