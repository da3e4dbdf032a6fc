//! SHA-256 content hashing for deduplication
//!
//! The hash is taken over plaintext, so equal entries produce equal hashes
//! even under different ciphertexts. See DESIGN.md for the E2E decision.

use dv_core::types::ContentHash;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a record's plaintext.
pub fn content_hash(plaintext: &[u8]) -> ContentHash {
    ContentHash::from_sha256(Sha256::digest(plaintext).into())
}

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
