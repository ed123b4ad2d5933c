//! SHA-256 content digests.
//!
//! The same digest is used for `Envelope.content_hash`, the multi-part
//! `complete_message_hash`, content addresses and envelope ids. Comparisons
//! against a declared hash go through [`digests_match`], which does not exit
//! early on the first differing byte.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Size of a content digest in bytes
pub const DIGEST_SIZE: usize = 32;

/// SHA-256 of `data`
pub fn content_digest(data: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::digest(data).into()
}

/// Lowercase hex SHA-256 of `data`
pub fn content_digest_hex(data: &[u8]) -> String {
    hex::encode(content_digest(data))
}

/// Constant-time equality of two digests (length mismatch is `false`)
pub fn digests_match(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

/// Check `data` against a lowercase hex digest
pub fn verify_hex_digest(data: &[u8], expected_hex: &str) -> bool {
    match hex::decode(expected_hex) {
        Ok(expected) => digests_match(&content_digest(data), &expected),
        Err(_) => false,
    }
}
