//! # Key Derivation Functions
//!
//! HKDF-SHA256 derivation of the AES key that wraps a group key or CEK for
//! one recipient.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 RECIPIENT WRAPPING KEY DERIVATION                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  eph_secret × recipient_pub  ──►  dh (32 bytes)                        │
//! │                                      │                                  │
//! │                                      ▼                                  │
//! │  HKDF-SHA256(                                                          │
//! │    ikm  = dh,                                                          │
//! │    salt = eph_pub ‖ recipient_pub,   ← binds key to both parties       │
//! │    info = "postfiat-key-wrap-v1"                                       │
//! │  )                                                                     │
//! │                                      │                                  │
//! │                                      ▼                                  │
//! │                     32-byte AES-256-GCM wrapping key                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use super::encryption::{EncryptionKey, KEY_SIZE};
use crate::error::{Error, Result};

/// Domain separation strings for HKDF and AEAD associated data
pub mod domain {
    /// HKDF info for recipient wrapping keys
    pub const KEY_WRAP: &[u8] = b"postfiat-key-wrap-v1";

    /// AAD bound to every encrypted message body
    pub const MESSAGE_AAD: &[u8] = b"postfiat-message-v1";

    /// AAD prefix for CEK wraps (`content-key:{content_hash_hex}[:{group_id}]`)
    pub const CONTENT_KEY_PREFIX: &str = "content-key";

    /// AAD prefix for group key wraps (`group-key:{group_id}`)
    pub const GROUP_KEY_PREFIX: &str = "group-key";
}

/// Derive the wrapping key for one recipient from an X25519 exchange
pub fn derive_wrap_key(
    dh_output: &[u8; 32],
    eph_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> Result<EncryptionKey> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(eph_public);
    salt[32..].copy_from_slice(recipient_public);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), dh_output);
    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(domain::KEY_WRAP, &mut key)
        .map_err(|_| Error::KeyDerivationFailed("HKDF expansion failed".into()))?;

    let wrap_key = EncryptionKey::from_bytes(key);
    key.zeroize();
    Ok(wrap_key)
}
