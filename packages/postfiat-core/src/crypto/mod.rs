//! # Cryptography Module
//!
//! Primitives behind the key-wrapping hierarchy. The envelope format does not
//! mandate a cipher suite; this crate fixes one:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC BUILDING BLOCKS                        │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Purpose                    Primitive                                  │
//! │  ─────────────────────────  ──────────────────────────────────────      │
//! │  Content integrity          SHA-256 (constant-time compare)            │
//! │  Message body               AES-256-GCM under a per-message CEK        │
//! │  CEK under group key        AES-256-GCM, AAD binds content hash        │
//! │  Key to recipient           X25519 ephemeral-static + HKDF-SHA256      │
//! │                             + AES-256-GCM                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Notes
//!
//! - Nonces are random 96-bit values; keys never see more than a handful of
//!   seals.
//! - Key material is zeroized on drop.
//! - A wrapped key that fails to authenticate is indistinguishable from one
//!   addressed to someone else.

mod digest;
mod encryption;
mod kdf;
mod keys;

pub use digest::{content_digest, content_digest_hex, digests_match, verify_hex_digest, DIGEST_SIZE};
pub use encryption::{
    decrypt, encrypt, open, open_as_recipient, seal, seal_for_recipient, EncryptionKey, Nonce,
    KEY_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE,
};
pub use kdf::{derive_wrap_key, domain};
pub use keys::{parse_public_key, RecipientKeyPair};
