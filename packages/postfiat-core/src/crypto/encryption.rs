//! # Encryption Module
//!
//! AES-256-GCM sealing for message bodies and wrapped keys, plus the
//! ephemeral-static X25519 construction used to wrap keys for a recipient.
//!
//! ## Framing
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SEALED BLOB LAYOUTS                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Symmetric (message body, CEK under group key)                         │
//! │  ┌──────────────┬──────────────────────────────────────────┐           │
//! │  │  nonce (12)  │  AES-256-GCM ciphertext ‖ tag (16)       │           │
//! │  └──────────────┴──────────────────────────────────────────┘           │
//! │                                                                         │
//! │  Recipient (group key or CEK under an X25519 public key)               │
//! │  ┌──────────────┬──────────────┬───────────────────────────┐           │
//! │  │ eph_pub (32) │  nonce (12)  │  ciphertext ‖ tag (16)    │           │
//! │  └──────────────┴──────────────┴───────────────────────────┘           │
//! │                                                                         │
//! │  Recipient wrapping key:                                               │
//! │    dh   = X25519(eph_secret, recipient_pub)                            │
//! │    key  = HKDF-SHA256(ikm = dh, salt = eph_pub ‖ recipient_pub,        │
//! │                       info = "postfiat-key-wrap-v1")                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A fresh ephemeral key per wrap means a recipient learns nothing about
//! which other recipients a grant list covers, and a holder scanning grants
//! simply tries each one; AEAD tag failure is the "not for me" signal.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::kdf::derive_wrap_key;
use super::keys::RecipientKeyPair;
use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of an X25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// A nonce (number used once) for AES-GCM encryption
///
/// Nonces are random. Never reuse one with the same key: GCM nonce reuse
/// leaks the authentication key. Random 96-bit nonces are safe for about
/// 2^32 messages per key, far beyond the one-or-two seals a CEK sees.
#[derive(Clone, Copy, Debug)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from existing bytes
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// An AES-256-GCM key
///
/// Used for content keys, group keys and derived wrapping keys alike.
/// Zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, rejecting anything but 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!("expected {} key bytes, got {}", KEY_SIZE, bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Borrow the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Encrypt with AES-256-GCM under a fresh random nonce
///
/// Returns `(nonce, ciphertext_with_tag)`.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<(Nonce, Vec<u8>)> {
    let nonce = Nonce::random();
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce.0), payload)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    Ok((nonce, ciphertext))
}

/// Decrypt with AES-256-GCM
///
/// ## Errors
///
/// Returns `DecryptionFailed` if the ciphertext was tampered with, the AAD
/// doesn't match, or the key is wrong. These are indistinguishable by design
/// of the AEAD.
pub fn decrypt(
    key: &EncryptionKey,
    nonce: &Nonce,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::DecryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(AesNonce::from_slice(&nonce.0), payload)
        .map_err(|_| {
            Error::DecryptionFailed("Decryption failed: authentication tag mismatch".into())
        })
}

/// Encrypt and frame as `nonce ‖ ciphertext`
pub fn seal(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let (nonce, ciphertext) = encrypt(key, plaintext, aad)?;
    let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    framed.extend_from_slice(&nonce.0);
    framed.extend_from_slice(&ciphertext);
    Ok(framed)
}

/// Open a `nonce ‖ ciphertext` frame produced by [`seal`]
pub fn open(key: &EncryptionKey, framed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if framed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed(format!(
            "sealed blob too short: {} bytes",
            framed.len()
        )));
    }
    let (nonce_bytes, ciphertext) = framed.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);
    decrypt(key, &Nonce(nonce), ciphertext, aad)
}

/// Encrypt for the holder of an X25519 public key
///
/// ## Flow
///
/// ```text
/// 1. Fresh ephemeral X25519 keypair
/// 2. dh  = eph_secret × recipient_pub
/// 3. key = HKDF(dh, salt = eph_pub ‖ recipient_pub)
/// 4. out = eph_pub ‖ seal(key, plaintext, aad)
/// ```
pub fn seal_for_recipient(
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let ephemeral = RecipientKeyPair::generate();
    let eph_public = ephemeral.public_bytes();
    let dh_output = ephemeral.diffie_hellman(recipient_public)?;
    let wrap_key = derive_wrap_key(&dh_output, &eph_public, recipient_public)?;

    let sealed = seal(&wrap_key, plaintext, aad)?;
    let mut framed = Vec::with_capacity(PUBLIC_KEY_SIZE + sealed.len());
    framed.extend_from_slice(&eph_public);
    framed.extend_from_slice(&sealed);
    Ok(framed)
}

/// Decrypt a blob produced by [`seal_for_recipient`]
///
/// Fails with `DecryptionFailed` when the blob was addressed to someone else.
pub fn open_as_recipient(
    recipient: &RecipientKeyPair,
    framed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if framed.len() < PUBLIC_KEY_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed(format!(
            "recipient blob too short: {} bytes",
            framed.len()
        )));
    }
    let (eph_bytes, sealed) = framed.split_at(PUBLIC_KEY_SIZE);
    let mut eph_public = [0u8; PUBLIC_KEY_SIZE];
    eph_public.copy_from_slice(eph_bytes);

    let dh_output = recipient
        .diffie_hellman(&eph_public)
        .map_err(|e| Error::DecryptionFailed(e.to_string()))?;
    let wrap_key = derive_wrap_key(&dh_output, &eph_public, &recipient.public_bytes())?;
    open(&wrap_key, sealed, aad)
}

// ============================================================================
// TESTS
// ============================================================================
