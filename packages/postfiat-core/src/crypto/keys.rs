//! # Recipient Keys
//!
//! X25519 keypairs identify recipients. A recipient's public key is the
//! only thing a sender needs to issue it a GROUP_KEY (or direct CONTENT_KEY)
//! grant; the secret half stays with the holder and is only used to try
//! unwrapping grants.
//!
//! How private keys are provisioned is outside this crate. Callers load
//! them from wherever they live and build a [`RecipientKeyPair`] from the
//! 32 secret bytes.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// X25519 keypair held by a grant recipient
#[derive(ZeroizeOnDrop)]
pub struct RecipientKeyPair {
    /// Private key (secret)
    #[zeroize(skip)] // x25519_dalek handles its own zeroization
    secret: StaticSecret,
    /// Public key (derived from secret)
    public: X25519PublicKey,
}

impl RecipientKeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from raw secret bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the secret key bytes
    ///
    /// Only for handing back to whatever custody layer owns the key. Never
    /// log or transmit these bytes.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Hex encoding of the public key
    pub fn public_hex(&self) -> String {
        hex::encode(self.public.to_bytes())
    }

    /// Perform Diffie-Hellman key exchange
    ///
    /// Rejects non-contributory results (low-order peer points), which
    /// would otherwise yield an all-zero shared secret.
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> Result<[u8; 32]> {
        let their_public = X25519PublicKey::from(*their_public);
        let shared = self.secret.diffie_hellman(&their_public);
        if !shared.was_contributory() {
            return Err(Error::InvalidKey("non-contributory X25519 public key".into()));
        }
        Ok(shared.to_bytes())
    }
}

impl std::fmt::Debug for RecipientKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipientKeyPair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

/// Parse a hex-encoded X25519 public key
pub fn parse_public_key(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| Error::InvalidKey(format!("Invalid hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidKey("Public key must be 32 bytes".into()))
}
