//! Wrapping and unwrapping of individual keys.
//!
//! Every wrap binds its context through AEAD associated data, so a grant
//! lifted from one envelope (or one group) cannot be replayed against
//! another:
//!
//! | Wrap                    | AAD                                      |
//! |-------------------------|------------------------------------------|
//! | CEK under group key     | `content-key:{content_hash_hex}:{group}` |
//! | CEK to a recipient      | `content-key:{content_hash_hex}`         |
//! | group key to recipient  | `group-key:{group}`                      |
//!
//! A wrapped CEK is followed by the SHA-256 of the plaintext it protects.

use zeroize::Zeroizing;

use super::group::GroupKey;
use crate::crypto::{
    domain, open, open_as_recipient, seal, seal_for_recipient, EncryptionKey, RecipientKeyPair,
    DIGEST_SIZE, KEY_SIZE, PUBLIC_KEY_SIZE,
};
use crate::error::{Error, Result};

/// A CEK together with the plaintext digest it was wrapped with
pub(crate) struct ContentKey {
    pub cek: EncryptionKey,
    pub plaintext_digest: [u8; DIGEST_SIZE],
}

fn group_content_aad(content_hash_hex: &str, group_id: &str) -> Vec<u8> {
    format!("{}:{}:{}", domain::CONTENT_KEY_PREFIX, content_hash_hex, group_id).into_bytes()
}

fn direct_content_aad(content_hash_hex: &str) -> Vec<u8> {
    format!("{}:{}", domain::CONTENT_KEY_PREFIX, content_hash_hex).into_bytes()
}

fn group_key_aad(group_id: &str) -> Vec<u8> {
    format!("{}:{}", domain::GROUP_KEY_PREFIX, group_id).into_bytes()
}

fn content_key_plaintext(cek: &EncryptionKey, digest: &[u8; DIGEST_SIZE]) -> Zeroizing<Vec<u8>> {
    let mut buf = Zeroizing::new(Vec::with_capacity(KEY_SIZE + DIGEST_SIZE));
    buf.extend_from_slice(cek.as_bytes());
    buf.extend_from_slice(digest);
    buf
}

fn parse_content_key(plaintext: Zeroizing<Vec<u8>>) -> Result<ContentKey> {
    if plaintext.len() != KEY_SIZE + DIGEST_SIZE {
        return Err(Error::InvalidKey(format!(
            "wrapped content key has {} bytes, expected {}",
            plaintext.len(),
            KEY_SIZE + DIGEST_SIZE
        )));
    }
    let cek = EncryptionKey::from_slice(&plaintext[..KEY_SIZE])?;
    let mut plaintext_digest = [0u8; DIGEST_SIZE];
    plaintext_digest.copy_from_slice(&plaintext[KEY_SIZE..]);
    Ok(ContentKey {
        cek,
        plaintext_digest,
    })
}

/// Wrap a CEK under a group key
pub(crate) fn wrap_content_key(
    cek: &EncryptionKey,
    plaintext_digest: &[u8; DIGEST_SIZE],
    group: &GroupKey,
    content_hash_hex: &str,
) -> Result<Vec<u8>> {
    let plaintext = content_key_plaintext(cek, plaintext_digest);
    seal(
        group.key(),
        &plaintext,
        &group_content_aad(content_hash_hex, group.group_id()),
    )
}

/// Unwrap a CEK with a group key
pub(crate) fn unwrap_content_key(
    material: &[u8],
    group: &GroupKey,
    content_hash_hex: &str,
) -> Result<ContentKey> {
    let plaintext = Zeroizing::new(open(
        group.key(),
        material,
        &group_content_aad(content_hash_hex, group.group_id()),
    )?);
    parse_content_key(plaintext)
}

/// Wrap a CEK directly to a recipient public key
pub(crate) fn wrap_content_key_for(
    cek: &EncryptionKey,
    plaintext_digest: &[u8; DIGEST_SIZE],
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
    content_hash_hex: &str,
) -> Result<Vec<u8>> {
    let plaintext = content_key_plaintext(cek, plaintext_digest);
    seal_for_recipient(recipient_public, &plaintext, &direct_content_aad(content_hash_hex))
}

/// Unwrap a directly addressed CEK
pub(crate) fn unwrap_content_key_as(
    recipient: &RecipientKeyPair,
    material: &[u8],
    content_hash_hex: &str,
) -> Result<ContentKey> {
    let plaintext = Zeroizing::new(open_as_recipient(
        recipient,
        material,
        &direct_content_aad(content_hash_hex),
    )?);
    parse_content_key(plaintext)
}

/// Wrap a group key for one recipient
///
/// The output is the `encrypted_key_material` of a GROUP_KEY grant whose
/// `target_id` is the group id.
pub fn wrap_group_key_for(group: &GroupKey, recipient_public: &[u8; PUBLIC_KEY_SIZE]) -> Result<Vec<u8>> {
    seal_for_recipient(
        recipient_public,
        group.key().as_bytes(),
        &group_key_aad(group.group_id()),
    )
}

/// Recover a group key from GROUP_KEY grant material
///
/// Fails with `DecryptionFailed` when the grant was issued to a different
/// key or for a different group.
pub fn unwrap_group_key(
    recipient: &RecipientKeyPair,
    group_id: &str,
    material: &[u8],
) -> Result<GroupKey> {
    let plaintext = Zeroizing::new(open_as_recipient(recipient, material, &group_key_aad(group_id))?);
    let bytes: [u8; KEY_SIZE] = plaintext.as_slice().try_into().map_err(|_| {
        Error::InvalidKey(format!("wrapped group key has {} bytes", plaintext.len()))
    })?;
    Ok(GroupKey::from_bytes(group_id, bytes))
}
