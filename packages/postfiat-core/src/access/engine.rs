//! Seal and open paths of the key-wrapping hierarchy.

use super::group::{GroupKey, Keyring};
use super::wrap::{
    unwrap_content_key, unwrap_content_key_as, unwrap_group_key, wrap_content_key,
    wrap_content_key_for, wrap_group_key_for, ContentKey,
};
use crate::crypto::{
    content_digest, digests_match, domain, open, seal, EncryptionKey, PUBLIC_KEY_SIZE,
};
use crate::envelope::{
    decode_core_message, encode_core_message, verify_integrity, AccessGrant, CoreMessage,
    EncryptionMode, Envelope, KeyType,
};
use crate::error::{Error, Result};

/// Who may read a sealed message
#[derive(Debug, Clone)]
pub enum AccessPolicy {
    /// Plaintext, readable by anyone
    Public,
    /// Readable by members of the listed groups
    ///
    /// Each group gets one CONTENT_KEY grant; each listed recipient public
    /// key gets one GROUP_KEY grant for its group. Members already holding
    /// the group key need no grant of their own.
    Protected {
        /// `(group key, recipient public keys)` pairs
        groups: Vec<(GroupKey, Vec<[u8; PUBLIC_KEY_SIZE]>)>,
    },
    /// Readable by the listed public keys, with no group tier
    Direct {
        /// Recipient public keys
        recipients: Vec<[u8; PUBLIC_KEY_SIZE]>,
    },
}

impl AccessPolicy {
    /// Protected policy for a single group
    pub fn group(key: GroupKey, recipients: Vec<[u8; PUBLIC_KEY_SIZE]>) -> Self {
        AccessPolicy::Protected {
            groups: vec![(key, recipients)],
        }
    }

    /// Encryption mode this policy produces
    pub fn encryption_mode(&self) -> EncryptionMode {
        match self {
            AccessPolicy::Public => EncryptionMode::None,
            AccessPolicy::Protected { .. } => EncryptionMode::Protected,
            AccessPolicy::Direct { .. } => EncryptionMode::PublicKey,
        }
    }
}

/// The envelope fields produced by sealing a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Mode to record on the envelope
    pub encryption: EncryptionMode,
    /// Envelope `message` bytes
    pub message: Vec<u8>,
    /// Digest of `message`
    pub content_hash: Vec<u8>,
    /// Grants to publish
    pub access_grants: Vec<AccessGrant>,
}

/// A successfully opened envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// The decrypted message
    pub message: CoreMessage,
    /// Group keys recovered or used along the way
    pub group_keys: Vec<GroupKey>,
}

/// Result of trying a keyring against an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    /// At least one grant unwrapped
    Granted(Opened),
    /// No grant unwrapped under any held key
    NoAccess,
}

impl AccessOutcome {
    /// The opened message, if access was granted
    pub fn opened(&self) -> Option<&Opened> {
        match self {
            AccessOutcome::Granted(opened) => Some(opened),
            AccessOutcome::NoAccess => None,
        }
    }

    /// True when access was granted
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessOutcome::Granted(_))
    }
}

/// Two-level key wrapping: CEK under group key, group key under recipient key
///
/// Stateless; all key material comes in through arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyWrappingEngine;

impl KeyWrappingEngine {
    /// Create an engine
    pub fn new() -> Self {
        Self
    }

    /// Encrypt a message under `policy` and produce its grants
    pub fn seal(&self, message: &CoreMessage, policy: &AccessPolicy) -> Result<Sealed> {
        let plaintext = encode_core_message(message)?;

        let (groups, recipients) = match policy {
            AccessPolicy::Public => {
                let content_hash = content_digest(&plaintext).to_vec();
                return Ok(Sealed {
                    encryption: EncryptionMode::None,
                    message: plaintext,
                    content_hash,
                    access_grants: Vec::new(),
                });
            }
            AccessPolicy::Protected { groups } if groups.is_empty() => {
                return Err(Error::InvalidInput("protected policy names no groups".into()));
            }
            AccessPolicy::Direct { recipients } if recipients.is_empty() => {
                return Err(Error::InvalidInput("direct policy names no recipients".into()));
            }
            AccessPolicy::Protected { groups } => (groups.as_slice(), &[][..]),
            AccessPolicy::Direct { recipients } => (&[][..], recipients.as_slice()),
        };

        let cek = EncryptionKey::generate();
        let plaintext_digest = content_digest(&plaintext);
        let ciphertext = seal(&cek, &plaintext, domain::MESSAGE_AAD)?;
        let content_hash = content_digest(&ciphertext);
        let content_hash_hex = hex::encode(content_hash);

        let mut access_grants = Vec::new();
        for (group, members) in groups {
            access_grants.push(AccessGrant {
                key_type: KeyType::ContentKey,
                target_id: content_hash_hex.clone(),
                encrypted_key_material: wrap_content_key(
                    &cek,
                    &plaintext_digest,
                    group,
                    &content_hash_hex,
                )?,
            });
            for member in members {
                access_grants.push(AccessGrant {
                    key_type: KeyType::GroupKey,
                    target_id: group.group_id().to_string(),
                    encrypted_key_material: wrap_group_key_for(group, member)?,
                });
            }
        }
        for recipient in recipients {
            access_grants.push(AccessGrant {
                key_type: KeyType::ContentKey,
                target_id: content_hash_hex.clone(),
                encrypted_key_material: wrap_content_key_for(
                    &cek,
                    &plaintext_digest,
                    recipient,
                    &content_hash_hex,
                )?,
            });
        }

        tracing::debug!(
            content_hash = content_hash_hex.as_str(),
            mode = ?policy.encryption_mode(),
            grants = access_grants.len(),
            "Sealed message"
        );

        Ok(Sealed {
            encryption: policy.encryption_mode(),
            message: ciphertext,
            content_hash: content_hash.to_vec(),
            access_grants,
        })
    }

    /// Try to open an envelope with the keys in `keyring`
    ///
    /// ## Flow
    ///
    /// ```text
    /// verify content_hash
    ///   NONE        → decode message
    ///   PROTECTED   → GROUP_KEY grants × recipient keys  ─┐
    ///                 + group keys already held           ├─► CONTENT_KEY grant → CEK
    ///   PUBLIC_KEY  → CONTENT_KEY grants × recipient keys ┘
    /// decrypt → check plaintext digest bound in the CEK wrap → decode
    /// ```
    ///
    /// Grants that fail to unwrap are skipped silently. Holding no usable
    /// key yields `Ok(AccessOutcome::NoAccess)`.
    ///
    /// ## Errors
    ///
    /// - `Integrity` when `content_hash` does not match `message`, or the
    ///   decrypted plaintext does not match the digest in the CEK wrap
    /// - `InvalidInput` for a multi-part slice, which must be reassembled first
    pub fn open(&self, envelope: &Envelope, keyring: &Keyring) -> Result<AccessOutcome> {
        verify_integrity(envelope)?;
        if envelope.is_multipart() {
            return Err(Error::InvalidInput(
                "multi-part slices must be reassembled before opening".into(),
            ));
        }

        let content_hash_hex = envelope.content_hash_hex();
        let (content_key, group_keys) = match envelope.encryption {
            EncryptionMode::None => {
                let message = decode_core_message(&envelope.message)?;
                return Ok(AccessOutcome::Granted(Opened {
                    message,
                    group_keys: Vec::new(),
                }));
            }
            EncryptionMode::Protected => {
                match self.unlock_via_groups(envelope, keyring, &content_hash_hex) {
                    Some(found) => found,
                    None => return Ok(AccessOutcome::NoAccess),
                }
            }
            EncryptionMode::PublicKey => {
                match Self::unlock_direct(envelope, keyring, &content_hash_hex) {
                    Some(key) => (key, Vec::new()),
                    None => return Ok(AccessOutcome::NoAccess),
                }
            }
        };

        let plaintext = open(&content_key.cek, &envelope.message, domain::MESSAGE_AAD)?;
        if !digests_match(&content_digest(&plaintext), &content_key.plaintext_digest) {
            tracing::warn!(
                content_hash = content_hash_hex.as_str(),
                "Decrypted plaintext does not match wrapped digest"
            );
            return Err(Error::Integrity(format!(
                "plaintext digest mismatch for {}",
                content_hash_hex
            )));
        }

        let message = decode_core_message(&plaintext)?;
        Ok(AccessOutcome::Granted(Opened {
            message,
            group_keys,
        }))
    }

    fn unlock_via_groups(
        &self,
        envelope: &Envelope,
        keyring: &Keyring,
        content_hash_hex: &str,
    ) -> Option<(ContentKey, Vec<GroupKey>)> {
        // Grants addressed to us are always unwrapped, even for groups we
        // already hold a key for: the envelope may be sealed under a newer
        // key version.
        let mut recovered: Vec<GroupKey> = Vec::new();
        for grant in envelope.grants_of(KeyType::GroupKey) {
            let unwrapped = keyring.recipients().iter().find_map(|recipient| {
                unwrap_group_key(recipient, &grant.target_id, &grant.encrypted_key_material).ok()
            });
            if let Some(group) = unwrapped {
                if !recovered.contains(&group) {
                    tracing::debug!(group_id = group.group_id(), "Recovered group key from grant");
                    recovered.push(group);
                }
            }
        }

        // Then every held version, with or without a grant addressed to us
        let held = keyring.group_keys().filter(|k| !recovered.contains(k));
        let candidates: Vec<GroupKey> = recovered.iter().cloned().chain(held.cloned()).collect();

        for group in &candidates {
            for grant in envelope.grants_for(KeyType::ContentKey, content_hash_hex) {
                if let Ok(key) =
                    unwrap_content_key(&grant.encrypted_key_material, group, content_hash_hex)
                {
                    if !recovered.contains(group) {
                        recovered.push(group.clone());
                    }
                    return Some((key, recovered));
                }
            }
        }
        None
    }

    fn unlock_direct(
        envelope: &Envelope,
        keyring: &Keyring,
        content_hash_hex: &str,
    ) -> Option<ContentKey> {
        envelope
            .grants_for(KeyType::ContentKey, content_hash_hex)
            .find_map(|grant| {
                keyring.recipients().iter().find_map(|recipient| {
                    unwrap_content_key_as(recipient, &grant.encrypted_key_material, content_hash_hex)
                        .ok()
                })
            })
    }

    /// Issue GROUP_KEY grants for `group` to more recipients
    ///
    /// Returns a new envelope with the same message and content hash, the
    /// existing grants, and the new ones appended; `envelope` is untouched.
    /// Revocation works only going forward: leaving someone out of a later
    /// envelope does not take back grants they already hold.
    ///
    /// ## Errors
    ///
    /// - `InvalidInput` unless the envelope is PROTECTED
    /// - `InvalidKey` when `group` does not unwrap any CONTENT_KEY grant
    pub fn regrant(
        &self,
        envelope: &Envelope,
        group: &GroupKey,
        recipients: &[[u8; PUBLIC_KEY_SIZE]],
    ) -> Result<Envelope> {
        if envelope.encryption != EncryptionMode::Protected {
            return Err(Error::InvalidInput(format!(
                "cannot regrant a {:?} envelope",
                envelope.encryption
            )));
        }
        let content_hash_hex = envelope.content_hash_hex();
        let unlocks = envelope
            .grants_for(KeyType::ContentKey, &content_hash_hex)
            .any(|g| unwrap_content_key(&g.encrypted_key_material, group, &content_hash_hex).is_ok());
        if !unlocks {
            return Err(Error::InvalidKey(format!(
                "group key for {} does not unlock {}",
                group.group_id(),
                content_hash_hex
            )));
        }

        let mut regranted = envelope.clone();
        for recipient in recipients {
            regranted.access_grants.push(AccessGrant {
                key_type: KeyType::GroupKey,
                target_id: group.group_id().to_string(),
                encrypted_key_material: wrap_group_key_for(group, recipient)?,
            });
        }
        tracing::info!(
            content_hash = content_hash_hex.as_str(),
            group_id = group.group_id(),
            added = recipients.len(),
            "Issued additional group grants"
        );
        Ok(regranted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PROTOCOL_VERSION;
    use crate::crypto::RecipientKeyPair;
    use crate::envelope::{ContextReference, MessageType, Metadata};

    fn envelope_from(sealed: Sealed) -> Envelope {
        Envelope {
            version: PROTOCOL_VERSION,
            content_hash: sealed.content_hash,
            message_type: MessageType::CoreMessage,
            encryption: sealed.encryption,
            reply_to: None,
            public_references: Vec::new(),
            access_grants: sealed.access_grants,
            message: sealed.message,
            metadata: Metadata::new(),
        }
    }

    fn sample() -> CoreMessage {
        CoreMessage::new("quarterly numbers")
            .with_reference(ContextReference::new(vec![7u8; 32], "finance"))
            .with_metadata("topic", "q3")
    }

    #[test]
    fn test_public_round_trip() {
        let engine = KeyWrappingEngine::new();
        let sealed = engine.seal(&sample(), &AccessPolicy::Public).unwrap();
        assert_eq!(sealed.encryption, EncryptionMode::None);
        assert!(sealed.access_grants.is_empty());

        let outcome = engine.open(&envelope_from(sealed), &Keyring::new()).unwrap();
        assert_eq!(outcome.opened().unwrap().message, sample());
    }

    #[test]
    fn test_protected_single_recipient() {
        let engine = KeyWrappingEngine::new();
        let reader = RecipientKeyPair::generate();
        let group = GroupKey::generate("finance");
        let policy = AccessPolicy::group(group.clone(), vec![reader.public_bytes()]);

        let envelope = envelope_from(engine.seal(&sample(), &policy).unwrap());
        assert_eq!(envelope.grants_of(KeyType::GroupKey).count(), 1);
        assert_eq!(envelope.grants_of(KeyType::ContentKey).count(), 1);
        assert_eq!(
            envelope.grants_of(KeyType::ContentKey).next().unwrap().target_id,
            envelope.content_hash_hex()
        );

        let outcome = engine.open(&envelope, &Keyring::with_recipient(reader)).unwrap();
        let opened = outcome.opened().unwrap();
        assert_eq!(opened.message, sample());
        assert_eq!(opened.group_keys, vec![group]);

        let stranger = Keyring::with_recipient(RecipientKeyPair::generate());
        assert_eq!(engine.open(&envelope, &stranger).unwrap(), AccessOutcome::NoAccess);
    }

    #[test]
    fn test_known_group_key_opens_without_grant() {
        let engine = KeyWrappingEngine::new();
        let group = GroupKey::generate("team");
        let envelope = envelope_from(engine.seal(&sample(), &AccessPolicy::group(group.clone(), vec![])).unwrap());

        let mut ring = Keyring::new();
        ring.add_group_key(group);
        assert!(engine.open(&envelope, &ring).unwrap().is_granted());
    }

    #[test]
    fn test_direct_recipients() {
        let engine = KeyWrappingEngine::new();
        let alice = RecipientKeyPair::generate();
        let bob = RecipientKeyPair::generate();
        let policy = AccessPolicy::Direct {
            recipients: vec![alice.public_bytes(), bob.public_bytes()],
        };
        let envelope = envelope_from(engine.seal(&sample(), &policy).unwrap());
        assert_eq!(envelope.encryption, EncryptionMode::PublicKey);
        assert_eq!(envelope.access_grants.len(), 2);

        assert!(engine.open(&envelope, &Keyring::with_recipient(bob)).unwrap().is_granted());
        assert!(engine.open(&envelope, &Keyring::with_recipient(alice)).unwrap().is_granted());
        assert!(!engine.open(&envelope, &Keyring::new()).unwrap().is_granted());
    }

    #[test]
    fn test_tampered_message_fails_integrity_before_decrypt() {
        let engine = KeyWrappingEngine::new();
        let reader = RecipientKeyPair::generate();
        let policy = AccessPolicy::group(GroupKey::generate("g"), vec![reader.public_bytes()]);
        let mut envelope = envelope_from(engine.seal(&sample(), &policy).unwrap());
        envelope.message[20] ^= 1;

        let err = engine.open(&envelope, &Keyring::with_recipient(reader)).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn test_empty_policies_rejected() {
        let engine = KeyWrappingEngine::new();
        assert!(engine.seal(&sample(), &AccessPolicy::Protected { groups: vec![] }).is_err());
        assert!(engine.seal(&sample(), &AccessPolicy::Direct { recipients: vec![] }).is_err());
    }

    #[test]
    fn test_regrant_is_forward_only() {
        let engine = KeyWrappingEngine::new();
        let alice = RecipientKeyPair::generate();
        let bob = RecipientKeyPair::generate();
        let group = GroupKey::generate("members");

        // Older envelope: both are members
        let policy = AccessPolicy::group(group.clone(), vec![alice.public_bytes(), bob.public_bytes()]);
        let older = envelope_from(engine.seal(&sample(), &policy).unwrap());

        // Newer envelope: Bob is left out
        let policy = AccessPolicy::group(group.clone(), vec![alice.public_bytes()]);
        let newer = envelope_from(engine.seal(&CoreMessage::new("after"), &policy).unwrap());

        let bob_ring = Keyring::with_recipient(bob);
        assert!(engine.open(&older, &bob_ring).unwrap().is_granted());
        assert_eq!(engine.open(&newer, &bob_ring).unwrap(), AccessOutcome::NoAccess);
    }

    #[test]
    fn test_rotated_group_key_grant_opens_despite_older_version_held() {
        let engine = KeyWrappingEngine::new();
        let reader = RecipientKeyPair::generate();
        let old_key = GroupKey::generate("ops");
        let new_key = GroupKey::generate("ops");

        let envelope = envelope_from(
            engine
                .seal(&sample(), &AccessPolicy::group(new_key.clone(), vec![reader.public_bytes()]))
                .unwrap(),
        );

        let mut ring = Keyring::with_recipient(reader);
        ring.add_group_key(old_key.clone());
        let outcome = engine.open(&envelope, &ring).unwrap();
        let opened = outcome.opened().expect("grant addressed to reader");
        assert_eq!(opened.message, sample());
        assert_eq!(opened.group_keys, vec![new_key]);
        assert!(!opened.group_keys.contains(&old_key));
    }

    #[test]
    fn test_both_key_versions_open_their_envelopes() {
        let engine = KeyWrappingEngine::new();
        let old_key = GroupKey::generate("ops");
        let new_key = GroupKey::generate("ops");
        let older = envelope_from(
            engine
                .seal(&CoreMessage::new("before"), &AccessPolicy::group(old_key.clone(), vec![]))
                .unwrap(),
        );
        let newer = envelope_from(
            engine
                .seal(&CoreMessage::new("after"), &AccessPolicy::group(new_key.clone(), vec![]))
                .unwrap(),
        );

        let mut ring = Keyring::new();
        ring.add_group_key(new_key);
        ring.add_group_key(old_key);
        let older_opened = engine.open(&older, &ring).unwrap();
        let newer_opened = engine.open(&newer, &ring).unwrap();
        assert_eq!(older_opened.opened().unwrap().message.content, "before");
        assert_eq!(newer_opened.opened().unwrap().message.content, "after");
    }

    #[test]
    fn test_regrant_adds_recipient_without_mutating() {
        let engine = KeyWrappingEngine::new();
        let alice = RecipientKeyPair::generate();
        let carol = RecipientKeyPair::generate();
        let group = GroupKey::generate("members");
        let original = envelope_from(
            engine
                .seal(&sample(), &AccessPolicy::group(group.clone(), vec![alice.public_bytes()]))
                .unwrap(),
        );

        let widened = engine.regrant(&original, &group, &[carol.public_bytes()]).unwrap();
        assert_eq!(original.access_grants.len(), 2);
        assert_eq!(widened.access_grants.len(), 3);
        assert_eq!(widened.content_hash, original.content_hash);

        let carol_ring = Keyring::with_recipient(carol);
        assert_eq!(engine.open(&original, &carol_ring).unwrap(), AccessOutcome::NoAccess);
        assert!(engine.open(&widened, &carol_ring).unwrap().is_granted());
    }

    #[test]
    fn test_regrant_requires_matching_group() {
        let engine = KeyWrappingEngine::new();
        let envelope = envelope_from(
            engine
                .seal(&sample(), &AccessPolicy::group(GroupKey::generate("a"), vec![]))
                .unwrap(),
        );
        let other = GroupKey::generate("a");
        assert!(matches!(
            engine.regrant(&envelope, &other, &[RecipientKeyPair::generate().public_bytes()]),
            Err(Error::InvalidKey(_))
        ));

        let public = envelope_from(engine.seal(&sample(), &AccessPolicy::Public).unwrap());
        assert!(matches!(
            engine.regrant(&public, &other, &[]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_many_random_keys_never_unwrap() {
        let engine = KeyWrappingEngine::new();
        let reader = RecipientKeyPair::generate();
        let policy = AccessPolicy::group(GroupKey::generate("g"), vec![reader.public_bytes()]);
        let envelope = envelope_from(engine.seal(&sample(), &policy).unwrap());

        let mut ring = Keyring::new();
        for _ in 0..64 {
            ring.add_recipient(RecipientKeyPair::generate());
        }
        assert_eq!(engine.open(&envelope, &ring).unwrap(), AccessOutcome::NoAccess);
    }
}
