//! Group keys and the keyring a reader brings to `open`.

use std::collections::HashMap;

use crate::crypto::{EncryptionKey, RecipientKeyPair, KEY_SIZE};

/// Symmetric key shared by the members of one access group
///
/// Wraps CEKs. The key bytes are zeroized on drop.
#[derive(Clone)]
pub struct GroupKey {
    group_id: String,
    key: EncryptionKey,
}

impl GroupKey {
    /// Fresh random key for `group_id`
    pub fn generate(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            key: EncryptionKey::generate(),
        }
    }

    /// Rebuild a group key from stored bytes
    pub fn from_bytes(group_id: impl Into<String>, bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            group_id: group_id.into(),
            key: EncryptionKey::from_bytes(bytes),
        }
    }

    /// Access group this key belongs to
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The symmetric key
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.group_id == other.group_id
            && bool::from(self.key.as_bytes().ct_eq(other.key.as_bytes()))
    }
}

impl Eq for GroupKey {}

impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupKey")
            .field("group_id", &self.group_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Key material a reader holds
///
/// Recipient keypairs are tried against GROUP_KEY (and direct CONTENT_KEY)
/// grants. Group keys learned earlier are tried against CONTENT_KEY grants
/// directly. A group may hold several key versions after rotation; every
/// version is kept so older envelopes stay readable.
#[derive(Debug, Default)]
pub struct Keyring {
    recipients: Vec<RecipientKeyPair>,
    group_keys: HashMap<String, Vec<GroupKey>>,
}

impl Keyring {
    /// Empty keyring
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyring holding one recipient keypair
    pub fn with_recipient(recipient: RecipientKeyPair) -> Self {
        let mut keyring = Self::new();
        keyring.add_recipient(recipient);
        keyring
    }

    /// Add a recipient keypair
    pub fn add_recipient(&mut self, recipient: RecipientKeyPair) {
        self.recipients.push(recipient);
    }

    /// Remember a group key alongside any other versions for the same group
    ///
    /// Returns false when this exact key was already held.
    pub fn add_group_key(&mut self, key: GroupKey) -> bool {
        let versions = self.group_keys.entry(key.group_id.clone()).or_default();
        if versions.contains(&key) {
            return false;
        }
        versions.push(key);
        true
    }

    /// Every key version held for `group_id`, oldest first
    pub fn group_keys_for(&self, group_id: &str) -> &[GroupKey] {
        self.group_keys.get(group_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All held group keys
    pub fn group_keys(&self) -> impl Iterator<Item = &GroupKey> {
        self.group_keys.values().flatten()
    }

    /// Ids of held groups, the shape graph traversal wants
    pub fn group_ids(&self) -> std::collections::HashSet<String> {
        self.group_keys.keys().cloned().collect()
    }

    /// Held recipient keypairs
    pub fn recipients(&self) -> &[RecipientKeyPair] {
        &self.recipients
    }

    /// True when the keyring holds nothing
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty() && self.group_keys.is_empty()
    }
}
