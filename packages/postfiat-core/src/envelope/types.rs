//! Envelope data model.
//!
//! These are the in-memory value types. Their protobuf layout lives in
//! [`codec`](super::codec); the JSON shape (used by the gateway and the
//! SQLite store) comes from the serde derives here, with hashes as hex and
//! opaque bytes as base64.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::content_digest_hex;

// ============================================================================
// ENUMS
// ============================================================================

/// What `Envelope.message` carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// An encoded [`CoreMessage`], possibly encrypted
    CoreMessage = 0,
    /// An encoded [`MultiPartMessagePart`]
    MultipartMessagePart = 1,
}

/// How `Envelope.message` is protected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncryptionMode {
    /// Plaintext; no grants expected
    None = 0,
    /// CEK wrapped by group keys, group keys wrapped per recipient
    Protected = 1,
    /// CEK wrapped directly per recipient
    PublicKey = 2,
}

/// What an [`AccessGrant`] wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    /// A content encryption key; `target_id` is the hex content hash
    ContentKey = 0,
    /// A group key; `target_id` is the group id
    GroupKey = 1,
}

macro_rules! wire_enum {
    ($name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl $name {
            /// Wire value
            pub fn as_i32(self) -> i32 {
                self as i32
            }

            /// Parse a wire value; unknown values are `None`
            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

wire_enum!(MessageType { CoreMessage = 0, MultipartMessagePart = 1 });
wire_enum!(EncryptionMode { None = 0, Protected = 1, PublicKey = 2 });
wire_enum!(KeyType { ContentKey = 0, GroupKey = 1 });

// ============================================================================
// METADATA
// ============================================================================

/// String-to-string metadata
///
/// Keeps insertion order for encoding and display, but equality ignores
/// order: two maps with the same entries are equal however they were built.
#[derive(Debug, Clone, Default)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    /// Empty map
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build from raw pairs without collapsing repeated keys
    ///
    /// Encoding rejects a map built this way if a key repeats.
    pub fn from_pairs_unchecked(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    /// Insert or replace; a replaced key keeps its original position
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.0.push((key, value));
                None
            }
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Remove a key
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First key that appears more than once, if any
    pub fn first_duplicate(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.0
            .iter()
            .map(|(k, _)| k.as_str())
            .find(|k| !seen.insert(*k))
    }

    /// Merge `other` into `self`, replacing values for existing keys
    pub fn extend_from(&mut self, other: &Metadata) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }

    pub(crate) fn into_pairs(self) -> Vec<(String, String)> {
        self.0
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        let mut a: Vec<_> = self.0.iter().collect();
        let mut b: Vec<_> = other.0.iter().collect();
        a.sort();
        b.sort();
        a == b
    }
}

impl Eq for Metadata {}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Metadata::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MetadataVisitor;

        impl<'de> Visitor<'de> for MetadataVisitor {
            type Value = Metadata;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a string-to-string map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Metadata, A::Error> {
                let mut map = Metadata::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    if map.get(&k).is_some() {
                        return Err(serde::de::Error::custom(format!("duplicate metadata key '{}'", k)));
                    }
                    map.insert(k, v);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(MetadataVisitor)
    }
}

// ============================================================================
// REFERENCES AND GRANTS
// ============================================================================

/// "Content with this hash exists and belongs to access group G"
///
/// Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextReference {
    /// Digest of the referenced content
    #[serde(with = "hex_bytes")]
    pub content_hash: Vec<u8>,
    /// Access group the referenced content belongs to
    pub group_id: String,
}

impl ContextReference {
    /// Create a reference
    pub fn new(content_hash: impl Into<Vec<u8>>, group_id: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            group_id: group_id.into(),
        }
    }

    /// Hex form of the referenced hash
    pub fn content_hash_hex(&self) -> String {
        hex::encode(&self.content_hash)
    }
}

/// A wrapped key published alongside an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Content key or group key
    pub key_type: KeyType,
    /// Hex content hash (content keys) or group id (group keys)
    pub target_id: String,
    /// Wrapped key bytes
    #[serde(with = "base64_bytes")]
    pub encrypted_key_material: Vec<u8>,
}

// ============================================================================
// MESSAGES
// ============================================================================

/// The plaintext payload carried inside an envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreMessage {
    /// Message body
    pub content: String,
    /// Private references, visible only after decryption
    #[serde(default)]
    pub context_references: Vec<ContextReference>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl CoreMessage {
    /// Message with just a body
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Add a private reference
    pub fn with_reference(mut self, reference: ContextReference) -> Self {
        self.context_references.push(reference);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

/// One slice of an oversized payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiPartMessagePart {
    /// Shared by all parts of one payload
    pub message_id: String,
    /// Zero-based position
    pub part_number: u32,
    /// Number of parts in the payload
    pub total_parts: u32,
    /// Slice bytes
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Hex digest of the unsplit payload
    pub complete_message_hash: String,
}

/// The unit of exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Format version (non-zero)
    pub version: u32,
    /// Digest of `message` exactly as transmitted
    #[serde(with = "hex_bytes")]
    pub content_hash: Vec<u8>,
    /// Payload kind
    pub message_type: MessageType,
    /// Protection mode of `message`
    pub encryption: EncryptionMode,
    /// Envelope this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// References visible without decryption
    #[serde(default)]
    pub public_references: Vec<ContextReference>,
    /// Wrapped keys
    #[serde(default)]
    pub access_grants: Vec<AccessGrant>,
    /// Payload bytes
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Envelope {
    /// Hex form of `content_hash`
    pub fn content_hash_hex(&self) -> String {
        hex::encode(&self.content_hash)
    }

    /// Digest of `message` as it currently stands, in hex
    pub fn message_digest_hex(&self) -> String {
        content_digest_hex(&self.message)
    }

    /// True for part envelopes
    pub fn is_multipart(&self) -> bool {
        self.message_type == MessageType::MultipartMessagePart
    }

    /// `sender` metadata, if present
    pub fn sender(&self) -> Option<&str> {
        self.metadata.get("sender")
    }

    /// Grants of one kind addressed to `target_id`
    pub fn grants_for<'a>(
        &'a self,
        key_type: KeyType,
        target_id: &'a str,
    ) -> impl Iterator<Item = &'a AccessGrant> + 'a {
        self.access_grants
            .iter()
            .filter(move |g| g.key_type == key_type && g.target_id == target_id)
    }

    /// Grants of one kind
    pub fn grants_of(&self, key_type: KeyType) -> impl Iterator<Item = &AccessGrant> {
        self.access_grants.iter().filter(move |g| g.key_type == key_type)
    }
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

/// Serde helper for byte vectors as hex
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for byte vectors as standard base64
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_equality_ignores_order() {
        let a = Metadata::new().with("sender", "alice").with("topic", "x");
        let b = Metadata::new().with("topic", "x").with("sender", "alice");
        assert_eq!(a, b);
        assert_ne!(a, Metadata::new().with("sender", "alice"));
    }

    #[test]
    fn test_metadata_insert_replaces_in_place() {
        let mut m = Metadata::new().with("a", "1").with("b", "2");
        assert_eq!(m.insert("a", "3"), Some("1".to_string()));
        let keys: Vec<_> = m.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(m.get("a"), Some("3"));
    }

    #[test]
    fn test_metadata_duplicate_detection() {
        let m = Metadata::from_pairs_unchecked(vec![
            ("k".into(), "1".into()),
            ("j".into(), "2".into()),
            ("k".into(), "3".into()),
        ]);
        assert_eq!(m.first_duplicate(), Some("k"));
        assert_eq!(Metadata::new().with("k", "1").first_duplicate(), None);
    }

    #[test]
    fn test_metadata_json_preserves_order() {
        let m = Metadata::new().with("z", "1").with("a", "2");
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"z":"1","a":"2"}"#);
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.iter().next(), Some(("z", "1")));
    }

    #[test]
    fn test_wire_enum_values() {
        assert_eq!(EncryptionMode::PublicKey.as_i32(), 2);
        assert_eq!(EncryptionMode::from_i32(1), Some(EncryptionMode::Protected));
        assert_eq!(MessageType::from_i32(1), Some(MessageType::MultipartMessagePart));
        assert_eq!(KeyType::from_i32(7), None);
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = Envelope {
            version: 1,
            content_hash: vec![0xab; 32],
            message_type: MessageType::CoreMessage,
            encryption: EncryptionMode::None,
            reply_to: None,
            public_references: vec![ContextReference::new(vec![1u8; 32], "g")],
            access_grants: vec![],
            message: b"hi".to_vec(),
            metadata: Metadata::new().with("sender", "rAlice"),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["encryption"], "NONE");
        assert_eq!(json["message"], "aGk=");
        assert_eq!(json["content_hash"], "ab".repeat(32));

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.sender(), Some("rAlice"));
    }
}
