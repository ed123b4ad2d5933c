//! Persistence for whole envelopes.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::DateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::envelope::{encode, envelope_id, Envelope, META_TIMESTAMP};
use crate::error::Result;
use crate::time::now_timestamp_millis;

/// Result cap when a query sets none
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Filters for [`EnvelopeStore::search`]; all set fields must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeQuery {
    /// `sender` metadata value
    #[serde(default)]
    pub sender: Option<String>,
    /// Hex content hash of the envelope
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Hex hash that must appear among the public references
    #[serde(default)]
    pub context_hash: Option<String>,
    /// Metadata entries that must all be present
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Maximum results (default 100)
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EnvelopeQuery {
    /// Effective result cap
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
    }

    /// True if `envelope` satisfies every filter
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if let Some(sender) = &self.sender {
            if envelope.sender() != Some(sender.as_str()) {
                return false;
            }
        }
        if let Some(hash) = &self.content_hash {
            if !envelope.content_hash_hex().eq_ignore_ascii_case(hash) {
                return false;
            }
        }
        if let Some(context) = &self.context_hash {
            let referenced = envelope
                .public_references
                .iter()
                .any(|r| r.content_hash_hex().eq_ignore_ascii_case(context));
            if !referenced {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(k, v)| envelope.metadata.get(k) == Some(v.as_str()))
    }
}

/// Sort key for "newest first": the envelope's `timestamp` metadata
/// (RFC 3339 or epoch milliseconds), else `fallback_millis`
pub(crate) fn created_at_millis(envelope: &Envelope, fallback_millis: i64) -> i64 {
    let Some(raw) = envelope.metadata.get(META_TIMESTAMP) else {
        return fallback_millis;
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.timestamp_millis();
    }
    raw.parse::<i64>().unwrap_or(fallback_millis)
}

/// Envelope persistence, keyed by the hash of the encoded envelope
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Store an envelope and return its id; storing it again is a no-op
    async fn store(&self, envelope: &Envelope) -> Result<String>;

    /// Fetch by id
    async fn retrieve(&self, id: &str) -> Result<Option<Envelope>>;

    /// True if the id is stored
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Remove by id; `false` if it was not there
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Envelopes whose `content_hash` equals `content_hash`
    async fn find_by_content_hash(&self, content_hash: &[u8]) -> Result<Vec<Envelope>>;

    /// Envelopes publicly referencing `context_hash`
    async fn find_by_context(&self, context_hash: &[u8]) -> Result<Vec<Envelope>>;

    /// Envelopes from `sender`, newest first
    async fn list_by_sender(&self, sender: &str, limit: usize) -> Result<Vec<Envelope>>;

    /// Envelopes matching every filter in `query`, newest first
    async fn search(&self, query: &EnvelopeQuery) -> Result<Vec<Envelope>>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug)]
struct Record {
    envelope: Envelope,
    created_at: i64,
    seq: u64,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: HashMap<String, Record>,
    by_content: HashMap<Vec<u8>, HashSet<String>>,
    by_context: HashMap<Vec<u8>, HashSet<String>>,
    next_seq: u64,
}

impl MemoryInner {
    fn collect_newest<'a>(&self, ids: impl Iterator<Item = &'a String>) -> Vec<&Record> {
        let mut found: Vec<&Record> = ids.filter_map(|id| self.records.get(id)).collect();
        found.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        found
    }
}

/// Envelope store held in process memory
#[derive(Debug, Default)]
pub struct MemoryEnvelopeStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryEnvelopeStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored envelopes
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EnvelopeStore for MemoryEnvelopeStore {
    async fn store(&self, envelope: &Envelope) -> Result<String> {
        let id = envelope_id(&encode(envelope)?);
        let mut inner = self.inner.write();
        if inner.records.contains_key(&id) {
            return Ok(id);
        }

        inner
            .by_content
            .entry(envelope.content_hash.clone())
            .or_default()
            .insert(id.clone());
        for reference in &envelope.public_references {
            inner
                .by_context
                .entry(reference.content_hash.clone())
                .or_default()
                .insert(id.clone());
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.insert(
            id.clone(),
            Record {
                envelope: envelope.clone(),
                created_at: created_at_millis(envelope, now_timestamp_millis()),
                seq,
            },
        );
        tracing::debug!(id = id.as_str(), "Stored envelope in memory");
        Ok(id)
    }

    async fn retrieve(&self, id: &str) -> Result<Option<Envelope>> {
        Ok(self.inner.read().records.get(id).map(|r| r.envelope.clone()))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.inner.read().records.contains_key(id))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(record) = inner.records.remove(id) else {
            return Ok(false);
        };
        if let Some(ids) = inner.by_content.get_mut(&record.envelope.content_hash) {
            ids.remove(id);
        }
        for reference in &record.envelope.public_references {
            if let Some(ids) = inner.by_context.get_mut(&reference.content_hash) {
                ids.remove(id);
            }
        }
        Ok(true)
    }

    async fn find_by_content_hash(&self, content_hash: &[u8]) -> Result<Vec<Envelope>> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_content.get(content_hash) else {
            return Ok(Vec::new());
        };
        Ok(inner
            .collect_newest(ids.iter())
            .into_iter()
            .map(|r| r.envelope.clone())
            .collect())
    }

    async fn find_by_context(&self, context_hash: &[u8]) -> Result<Vec<Envelope>> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_context.get(context_hash) else {
            return Ok(Vec::new());
        };
        Ok(inner
            .collect_newest(ids.iter())
            .into_iter()
            .map(|r| r.envelope.clone())
            .collect())
    }

    async fn list_by_sender(&self, sender: &str, limit: usize) -> Result<Vec<Envelope>> {
        let query = EnvelopeQuery {
            sender: Some(sender.to_string()),
            limit: Some(limit),
            ..Default::default()
        };
        self.search(&query).await
    }

    async fn search(&self, query: &EnvelopeQuery) -> Result<Vec<Envelope>> {
        let inner = self.inner.read();
        Ok(inner
            .collect_newest(inner.records.keys())
            .into_iter()
            .filter(|r| query.matches(&r.envelope))
            .take(query.effective_limit())
            .map(|r| r.envelope.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ContextReference, EncryptionMode, MessageType, Metadata};

    fn sample(n: u8, sender: &str, timestamp: &str) -> Envelope {
        let message = vec![n; 8];
        Envelope {
            version: 1,
            content_hash: crate::crypto::content_digest(&message).to_vec(),
            message_type: MessageType::CoreMessage,
            encryption: EncryptionMode::None,
            reply_to: None,
            public_references: vec![ContextReference::new(vec![0xCC; 32], "public")],
            access_grants: Vec::new(),
            message,
            metadata: Metadata::new()
                .with("sender", sender)
                .with(META_TIMESTAMP, timestamp),
        }
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let store = MemoryEnvelopeStore::new();
        let envelope = sample(1, "alice", "2024-07-07T12:00:00Z");
        let a = store.store(&envelope).await.unwrap();
        let b = store.store(&envelope).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.retrieve(&a).await.unwrap(), Some(envelope));
        assert!(store.exists(&a).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryEnvelopeStore::new();
        let envelope = sample(1, "alice", "2024-07-07T12:00:00Z");
        let id = store.store(&envelope).await.unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.find_by_content_hash(&envelope.content_hash).await.unwrap().is_empty());
        assert!(store.retrieve(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sender_newest_first() {
        let store = MemoryEnvelopeStore::new();
        store.store(&sample(1, "alice", "2024-01-01T00:00:00Z")).await.unwrap();
        store.store(&sample(2, "alice", "2024-03-01T00:00:00Z")).await.unwrap();
        store.store(&sample(3, "bob", "2024-02-01T00:00:00Z")).await.unwrap();
        store.store(&sample(4, "alice", "2024-02-01T00:00:00Z")).await.unwrap();

        let listed = store.list_by_sender("alice", 10).await.unwrap();
        let order: Vec<u8> = listed.iter().map(|e| e.message[0]).collect();
        assert_eq!(order, vec![2, 4, 1]);

        assert_eq!(store.list_by_sender("alice", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_context_and_search() {
        let store = MemoryEnvelopeStore::new();
        let mut tagged = sample(1, "alice", "2024-01-01T00:00:00Z");
        tagged.metadata.insert("topic", "audit");
        store.store(&tagged).await.unwrap();
        store.store(&sample(2, "bob", "2024-01-02T00:00:00Z")).await.unwrap();

        assert_eq!(store.find_by_context(&[0xCC; 32]).await.unwrap().len(), 2);
        assert!(store.find_by_context(&[0xDD; 32]).await.unwrap().is_empty());

        let query = EnvelopeQuery {
            context_hash: Some(hex::encode([0xCC; 32])),
            metadata: [("topic".to_string(), "audit".to_string())].into_iter().collect(),
            ..Default::default()
        };
        let hits = store.search(&query).await.unwrap();
        assert_eq!(hits, vec![tagged]);
    }

    #[test]
    fn test_created_at_parsing() {
        let envelope = sample(1, "a", "1700000000000");
        assert_eq!(created_at_millis(&envelope, 0), 1_700_000_000_000);
        let envelope = sample(1, "a", "not a time");
        assert_eq!(created_at_millis(&envelope, 42), 42);
        let envelope = sample(1, "a", "1970-01-01T00:00:01Z");
        assert_eq!(created_at_millis(&envelope, 0), 1000);
    }
}
