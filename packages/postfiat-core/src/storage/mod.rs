//! # Storage Module
//!
//! Content-addressed storage for payloads too large (or too shared) to ride
//! inside an envelope, plus persistence for whole envelopes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          STORAGE ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                        ContentRouter                              │  │
//! │  │   store: preferred hint ─► precedence Inline → Cache → FS → IPFS  │  │
//! │  │   dedup: sha256 → descriptor (DashMap)                            │  │
//! │  │   retrieve/delete: route by URI scheme, verify digest             │  │
//! │  └──────┬──────────────┬───────────────┬───────────────┬────────────┘  │
//! │         ▼              ▼               ▼               ▼               │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────────┐ ┌────────────┐         │
//! │  │  Inline    │ │  Cache     │ │  Filesystem  │ │   IPFS     │         │
//! │  │ inline://h │ │ cache://h  │ │  cas://h     │ │ ipfs://cid │         │
//! │  │ descriptor │ │ DashMap    │ │ {root}/hh/h  │ │ HTTP API   │         │
//! │  └────────────┘ └────────────┘ └──────────────┘ └────────────┘         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  EnvelopeStore: MemoryEnvelopeStore | SqliteEnvelopeStore         │  │
//! │  │  id = sha256(encoded envelope); lookups by hash, context, sender  │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod cache;
mod envelope_store;
mod fs;
mod inline;
mod ipfs;
mod router;
mod schema;
mod sqlite;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::{content_digest_hex, verify_hex_digest};
use crate::envelope::Metadata;
use crate::error::{Error, Result};

pub use cache::CacheStorage;
pub use envelope_store::{EnvelopeQuery, EnvelopeStore, MemoryEnvelopeStore, DEFAULT_QUERY_LIMIT};
pub use fs::FilesystemStorage;
pub use inline::InlineStorage;
pub use ipfs::IpfsStorage;
pub use router::ContentRouter;
pub use sqlite::SqliteEnvelopeStore;

/// Descriptor metadata key naming the backend that holds the content
pub const META_STORAGE_PROVIDER: &str = "storage_provider";

/// Descriptor metadata key carrying inline content (base64)
pub const META_CONTENT_DATA: &str = "content_data";

// ============================================================================
// BACKEND REGISTRY
// ============================================================================

/// The storage backends this crate knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Content embedded in the descriptor
    Inline,
    /// In-process cache
    Cache,
    /// Content-addressed files on local disk
    Filesystem,
    /// IPFS node over its HTTP API
    Ipfs,
}

impl BackendKind {
    /// Order in which the router offers writes
    pub const PRECEDENCE: [BackendKind; 4] = [
        BackendKind::Inline,
        BackendKind::Cache,
        BackendKind::Filesystem,
        BackendKind::Ipfs,
    ];

    /// Position in [`PRECEDENCE`](Self::PRECEDENCE); lower is offered writes first
    pub fn rank(self) -> usize {
        Self::PRECEDENCE
            .iter()
            .position(|kind| *kind == self)
            .unwrap_or(Self::PRECEDENCE.len())
    }

    /// Provider name recorded in descriptors
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Inline => "inline",
            BackendKind::Cache => "cache",
            BackendKind::Filesystem => "filesystem",
            BackendKind::Ipfs => "ipfs",
        }
    }

    /// URI prefix this backend issues
    pub fn uri_prefix(self) -> &'static str {
        match self {
            BackendKind::Inline => "inline://",
            BackendKind::Cache => "cache://",
            BackendKind::Filesystem => "cas://",
            BackendKind::Ipfs => "ipfs://",
        }
    }

    /// Build a URI for `locator`
    pub fn uri(self, locator: &str) -> String {
        format!("{}{}", self.uri_prefix(), locator)
    }

    /// The part of `uri` after this backend's prefix
    pub fn locator(self, uri: &str) -> Option<&str> {
        uri.strip_prefix(self.uri_prefix()).filter(|rest| !rest.is_empty())
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(BackendKind::Inline),
            "cache" | "redis" => Ok(BackendKind::Cache),
            "filesystem" | "fs" | "cas" => Ok(BackendKind::Filesystem),
            "ipfs" => Ok(BackendKind::Ipfs),
            other => Err(Error::InvalidInput(format!("unknown storage backend: {}", other))),
        }
    }
}

// ============================================================================
// DESCRIPTOR
// ============================================================================

/// Everything needed to fetch and check a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    /// Backend-specific URI
    pub uri: String,
    /// MIME type supplied at store time
    pub content_type: String,
    /// Size in bytes
    pub content_length: u64,
    /// Transfer encoding, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    /// Hex SHA-256 of the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Backend details (`storage_provider`, inline `content_data`, ...)
    #[serde(default)]
    pub metadata: Metadata,
}

impl ContentDescriptor {
    /// Descriptor for content a backend just stored
    pub(crate) fn stored(kind: BackendKind, uri: String, content: &[u8], content_type: &str) -> Self {
        Self {
            uri,
            content_type: content_type.to_string(),
            content_length: content.len() as u64,
            content_encoding: None,
            content_hash: Some(content_digest_hex(content)),
            metadata: Metadata::new().with(META_STORAGE_PROVIDER, kind.name()),
        }
    }

    /// Backend named in metadata
    pub fn storage_provider(&self) -> Option<&str> {
        self.metadata.get(META_STORAGE_PROVIDER)
    }
}

/// Check retrieved bytes against an expected hex digest
pub(crate) fn verify_content(kind: BackendKind, uri: &str, content: &[u8], expected_hex: &str) -> Result<()> {
    if verify_hex_digest(content, expected_hex) {
        return Ok(());
    }
    tracing::warn!(backend = kind.name(), uri, "Retrieved content failed digest check");
    Err(Error::Integrity(format!(
        "{} content at {} does not match {}",
        kind, uri, expected_hex
    )))
}

/// Hex digest encoded in a hash-addressed URI
pub(crate) fn hash_locator(kind: BackendKind, uri: &str) -> Result<String> {
    let locator = kind
        .locator(uri)
        .ok_or_else(|| Error::InvalidInput(format!("not a {} URI: {}", kind, uri)))?;
    let valid = locator.len() == 64 && locator.bytes().all(|b| b.is_ascii_hexdigit());
    if !valid {
        return Err(Error::InvalidInput(format!("malformed {} URI: {}", kind, uri)));
    }
    Ok(locator.to_ascii_lowercase())
}

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// A place content can be stored and fetched from
#[async_trait]
pub trait ContentStorage: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Store bytes and describe where they went
    async fn store(&self, content: &[u8], content_type: &str) -> Result<ContentDescriptor>;

    /// Fetch bytes for a descriptor this backend handles
    async fn retrieve(&self, descriptor: &ContentDescriptor) -> Result<Vec<u8>>;

    /// True if `uri` is one of this backend's
    fn can_handle(&self, uri: &str) -> bool {
        self.kind().locator(uri).is_some()
    }

    /// True if the backend takes content of `len` bytes
    fn accepts(&self, _len: usize) -> bool {
        true
    }

    /// Remove stored content
    async fn delete(&self, _descriptor: &ContentDescriptor) -> Result<()> {
        Err(Error::Unimplemented {
            backend: self.kind().name().to_string(),
            operation: "delete".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_uris() {
        assert_eq!(BackendKind::Filesystem.uri("ab"), "cas://ab");
        assert_eq!(BackendKind::Filesystem.locator("cas://ab"), Some("ab"));
        assert_eq!(BackendKind::Filesystem.locator("cas://"), None);
        assert_eq!(BackendKind::Cache.locator("cas://ab"), None);
    }

    #[test]
    fn test_rank_follows_precedence() {
        for (i, kind) in BackendKind::PRECEDENCE.iter().enumerate() {
            assert_eq!(kind.rank(), i);
        }
        assert!(BackendKind::Inline.rank() < BackendKind::Ipfs.rank());
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("IPFS".parse::<BackendKind>().unwrap(), BackendKind::Ipfs);
        assert_eq!("redis".parse::<BackendKind>().unwrap(), BackendKind::Cache);
        assert!("s3".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_hash_locator_validation() {
        let hex = content_digest_hex(b"abc");
        let uri = BackendKind::Cache.uri(&hex);
        assert_eq!(hash_locator(BackendKind::Cache, &uri).unwrap(), hex);
        assert!(hash_locator(BackendKind::Cache, "cache://zz").is_err());
        assert!(hash_locator(BackendKind::Cache, "cas://zz").is_err());
    }

    #[test]
    fn test_descriptor_json_shape() {
        let descriptor = ContentDescriptor::stored(BackendKind::Cache, "cache://x".into(), b"hi", "text/plain");
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["content_length"], 2);
        assert_eq!(json["metadata"]["storage_provider"], "cache");
        assert!(json.get("content_encoding").is_none());
        let back: ContentDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, descriptor);
    }
}
