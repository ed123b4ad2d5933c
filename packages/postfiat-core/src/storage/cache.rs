//! In-process content cache keyed by digest.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{hash_locator, verify_content, BackendKind, ContentDescriptor, ContentStorage};
use crate::crypto::content_digest_hex;
use crate::error::{Error, Result};

/// Largest blob the cache takes by default (1 MiB)
pub const DEFAULT_MAX_ENTRY_SIZE: usize = 1024 * 1024;

/// DashMap-backed content cache
///
/// Fills the role a shared key-value store (e.g. Redis) would play in a
/// multi-process deployment. Clones share the same map.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    entries: Arc<DashMap<String, Arc<Vec<u8>>>>,
    max_entry_size: usize,
}

impl CacheStorage {
    /// Empty cache with the default entry limit
    pub fn new() -> Self {
        Self::with_max_entry_size(DEFAULT_MAX_ENTRY_SIZE)
    }

    /// Empty cache taking blobs up to `max_entry_size` bytes
    pub fn with_max_entry_size(max_entry_size: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entry_size,
        }
    }

    /// Number of cached blobs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStorage for CacheStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Cache
    }

    async fn store(&self, content: &[u8], content_type: &str) -> Result<ContentDescriptor> {
        if !self.accepts(content.len()) {
            return Err(Error::backend(
                self.kind(),
                format!("{} bytes exceeds cache entry limit {}", content.len(), self.max_entry_size),
            ));
        }
        let hash = content_digest_hex(content);
        self.entries
            .entry(hash.clone())
            .or_insert_with(|| Arc::new(content.to_vec()));
        Ok(ContentDescriptor::stored(
            self.kind(),
            self.kind().uri(&hash),
            content,
            content_type,
        ))
    }

    async fn retrieve(&self, descriptor: &ContentDescriptor) -> Result<Vec<u8>> {
        let hash = hash_locator(self.kind(), &descriptor.uri)?;
        let content = self
            .entries
            .get(&hash)
            .map(|entry| entry.value().as_ref().clone())
            .ok_or_else(|| Error::not_found(self.kind(), descriptor.uri.clone()))?;
        verify_content(self.kind(), &descriptor.uri, &content, &hash)?;
        Ok(content)
    }

    fn accepts(&self, len: usize) -> bool {
        len <= self.max_entry_size
    }

    async fn delete(&self, descriptor: &ContentDescriptor) -> Result<()> {
        let hash = hash_locator(self.kind(), &descriptor.uri)?;
        self.entries
            .remove(&hash)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(self.kind(), descriptor.uri.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_retrieve_delete() {
        let cache = CacheStorage::new();
        let descriptor = cache.store(b"cached bytes", "application/octet-stream").await.unwrap();
        assert!(descriptor.uri.starts_with("cache://"));
        assert_eq!(cache.retrieve(&descriptor).await.unwrap(), b"cached bytes");

        cache.delete(&descriptor).await.unwrap();
        assert!(cache.is_empty());
        assert!(cache.retrieve(&descriptor).await.unwrap_err().is_not_found());
        assert!(cache.delete(&descriptor).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_same_bytes_same_uri() {
        let cache = CacheStorage::new();
        let a = cache.store(b"dup", "text/plain").await.unwrap();
        let b = cache.store(b"dup", "text/plain").await.unwrap();
        assert_eq!(a.uri, b.uri);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_entry_limit() {
        let cache = CacheStorage::with_max_entry_size(2);
        assert!(!cache.accepts(3));
        assert!(cache.store(b"abc", "text/plain").await.is_err());
    }
}
