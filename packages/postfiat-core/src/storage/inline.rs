//! Inline storage: the descriptor is the storage.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::{
    hash_locator, verify_content, BackendKind, ContentDescriptor, ContentStorage,
    META_CONTENT_DATA,
};
use crate::config::DEFAULT_INLINE_THRESHOLD;
use crate::crypto::content_digest_hex;
use crate::error::{Error, Result};

/// Embeds small content, base64-encoded, in descriptor metadata
#[derive(Debug, Clone)]
pub struct InlineStorage {
    threshold: usize,
}

impl InlineStorage {
    /// Accept content up to `threshold` bytes
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Size limit in bytes
    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl Default for InlineStorage {
    fn default() -> Self {
        Self::new(DEFAULT_INLINE_THRESHOLD)
    }
}

#[async_trait]
impl ContentStorage for InlineStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Inline
    }

    async fn store(&self, content: &[u8], content_type: &str) -> Result<ContentDescriptor> {
        if !self.accepts(content.len()) {
            return Err(Error::backend(
                self.kind(),
                format!("{} bytes exceeds inline threshold {}", content.len(), self.threshold),
            ));
        }
        let uri = self.kind().uri(&content_digest_hex(content));
        let mut descriptor = ContentDescriptor::stored(self.kind(), uri, content, content_type);
        descriptor.metadata.insert(META_CONTENT_DATA, BASE64.encode(content));
        Ok(descriptor)
    }

    async fn retrieve(&self, descriptor: &ContentDescriptor) -> Result<Vec<u8>> {
        let expected = hash_locator(self.kind(), &descriptor.uri)?;
        let encoded = descriptor
            .metadata
            .get(META_CONTENT_DATA)
            .ok_or_else(|| Error::not_found(self.kind(), descriptor.uri.clone()))?;
        let content = BASE64
            .decode(encoded)
            .map_err(|e| Error::backend(self.kind(), format!("invalid inline data: {}", e)))?;
        verify_content(self.kind(), &descriptor.uri, &content, &expected)?;
        Ok(content)
    }

    fn accepts(&self, len: usize) -> bool {
        len <= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let storage = InlineStorage::default();
        let descriptor = storage.store(b"small note", "text/plain").await.unwrap();
        assert!(descriptor.uri.starts_with("inline://"));
        assert_eq!(descriptor.storage_provider(), Some("inline"));
        assert_eq!(storage.retrieve(&descriptor).await.unwrap(), b"small note");
    }

    #[tokio::test]
    async fn test_threshold() {
        let storage = InlineStorage::new(4);
        assert!(storage.accepts(4));
        assert!(!storage.accepts(5));
        assert!(storage.store(b"12345", "text/plain").await.is_err());
    }

    #[tokio::test]
    async fn test_tampered_inline_data() {
        let storage = InlineStorage::default();
        let mut descriptor = storage.store(b"original", "text/plain").await.unwrap();
        descriptor.metadata.insert(META_CONTENT_DATA, BASE64.encode(b"forged"));
        assert!(matches!(storage.retrieve(&descriptor).await, Err(Error::Integrity(_))));
    }

    #[tokio::test]
    async fn test_missing_data_and_delete() {
        let storage = InlineStorage::default();
        let mut descriptor = storage.store(b"x", "text/plain").await.unwrap();
        descriptor.metadata.remove(META_CONTENT_DATA);
        assert!(storage.retrieve(&descriptor).await.unwrap_err().is_not_found());
        assert!(matches!(
            storage.delete(&descriptor).await,
            Err(Error::Unimplemented { .. })
        ));
    }
}
