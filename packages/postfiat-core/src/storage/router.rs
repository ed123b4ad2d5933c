//! Routes content across registered backends.

use std::sync::Arc;

use dashmap::DashMap;

use super::{
    verify_content, BackendKind, CacheStorage, ContentDescriptor, ContentStorage,
    FilesystemStorage, InlineStorage, IpfsStorage,
};
use crate::config::StorageConfig;
use crate::crypto::content_digest_hex;
use crate::error::{Error, Result};

/// Composite store over the backend registry
///
/// Writes go to the preferred backend when it is registered and takes the
/// size, otherwise to the first backend in [`BackendKind::PRECEDENCE`] that
/// does. Identical bytes are written once: the second store returns the
/// first descriptor.
#[derive(Default)]
pub struct ContentRouter {
    backends: Vec<Arc<dyn ContentStorage>>,
    index: DashMap<String, ContentDescriptor>,
}

impl ContentRouter {
    /// Router with no backends
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any earlier one of the same kind
    pub fn with_backend(mut self, backend: Arc<dyn ContentStorage>) -> Self {
        self.register(backend);
        self
    }

    /// Register a backend in place
    pub fn register(&mut self, backend: Arc<dyn ContentStorage>) {
        let kind = backend.kind();
        self.backends.retain(|b| b.kind() != kind);
        self.backends.push(backend);
        self.backends.sort_by_key(|b| b.kind().rank());
        tracing::debug!(backend = kind.name(), "Registered storage backend");
    }

    /// Build the backends a [`StorageConfig`] asks for
    ///
    /// Inline is always present; the cache when enabled; the filesystem
    /// when a data dir is set (under `{data_dir}/content`); IPFS when an API
    /// URL is set.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let mut router = Self::new().with_backend(Arc::new(InlineStorage::new(config.inline_threshold)));
        if config.enable_cache {
            router.register(Arc::new(CacheStorage::new()));
        }
        if let Some(dir) = &config.data_dir {
            router.register(Arc::new(FilesystemStorage::open(dir.join("content")).await?));
        }
        if let Some(url) = &config.ipfs_api_url {
            router.register(Arc::new(IpfsStorage::new(url.clone())?));
        }
        tracing::info!(backends = ?router.backend_info(), "Content router ready");
        Ok(router)
    }

    /// Registered kinds, in precedence order
    pub fn backend_info(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// The registered backend of a kind
    pub fn backend(&self, kind: BackendKind) -> Option<&Arc<dyn ContentStorage>> {
        self.backends.iter().find(|b| b.kind() == kind)
    }

    /// Kind of the backend that handles `uri`
    pub fn handler_for(&self, uri: &str) -> Option<BackendKind> {
        self.backends.iter().find(|b| b.can_handle(uri)).map(|b| b.kind())
    }

    /// True if any registered backend handles `uri`
    pub fn can_handle(&self, uri: &str) -> bool {
        self.backends.iter().any(|b| b.can_handle(uri))
    }

    fn select(&self, len: usize, preferred: Option<BackendKind>) -> Result<&Arc<dyn ContentStorage>> {
        if let Some(kind) = preferred {
            match self.backend(kind) {
                Some(backend) if backend.accepts(len) => return Ok(backend),
                Some(_) => tracing::debug!(
                    preferred = kind.name(),
                    size = len,
                    "Preferred backend declines size, falling back"
                ),
                None => tracing::debug!(preferred = kind.name(), "Preferred backend not registered"),
            }
        }
        self.backends
            .iter()
            .find(|b| b.accepts(len))
            .ok_or_else(|| Error::InvalidInput(format!("no registered backend accepts {} bytes", len)))
    }

    fn route(&self, uri: &str) -> Result<&Arc<dyn ContentStorage>> {
        self.backends
            .iter()
            .find(|b| b.can_handle(uri))
            .ok_or_else(|| Error::UnsupportedStorage(uri.to_string()))
    }

    /// Store content, reusing an existing descriptor for identical bytes
    pub async fn store(
        &self,
        content: &[u8],
        content_type: &str,
        preferred: Option<BackendKind>,
    ) -> Result<ContentDescriptor> {
        let hash = content_digest_hex(content);
        if let Some(existing) = self.index.get(&hash) {
            tracing::debug!(hash = hash.as_str(), uri = existing.uri.as_str(), "Dedup hit");
            return Ok(existing.clone());
        }

        let backend = self.select(content.len(), preferred)?;
        tracing::debug!(
            backend = backend.kind().name(),
            size = content.len(),
            "Routing content store"
        );
        let descriptor = backend.store(content, content_type).await?;

        // A concurrent store of the same bytes may have won; keep the first
        let stored = self.index.entry(hash).or_insert(descriptor).value().clone();
        tracing::info!(
            uri = stored.uri.as_str(),
            size = content.len(),
            "Stored content"
        );
        Ok(stored)
    }

    /// Fetch content and check it against the descriptor's digest
    pub async fn retrieve(&self, descriptor: &ContentDescriptor) -> Result<Vec<u8>> {
        let backend = self.route(&descriptor.uri)?;
        let content = backend.retrieve(descriptor).await?;
        if let Some(expected) = &descriptor.content_hash {
            verify_content(backend.kind(), &descriptor.uri, &content, expected)?;
        }
        Ok(content)
    }

    /// Delete content through the backend that handles it
    pub async fn delete(&self, descriptor: &ContentDescriptor) -> Result<()> {
        let backend = self.route(&descriptor.uri)?;
        backend.delete(descriptor).await?;
        self.index.retain(|_, d| d.uri != descriptor.uri);
        tracing::info!(uri = descriptor.uri.as_str(), "Deleted content");
        Ok(())
    }
}
