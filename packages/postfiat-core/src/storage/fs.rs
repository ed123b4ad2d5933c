//! Content-addressed files on local disk.
//!
//! Layout: `{root}/{hash[0..2]}/{hash}`. Writes go to a temporary file in
//! the same directory and are renamed into place, so a reader never sees a
//! half-written blob.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{hash_locator, verify_content, BackendKind, ContentDescriptor, ContentStorage};
use crate::crypto::content_digest_hex;
use crate::error::{Error, Result};

/// Filesystem content store
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Store under `root`, creating it if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            Error::backend(
                BackendKind::Filesystem,
                format!("cannot create {}: {}", root.display(), e),
            )
        })?;
        tracing::info!(root = %root.display(), "Filesystem content store ready");
        Ok(Self { root })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[..2]).join(hash)
    }
}

#[async_trait]
impl ContentStorage for FilesystemStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    async fn store(&self, content: &[u8], content_type: &str) -> Result<ContentDescriptor> {
        let hash = content_digest_hex(content);
        let path = self.path_for(&hash);

        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(hash = hash.as_str(), "Content already on disk");
        } else {
            let dir = self.root.join(&hash[..2]);
            tokio::fs::create_dir_all(&dir).await?;
            let tmp = dir.join(format!(".{}.{}.tmp", hash, uuid::Uuid::new_v4()));
            tokio::fs::write(&tmp, content).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            tracing::debug!(hash = hash.as_str(), size = content.len(), "Wrote content file");
        }

        Ok(ContentDescriptor::stored(
            self.kind(),
            self.kind().uri(&hash),
            content,
            content_type,
        ))
    }

    async fn retrieve(&self, descriptor: &ContentDescriptor) -> Result<Vec<u8>> {
        let hash = hash_locator(self.kind(), &descriptor.uri)?;
        let content = match tokio::fs::read(self.path_for(&hash)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::not_found(self.kind(), descriptor.uri.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        verify_content(self.kind(), &descriptor.uri, &content, &hash)?;
        Ok(content)
    }

    async fn delete(&self, descriptor: &ContentDescriptor) -> Result<()> {
        let hash = hash_locator(self.kind(), &descriptor.uri)?;
        match tokio::fs::remove_file(self.path_for(&hash)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::not_found(self.kind(), descriptor.uri.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
