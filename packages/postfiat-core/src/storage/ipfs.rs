//! IPFS through a node's HTTP RPC API (`/api/v0/add`, `/api/v0/cat`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{BackendKind, ContentDescriptor, ContentStorage};
use crate::error::{Error, Result};

/// Default request timeout for the IPFS API
pub const DEFAULT_IPFS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

/// Content stored on an IPFS node
///
/// The CID is the locator; the router checks the SHA-256 recorded in the
/// descriptor after every fetch. Deletion (unpinning) is left to the node
/// operator.
#[derive(Debug, Clone)]
pub struct IpfsStorage {
    client: reqwest::Client,
    api_url: String,
}

impl IpfsStorage {
    /// Client for the node at `api_url` (e.g. `http://127.0.0.1:5001`)
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_url, DEFAULT_IPFS_TIMEOUT)
    }

    /// Client with a custom request timeout
    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::backend(BackendKind::Ipfs, format!("client setup failed: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL of the node API
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, path)
    }
}

#[async_trait]
impl ContentStorage for IpfsStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Ipfs
    }

    async fn store(&self, content: &[u8], content_type: &str) -> Result<ContentDescriptor> {
        let part = Part::bytes(content.to_vec())
            .file_name("content")
            .mime_str(content_type)
            .or_else(|_| Part::bytes(content.to_vec()).file_name("content").mime_str("application/octet-stream"))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.endpoint("add"))
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::backend(
                self.kind(),
                format!("add returned {}", response.status()),
            ));
        }
        let added: AddResponse = response.json().await?;

        tracing::info!(cid = added.hash.as_str(), size = content.len(), "Stored content on IPFS");

        let mut descriptor =
            ContentDescriptor::stored(self.kind(), self.kind().uri(&added.hash), content, content_type);
        descriptor.metadata.insert("gateway_url", self.api_url.clone());
        Ok(descriptor)
    }

    async fn retrieve(&self, descriptor: &ContentDescriptor) -> Result<Vec<u8>> {
        let cid = self
            .kind()
            .locator(&descriptor.uri)
            .ok_or_else(|| Error::InvalidInput(format!("not an ipfs URI: {}", descriptor.uri)))?;

        let response = self
            .client
            .post(self.endpoint("cat"))
            .query(&[("arg", cid)])
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(Error::not_found(self.kind(), descriptor.uri.clone())),
            status => {
                let body = response.text().await.unwrap_or_default();
                // Kubo answers 500 with "not found" style messages for unknown CIDs
                if body.contains("not found") || body.contains("no link named") {
                    Err(Error::not_found(self.kind(), descriptor.uri.clone()))
                } else {
                    Err(Error::backend(self.kind(), format!("cat returned {}: {}", status, body.trim())))
                }
            }
        }
    }
}
