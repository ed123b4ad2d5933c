//! Server state management.
//!
//! Holds the content router, the envelope store and the reassembly buffer
//! for part envelopes. Everything is constructed here and shared by clone.

use std::path::PathBuf;
use std::sync::Arc;

use postfiat_core::config::{DEFAULT_INLINE_THRESHOLD, DEFAULT_MAX_ENVELOPE_SIZE};
use postfiat_core::storage::{MemoryEnvelopeStore, SqliteEnvelopeStore};
use postfiat_core::{ChunkAssembler, ContentRouter, EnvelopeStore, ProtocolConfig, StorageConfig};

/// Default cleanup interval in seconds.
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// File name of the envelope database inside the data dir.
const ENVELOPE_DB_FILE: &str = "envelopes.db";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    /// Root for the envelope database and filesystem content; memory only when unset
    pub data_dir: Option<PathBuf>,
    pub ipfs_api_url: Option<String>,
    pub max_envelope_size: usize,
    pub inline_threshold: usize,
    pub enable_cache: bool,
    pub reassembly_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: None,
            ipfs_api_url: None,
            max_envelope_size: DEFAULT_MAX_ENVELOPE_SIZE,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            enable_cache: true,
            reassembly_timeout_secs: ProtocolConfig::default().reassembly_timeout_secs,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

impl GatewayConfig {
    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            max_envelope_size: self.max_envelope_size,
            reassembly_timeout_secs: self.reassembly_timeout_secs,
            ..ProtocolConfig::default()
        }
    }

    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            inline_threshold: self.inline_threshold,
            enable_cache: self.enable_cache,
            data_dir: self.data_dir.clone(),
            ipfs_api_url: self.ipfs_api_url.clone(),
        }
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    /// Content blobs, routed across the configured backends.
    pub content: Arc<ContentRouter>,
    /// Whole envelopes, SQLite when a data dir is set.
    pub envelopes: Arc<dyn EnvelopeStore>,
    /// Part envelopes waiting for their siblings.
    pub assembler: Arc<ChunkAssembler>,
    pub started_at: i64,
}

impl GatewayState {
    /// Build every component the config asks for.
    pub async fn open(config: GatewayConfig) -> postfiat_core::Result<Self> {
        let content = ContentRouter::from_config(&config.storage()).await?;

        let envelopes: Arc<dyn EnvelopeStore> = match &config.data_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let path = dir.join(ENVELOPE_DB_FILE);
                let path = path.to_string_lossy();
                tracing::info!(path = %path, "Opening envelope database");
                Arc::new(SqliteEnvelopeStore::open(Some(&path)).await?)
            }
            None => {
                tracing::info!("No data dir configured, envelopes kept in memory");
                Arc::new(MemoryEnvelopeStore::new())
            }
        };

        let assembler = Arc::new(ChunkAssembler::new(&config.protocol()));

        Ok(Self {
            config: Arc::new(config),
            content: Arc::new(content),
            envelopes,
            assembler,
            started_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Drop reassembly state that has sat idle past the timeout.
    pub fn cleanup_expired(&self) -> usize {
        let evicted = self.assembler.evict_expired();
        if evicted > 0 {
            tracing::info!(evicted, "Evicted stale partial messages");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_envelope_size, 1024);
        assert_eq!(config.protocol().max_envelope_size, 1024);
        assert!(config.storage().enable_cache);
        assert!(config.storage().data_dir.is_none());
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let state = GatewayState::open(GatewayConfig::default()).await.unwrap();
        assert_eq!(state.assembler.pending_count(), 0);
        assert_eq!(state.cleanup_expired(), 0);
        assert!(state.content.can_handle("cache://00"));
    }

    #[tokio::test]
    async fn test_open_with_data_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = GatewayConfig {
            data_dir: Some(dir.path().join("gateway")),
            ..GatewayConfig::default()
        };
        let state = GatewayState::open(config).await.unwrap();
        assert!(dir.path().join("gateway").join(ENVELOPE_DB_FILE).exists());
        assert!(state.content.can_handle("cas://00"));
    }
}
