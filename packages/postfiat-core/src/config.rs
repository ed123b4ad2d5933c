//! Protocol and storage configuration.
//!
//! Nothing in the core reads the environment; callers build these structs
//! (the gateway maps its CLI flags onto them) and hand them to components.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Envelope format version emitted by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default transport ceiling, sized for a 1 KiB ledger memo.
pub const DEFAULT_MAX_ENVELOPE_SIZE: usize = 1024;

/// Default size below which content is kept inline in its descriptor.
pub const DEFAULT_INLINE_THRESHOLD: usize = 512;

/// Default idle time before a partial message is evicted (5 minutes).
pub const DEFAULT_REASSEMBLY_TIMEOUT_SECS: u64 = 300;

/// Default ceiling on concurrently assembling messages.
pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 1024;

/// Default ceiling on `total_parts` accepted from the wire.
pub const DEFAULT_MAX_PARTS_PER_MESSAGE: u32 = 4096;

/// Protocol-level knobs shared by the factory, intake and assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Envelope version written into new envelopes
    pub protocol_version: u32,
    /// Maximum encoded envelope size the transport accepts
    pub max_envelope_size: usize,
    /// Idle timeout for partially received messages
    pub reassembly_timeout_secs: u64,
    /// Maximum messages held in partial state at once
    pub max_pending_messages: usize,
    /// Maximum `total_parts` a single message may declare
    pub max_parts_per_message: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            max_envelope_size: DEFAULT_MAX_ENVELOPE_SIZE,
            reassembly_timeout_secs: DEFAULT_REASSEMBLY_TIMEOUT_SECS,
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
            max_parts_per_message: DEFAULT_MAX_PARTS_PER_MESSAGE,
        }
    }
}

impl ProtocolConfig {
    /// Reassembly idle timeout as a `Duration`
    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_secs(self.reassembly_timeout_secs)
    }
}

/// Which content backends to register and how to reach them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Content at or below this size is stored inline (0 disables inline)
    pub inline_threshold: usize,
    /// Register the in-memory cache backend
    pub enable_cache: bool,
    /// Root directory of the filesystem content store, if any
    pub data_dir: Option<PathBuf>,
    /// Base URL of an IPFS HTTP API (e.g. `http://127.0.0.1:5001`), if any
    pub ipfs_api_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StorageConfig {
    /// Inline and cache only; suitable for tests and ephemeral gateways.
    pub fn in_memory() -> Self {
        Self {
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            enable_cache: true,
            data_dir: None,
            ipfs_api_url: None,
        }
    }
}
