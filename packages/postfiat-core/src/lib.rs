//! # PostFiat Core
//!
//! The envelope protocol: a self-describing, integrity-checked container
//! for messages exchanged over a size-constrained public transport, with
//! group-scoped access control and pluggable content-addressed storage.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       POSTFIAT CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │  Envelope   │  │  Chunking   │  │   Access    │  │    Graph     │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Codec     │  │ - Split     │  │ - Seal/Open │  │ - Nodes      │   │
//! │  │ - Factory   │  │ - Reassemble│  │ - Grants    │  │ - Edges      │   │
//! │  │ - Intake    │  │ - Assembler │  │ - Keyring   │  │ - Traversal  │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘   │
//! │         │                │                │                │           │
//! │         └────────────────┴────────────────┴────────────────┘           │
//! │                                   │                                     │
//! │  ┌─────────────┐  ┌─────────────────────────────────────────────────┐  │
//! │  │   Crypto    │  │                    Storage                      │  │
//! │  │             │  │                                                 │  │
//! │  │ - SHA-256   │  │ - Inline / Cache / Filesystem / IPFS backends   │  │
//! │  │ - AES-GCM   │  │ - ContentRouter (precedence + dedup)            │  │
//! │  │ - X25519    │  │ - EnvelopeStore (memory, SQLite)                │  │
//! │  └─────────────┘  └─────────────────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Protocol and storage settings
//! - [`crypto`] - Digests, authenticated encryption, key agreement
//! - [`envelope`] - Wire types, codec, outbound factory, inbound intake
//! - [`chunking`] - Multi-part split and reassembly
//! - [`access`] - Key wrapping and access policies
//! - [`graph`] - Context DAG and selective disclosure
//! - [`storage`] - Content backends and envelope persistence
//!
//! ## Security Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SECURITY LAYERS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Integrity: every envelope carries SHA-256(message); receivers check    │
//! │  it before anything else. Reassembled payloads are checked once more.   │
//! │                                                                         │
//! │  Confidentiality: protected messages are AES-256-GCM under a random     │
//! │  content key. The content key is wrapped under a group key; group keys  │
//! │  are wrapped per recipient via X25519 + HKDF.                           │
//! │                                                                         │
//! │  Revocation is forward-only: rotating a group key protects future       │
//! │  envelopes, never ones already published.                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod access;
pub mod chunking;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod graph;
pub mod storage;
pub mod time;

#[cfg(test)]
mod proptests;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use access::{AccessOutcome, AccessPolicy, GroupKey, KeyWrappingEngine, Keyring};
pub use chunking::ChunkAssembler;
pub use config::{ProtocolConfig, StorageConfig};
pub use crypto::RecipientKeyPair;
pub use envelope::{
    CoreMessage, EncryptionMode, Envelope, EnvelopeFactory, EnvelopeIntake, MessageType, Outbound,
    Received,
};
pub use error::{Error, Result};
pub use graph::ContextGraph;
pub use storage::{ContentDescriptor, ContentRouter, EnvelopeStore};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of PostFiat Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns the envelope format version written by default
pub fn protocol_version() -> u32 {
    config::PROTOCOL_VERSION
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert_eq!(protocol_version(), ProtocolConfig::default().protocol_version);
    }
}
