//! # Envelope Module
//!
//! The unit of exchange and its wire format.
//!
//! ## Envelope Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              ENVELOPE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  version            u32, non-zero                                       │
//! │  content_hash       sha256(message) exactly as transmitted             │
//! │  message_type       CORE_MESSAGE | MULTIPART_MESSAGE_PART               │
//! │  encryption         NONE | PROTECTED | PUBLIC_KEY                       │
//! │  reply_to           optional envelope id                                │
//! │  public_references  [(content_hash, group_id)]  visible to everyone    │
//! │  access_grants      [(key_type, target_id, wrapped key)]                │
//! │  message            bytes (plaintext, ciphertext, or an encoded part)  │
//! │  metadata           string → string                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Send / Receive
//!
//! ```text
//!   CoreMessage + AccessPolicy
//!          │
//!          ▼  EnvelopeFactory::create
//!   seal ─► encode ─► fits limit? ── yes ─► Outbound::Single
//!                        │
//!                        no ─► split ─► part envelopes ─► Outbound::Multipart
//!
//!   bytes ─► EnvelopeIntake::receive
//!          decode ─► verify_integrity ─► part? ─► ChunkAssembler ─► decode inner
//!                                          │
//!                                          └─► open ─► ContextGraph::add_envelope
//! ```

pub mod codec;
mod factory;
mod intake;
mod types;

pub use codec::{
    check_transport_limit, decode, decode_core_message, decode_part, encode, encode_core_message,
    encode_part, envelope_id, verify_integrity,
};
pub use factory::{
    EnvelopeFactory, EnvelopeOptions, Outbound, META_CHUNK_INFO, META_MESSAGE_ID, META_TIMESTAMP,
};
pub use intake::{EnvelopeIntake, Received};
pub use types::{
    AccessGrant, ContextReference, CoreMessage, EncryptionMode, Envelope, KeyType, MessageType,
    Metadata, MultiPartMessagePart,
};

