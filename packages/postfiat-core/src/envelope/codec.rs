//! # Envelope Codec
//!
//! Protobuf serialization of envelopes and their inner messages, plus the
//! integrity and size checks that sit right next to it.
//!
//! ## Wire Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Envelope                                                               │
//! ├──────┬──────────────────────┬───────────────────────────────────────────┤
//! │  tag │ field                │ type                                      │
//! ├──────┼──────────────────────┼───────────────────────────────────────────┤
//! │   1  │ version              │ uint32                                    │
//! │   2  │ content_hash         │ bytes                                     │
//! │   3  │ message_type         │ enum MessageType                          │
//! │   4  │ encryption           │ enum EncryptionMode                       │
//! │   5  │ reply_to             │ optional string                           │
//! │   6  │ public_references    │ repeated ContextReference                 │
//! │   7  │ access_grants        │ repeated AccessGrant                      │
//! │   8  │ message              │ bytes                                     │
//! │   9  │ metadata             │ map<string, string>                       │
//! └──────┴──────────────────────┴───────────────────────────────────────────┘
//! ```
//!
//! Tag numbers are a compatibility contract: never reassign one, only add.
//!
//! Maps go on the wire as repeated `{key = 1, value = 2}` entries, which is
//! exactly how protobuf encodes `map<string, string>`. Decoding them as a
//! list (rather than straight into a hash map) keeps insertion order and
//! lets a repeated key be reported instead of silently overwritten.
//!
//! `decode` does not check `content_hash`. Call [`verify_integrity`]
//! explicitly before trusting `message`.

use prost::Message;

use super::types::{
    AccessGrant, ContextReference, CoreMessage, EncryptionMode, Envelope, KeyType, MessageType,
    Metadata, MultiPartMessagePart,
};
use crate::crypto::{content_digest, content_digest_hex, digests_match};
use crate::error::{Error, Result};

// ============================================================================
// PROTOBUF MESSAGES
// ============================================================================

#[derive(Clone, PartialEq, Message)]
struct PbContextReference {
    #[prost(bytes = "vec", tag = "1")]
    content_hash: Vec<u8>,
    #[prost(string, tag = "2")]
    group_id: String,
}

#[derive(Clone, PartialEq, Message)]
struct PbAccessGrant {
    #[prost(int32, tag = "1")]
    key_type: i32,
    #[prost(string, tag = "2")]
    target_id: String,
    #[prost(bytes = "vec", tag = "3")]
    encrypted_key_material: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
struct PbMetadataEntry {
    #[prost(string, tag = "1")]
    key: String,
    #[prost(string, tag = "2")]
    value: String,
}

#[derive(Clone, PartialEq, Message)]
struct PbCoreMessage {
    #[prost(string, tag = "1")]
    content: String,
    #[prost(message, repeated, tag = "2")]
    context_references: Vec<PbContextReference>,
    #[prost(message, repeated, tag = "3")]
    metadata: Vec<PbMetadataEntry>,
}

#[derive(Clone, PartialEq, Message)]
struct PbMultiPartMessagePart {
    #[prost(string, tag = "1")]
    message_id: String,
    #[prost(uint32, tag = "2")]
    part_number: u32,
    #[prost(uint32, tag = "3")]
    total_parts: u32,
    #[prost(bytes = "vec", tag = "4")]
    content: Vec<u8>,
    #[prost(string, tag = "5")]
    complete_message_hash: String,
}

#[derive(Clone, PartialEq, Message)]
struct PbEnvelope {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(bytes = "vec", tag = "2")]
    content_hash: Vec<u8>,
    #[prost(int32, tag = "3")]
    message_type: i32,
    #[prost(int32, tag = "4")]
    encryption: i32,
    #[prost(string, optional, tag = "5")]
    reply_to: Option<String>,
    #[prost(message, repeated, tag = "6")]
    public_references: Vec<PbContextReference>,
    #[prost(message, repeated, tag = "7")]
    access_grants: Vec<PbAccessGrant>,
    #[prost(bytes = "vec", tag = "8")]
    message: Vec<u8>,
    #[prost(message, repeated, tag = "9")]
    metadata: Vec<PbMetadataEntry>,
}

// ============================================================================
// STRUCTURAL VALIDATION
// ============================================================================

/// First structural violation in an envelope, if any
///
/// Shared by `encode` (reported as `Schema`) and `decode` (reported as
/// `MalformedEnvelope`).
fn envelope_violation(envelope: &Envelope) -> Option<String> {
    if envelope.version == 0 {
        return Some("version must be non-zero".into());
    }
    if envelope.content_hash.is_empty() {
        return Some("content_hash is required".into());
    }
    if envelope.encryption == EncryptionMode::None && !envelope.access_grants.is_empty() {
        return Some("unencrypted envelope must not carry access grants".into());
    }
    if let Some(reason) = references_violation(&envelope.public_references) {
        return Some(format!("public_references: {}", reason));
    }
    for (i, grant) in envelope.access_grants.iter().enumerate() {
        if grant.target_id.is_empty() {
            return Some(format!("access_grants[{}]: target_id is required", i));
        }
        if grant.encrypted_key_material.is_empty() {
            return Some(format!("access_grants[{}]: encrypted_key_material is required", i));
        }
    }
    if let Some(key) = envelope.metadata.first_duplicate() {
        return Some(format!("metadata key '{}' repeats", key));
    }
    None
}

fn references_violation(references: &[ContextReference]) -> Option<String> {
    references.iter().enumerate().find_map(|(i, r)| {
        if r.content_hash.is_empty() {
            Some(format!("[{}] content_hash is required", i))
        } else if r.group_id.is_empty() {
            Some(format!("[{}] group_id is required", i))
        } else {
            None
        }
    })
}

fn core_message_violation(message: &CoreMessage) -> Option<String> {
    if let Some(reason) = references_violation(&message.context_references) {
        return Some(format!("context_references: {}", reason));
    }
    message
        .metadata
        .first_duplicate()
        .map(|key| format!("metadata key '{}' repeats", key))
}

// ============================================================================
// CONVERSIONS
// ============================================================================

fn reference_to_pb(r: &ContextReference) -> PbContextReference {
    PbContextReference {
        content_hash: r.content_hash.clone(),
        group_id: r.group_id.clone(),
    }
}

fn reference_from_pb(pb: PbContextReference) -> ContextReference {
    ContextReference {
        content_hash: pb.content_hash,
        group_id: pb.group_id,
    }
}

fn metadata_to_pb(metadata: &Metadata) -> Vec<PbMetadataEntry> {
    metadata
        .iter()
        .map(|(k, v)| PbMetadataEntry {
            key: k.to_string(),
            value: v.to_string(),
        })
        .collect()
}

fn metadata_from_pb(entries: Vec<PbMetadataEntry>) -> Result<Metadata> {
    let metadata =
        Metadata::from_pairs_unchecked(entries.into_iter().map(|e| (e.key, e.value)).collect());
    if let Some(key) = metadata.first_duplicate() {
        return Err(Error::MalformedEnvelope(format!("metadata key '{}' repeats", key)));
    }
    Ok(metadata)
}

fn envelope_to_pb(envelope: &Envelope) -> PbEnvelope {
    PbEnvelope {
        version: envelope.version,
        content_hash: envelope.content_hash.clone(),
        message_type: envelope.message_type.as_i32(),
        encryption: envelope.encryption.as_i32(),
        reply_to: envelope.reply_to.clone(),
        public_references: envelope.public_references.iter().map(reference_to_pb).collect(),
        access_grants: envelope
            .access_grants
            .iter()
            .map(|g| PbAccessGrant {
                key_type: g.key_type.as_i32(),
                target_id: g.target_id.clone(),
                encrypted_key_material: g.encrypted_key_material.clone(),
            })
            .collect(),
        message: envelope.message.clone(),
        metadata: metadata_to_pb(&envelope.metadata),
    }
}

fn envelope_from_pb(pb: PbEnvelope) -> Result<Envelope> {
    let message_type = MessageType::from_i32(pb.message_type).ok_or_else(|| {
        Error::MalformedEnvelope(format!("unknown message_type {}", pb.message_type))
    })?;
    let encryption = EncryptionMode::from_i32(pb.encryption).ok_or_else(|| {
        Error::MalformedEnvelope(format!("unknown encryption mode {}", pb.encryption))
    })?;

    let access_grants = pb
        .access_grants
        .into_iter()
        .map(|g| {
            let key_type = KeyType::from_i32(g.key_type).ok_or_else(|| {
                Error::MalformedEnvelope(format!("unknown key_type {}", g.key_type))
            })?;
            Ok(AccessGrant {
                key_type,
                target_id: g.target_id,
                encrypted_key_material: g.encrypted_key_material,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Envelope {
        version: pb.version,
        content_hash: pb.content_hash,
        message_type,
        encryption,
        reply_to: pb.reply_to,
        public_references: pb.public_references.into_iter().map(reference_from_pb).collect(),
        access_grants,
        message: pb.message,
        metadata: metadata_from_pb(pb.metadata)?,
    })
}

// ============================================================================
// ENVELOPE OPERATIONS
// ============================================================================

/// Serialize an envelope
///
/// Deterministic: equal envelopes with equal metadata order produce
/// identical bytes.
///
/// ## Errors
///
/// `Schema` when a required field is missing, a grant or reference is
/// empty, or a metadata key repeats.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    if let Some(reason) = envelope_violation(envelope) {
        return Err(Error::Schema(reason));
    }
    Ok(envelope_to_pb(envelope).encode_to_vec())
}

/// Deserialize an envelope without verifying its content hash
///
/// ## Errors
///
/// `MalformedEnvelope` when the bytes are not a valid protobuf envelope,
/// carry an unknown enum value, repeat a metadata key, or violate the same
/// structural rules `encode` enforces.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let pb = PbEnvelope::decode(bytes)?;
    let envelope = envelope_from_pb(pb)?;
    if let Some(reason) = envelope_violation(&envelope) {
        return Err(Error::MalformedEnvelope(reason));
    }
    Ok(envelope)
}

/// Check `content_hash` against the digest of `message`
///
/// The comparison does not short-circuit on the first differing byte.
pub fn verify_integrity(envelope: &Envelope) -> Result<()> {
    let computed = content_digest(&envelope.message);
    if digests_match(&computed, &envelope.content_hash) {
        Ok(())
    } else {
        tracing::warn!(
            declared = %envelope.content_hash_hex(),
            "Envelope content hash mismatch"
        );
        Err(Error::Integrity(format!(
            "content_hash {} does not match message digest {}",
            envelope.content_hash_hex(),
            hex::encode(computed)
        )))
    }
}

/// Reject an encoded envelope larger than the transport accepts
pub fn check_transport_limit(bytes: &[u8], max: usize) -> Result<()> {
    if bytes.len() > max {
        return Err(Error::EnvelopeTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(())
}

/// Storage identity of an encoded envelope: hex SHA-256 of its bytes
pub fn envelope_id(bytes: &[u8]) -> String {
    content_digest_hex(bytes)
}

// ============================================================================
// INNER MESSAGES
// ============================================================================

/// Serialize a core message
pub fn encode_core_message(message: &CoreMessage) -> Result<Vec<u8>> {
    if let Some(reason) = core_message_violation(message) {
        return Err(Error::Schema(reason));
    }
    let pb = PbCoreMessage {
        content: message.content.clone(),
        context_references: message.context_references.iter().map(reference_to_pb).collect(),
        metadata: metadata_to_pb(&message.metadata),
    };
    Ok(pb.encode_to_vec())
}

/// Deserialize a core message
pub fn decode_core_message(bytes: &[u8]) -> Result<CoreMessage> {
    let pb = PbCoreMessage::decode(bytes)?;
    let message = CoreMessage {
        content: pb.content,
        context_references: pb.context_references.into_iter().map(reference_from_pb).collect(),
        metadata: metadata_from_pb(pb.metadata)?,
    };
    if let Some(reason) = core_message_violation(&message) {
        return Err(Error::MalformedEnvelope(reason));
    }
    Ok(message)
}

/// Serialize a multi-part slice
pub fn encode_part(part: &MultiPartMessagePart) -> Result<Vec<u8>> {
    if part.message_id.is_empty() {
        return Err(Error::Schema("part message_id is required".into()));
    }
    if part.total_parts == 0 {
        return Err(Error::Schema("part total_parts must be non-zero".into()));
    }
    let pb = PbMultiPartMessagePart {
        message_id: part.message_id.clone(),
        part_number: part.part_number,
        total_parts: part.total_parts,
        content: part.content.clone(),
        complete_message_hash: part.complete_message_hash.clone(),
    };
    Ok(pb.encode_to_vec())
}

/// Deserialize a multi-part slice
///
/// Range checks against `total_parts` are left to the assembler, which
/// reports them as reassembly errors.
pub fn decode_part(bytes: &[u8]) -> Result<MultiPartMessagePart> {
    let pb = PbMultiPartMessagePart::decode(bytes)?;
    if pb.message_id.is_empty() {
        return Err(Error::MalformedEnvelope("part message_id is required".into()));
    }
    if pb.complete_message_hash.is_empty() {
        return Err(Error::MalformedEnvelope("part complete_message_hash is required".into()));
    }
    Ok(MultiPartMessagePart {
        message_id: pb.message_id,
        part_number: pb.part_number,
        total_parts: pb.total_parts,
        content: pb.content,
        complete_message_hash: pb.complete_message_hash,
    })
}

// ============================================================================
// TESTS
// ============================================================================
