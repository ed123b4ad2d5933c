//! Outbound side: seal a message, then fit it to the transport.

use chrono::{SecondsFormat, Utc};

use super::codec::{check_transport_limit, encode, encode_part};
use super::types::{
    ContextReference, CoreMessage, EncryptionMode, Envelope, MessageType, Metadata,
    MultiPartMessagePart,
};
use crate::access::{AccessPolicy, KeyWrappingEngine};
use crate::chunking::split;
use crate::config::ProtocolConfig;
use crate::crypto::{content_digest, content_digest_hex};
use crate::error::{Error, Result};

/// Metadata key naming the multi-part message a slice belongs to
pub const META_MESSAGE_ID: &str = "message_id";
/// Metadata key with a human-readable `part_{n}_of_{total}` label
pub const META_CHUNK_INFO: &str = "chunk_info";
/// Metadata key with the creation time (RFC 3339, UTC)
pub const META_TIMESTAMP: &str = "timestamp";

// Length prefixes grow as content is added to an empty part
const FRAMING_SLACK: usize = 16;

/// Envelope fields outside the sealed message
#[derive(Debug, Clone, Default)]
pub struct EnvelopeOptions {
    /// Envelope this one answers
    pub reply_to: Option<String>,
    /// References anyone may see
    pub public_references: Vec<ContextReference>,
    /// Envelope metadata; `timestamp` is filled in when absent
    pub metadata: Metadata,
}

/// Envelopes ready for the transport, with their encoded bytes
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Fits in one transport unit
    Single(Envelope, Vec<u8>),
    /// Split across part envelopes
    Multipart {
        /// Shared id of the parts
        message_id: String,
        /// Part envelopes in part order
        parts: Vec<(Envelope, Vec<u8>)>,
    },
}

impl Outbound {
    /// Encoded frames in send order
    pub fn frames(&self) -> Vec<&[u8]> {
        match self {
            Outbound::Single(_, bytes) => vec![bytes.as_slice()],
            Outbound::Multipart { parts, .. } => parts.iter().map(|(_, b)| b.as_slice()).collect(),
        }
    }

    /// Number of transport units
    pub fn len(&self) -> usize {
        match self {
            Outbound::Single(..) => 1,
            Outbound::Multipart { parts, .. } => parts.len(),
        }
    }

    /// Always false; an outbound message has at least one frame
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Builds envelopes that respect the transport size limit
#[derive(Debug, Clone)]
pub struct EnvelopeFactory {
    config: ProtocolConfig,
    engine: KeyWrappingEngine,
}

impl EnvelopeFactory {
    /// Create a factory
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            engine: KeyWrappingEngine::new(),
        }
    }

    /// Protocol settings in use
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Seal `message` under `policy` and package it for the transport
    ///
    /// A message whose encoded envelope exceeds `max_envelope_size` is
    /// split: the encoded envelope becomes the payload of part envelopes
    /// (mode NONE, `MULTIPART_MESSAGE_PART`), each carrying the caller's
    /// metadata plus `message_id` and `chunk_info`.
    pub fn create(
        &self,
        message: &CoreMessage,
        policy: &AccessPolicy,
        options: EnvelopeOptions,
    ) -> Result<Outbound> {
        let sealed = self.engine.seal(message, policy)?;

        let mut metadata = options.metadata;
        if metadata.get(META_TIMESTAMP).is_none() {
            metadata.insert(
                META_TIMESTAMP,
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            );
        }

        let envelope = Envelope {
            version: self.config.protocol_version,
            content_hash: sealed.content_hash,
            message_type: MessageType::CoreMessage,
            encryption: sealed.encryption,
            reply_to: options.reply_to,
            public_references: options.public_references,
            access_grants: sealed.access_grants,
            message: sealed.message,
            metadata,
        };
        let bytes = encode(&envelope)?;

        if bytes.len() <= self.config.max_envelope_size {
            tracing::debug!(
                size = bytes.len(),
                content_hash = %envelope.content_hash_hex(),
                "Created single envelope"
            );
            return Ok(Outbound::Single(envelope, bytes));
        }

        let message_id = uuid::Uuid::new_v4().to_string();
        let part_size = self.max_part_payload(&message_id, &envelope.metadata)?;
        let parts = split(&message_id, &bytes, part_size)?;
        let total = parts.len();

        let mut framed = Vec::with_capacity(total);
        for part in &parts {
            let part_envelope = self.part_envelope(part, &envelope.metadata)?;
            let part_bytes = encode(&part_envelope)?;
            check_transport_limit(&part_bytes, self.config.max_envelope_size)?;
            framed.push((part_envelope, part_bytes));
        }

        tracing::info!(
            message_id = message_id.as_str(),
            size = bytes.len(),
            parts = total,
            part_size,
            "Split envelope into parts"
        );

        Ok(Outbound::Multipart {
            message_id,
            parts: framed,
        })
    }

    /// Wrap one slice in its own envelope
    fn part_envelope(&self, part: &MultiPartMessagePart, metadata: &Metadata) -> Result<Envelope> {
        let message = encode_part(part)?;
        let mut part_metadata = metadata.clone();
        part_metadata.insert(META_MESSAGE_ID, part.message_id.clone());
        part_metadata.insert(
            META_CHUNK_INFO,
            format!("part_{}_of_{}", part.part_number + 1, part.total_parts),
        );
        Ok(Envelope {
            version: self.config.protocol_version,
            content_hash: content_digest(&message).to_vec(),
            message_type: MessageType::MultipartMessagePart,
            encryption: EncryptionMode::None,
            reply_to: None,
            public_references: Vec::new(),
            access_grants: Vec::new(),
            message,
            metadata: part_metadata,
        })
    }

    /// Largest slice that still fits a part envelope under the limit
    ///
    /// Measured from an empty part with worst-case numbering, so every real
    /// part of the message is no larger.
    pub fn max_part_payload(&self, message_id: &str, metadata: &Metadata) -> Result<usize> {
        let probe = MultiPartMessagePart {
            message_id: message_id.to_string(),
            part_number: u32::MAX - 1,
            total_parts: u32::MAX,
            content: Vec::new(),
            complete_message_hash: content_digest_hex(&[]),
        };
        let mut probe_envelope = self.part_envelope(&probe, metadata)?;
        probe_envelope.metadata.insert(
            META_CHUNK_INFO,
            format!("part_{}_of_{}", u32::MAX, u32::MAX),
        );
        let overhead = encode(&probe_envelope)?.len() + FRAMING_SLACK;

        match self.config.max_envelope_size.checked_sub(overhead) {
            Some(room) if room > 0 => Ok(room),
            _ => Err(Error::InvalidPartSize(format!(
                "max envelope size {} leaves no room for part content (overhead {})",
                self.config.max_envelope_size, overhead
            ))),
        }
    }
}
