//! Inbound side: bytes off the transport to an opened message.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use super::codec::{check_transport_limit, decode, decode_part, verify_integrity};
use super::types::Envelope;
use crate::access::{AccessOutcome, GroupKey, KeyWrappingEngine, Keyring};
use crate::chunking::{Assembly, ChunkAssembler};
use crate::config::ProtocolConfig;
use crate::crypto::RecipientKeyPair;
use crate::error::{Error, Result};
use crate::graph::ContextGraph;

/// What happened to one received frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A slice of a larger message; more are needed
    Pending {
        /// Multi-part message id
        message_id: String,
        /// Distinct parts held
        received: u32,
        /// Declared part count
        expected: u32,
    },
    /// A whole envelope arrived (directly or by reassembly)
    Opened {
        /// The complete envelope
        envelope: Envelope,
        /// Whether our keys opened it
        outcome: AccessOutcome,
    },
}

/// Receive pipeline
///
/// ```text
/// bytes ─► size check ─► decode ─► verify ─┬─► part ─► assembler ─► decode ─► verify ─┐
///                                          └──────────────────────────────────────────┤
///                                                     open with keyring ◄─────────────┘
///                                                            │
///                                             learn group keys, register in graph
/// ```
pub struct EnvelopeIntake {
    config: ProtocolConfig,
    assembler: ChunkAssembler,
    engine: KeyWrappingEngine,
    keyring: RwLock<Keyring>,
    graph: Arc<ContextGraph>,
}

impl EnvelopeIntake {
    /// Create an intake pipeline around a keyring and a shared graph
    pub fn new(config: ProtocolConfig, keyring: Keyring, graph: Arc<ContextGraph>) -> Self {
        Self::with_assembler(ChunkAssembler::new(&config), config, keyring, graph)
    }

    /// Create with a preconfigured assembler (e.g. one using a test clock)
    pub fn with_assembler(
        assembler: ChunkAssembler,
        config: ProtocolConfig,
        keyring: Keyring,
        graph: Arc<ContextGraph>,
    ) -> Self {
        Self {
            config,
            assembler,
            engine: KeyWrappingEngine::new(),
            keyring: RwLock::new(keyring),
            graph,
        }
    }

    /// Process one transport frame
    pub fn receive(&self, bytes: &[u8]) -> Result<Received> {
        check_transport_limit(bytes, self.config.max_envelope_size)?;
        let envelope = decode(bytes)?;
        verify_integrity(&envelope)?;

        let envelope = if envelope.is_multipart() {
            let part = decode_part(&envelope.message)?;
            match self.assembler.accept(part)? {
                Assembly::Pending {
                    message_id,
                    received,
                    expected,
                } => {
                    return Ok(Received::Pending {
                        message_id,
                        received,
                        expected,
                    })
                }
                Assembly::Complete {
                    message_id,
                    payload,
                } => {
                    let inner = decode(&payload)?;
                    verify_integrity(&inner)?;
                    if inner.is_multipart() {
                        return Err(Error::MalformedEnvelope(format!(
                            "message {} reassembles to another multi-part slice",
                            message_id
                        )));
                    }
                    inner
                }
            }
        } else {
            envelope
        };

        let outcome = self.engine.open(&envelope, &self.keyring.read())?;
        match &outcome {
            AccessOutcome::Granted(opened) => {
                if !opened.group_keys.is_empty() {
                    let mut keyring = self.keyring.write();
                    for key in &opened.group_keys {
                        keyring.add_group_key(key.clone());
                    }
                }
                self.graph.add_envelope(&envelope, Some(&opened.message));
            }
            AccessOutcome::NoAccess => {
                self.graph.add_envelope(&envelope, None);
            }
        }

        tracing::debug!(
            content_hash = %envelope.content_hash_hex(),
            granted = outcome.is_granted(),
            "Received envelope"
        );

        Ok(Received::Opened { envelope, outcome })
    }

    /// Add a recipient keypair to the keyring
    pub fn add_recipient(&self, recipient: RecipientKeyPair) {
        self.keyring.write().add_recipient(recipient);
    }

    /// Add a group key to the keyring
    pub fn add_group_key(&self, key: GroupKey) {
        self.keyring.write().add_group_key(key);
    }

    /// Groups whose keys are held, for graph queries
    pub fn held_groups(&self) -> HashSet<String> {
        self.keyring.read().group_ids()
    }

    /// Shared context graph
    pub fn graph(&self) -> &Arc<ContextGraph> {
        &self.graph
    }

    /// Partial messages awaiting parts
    pub fn pending_count(&self) -> usize {
        self.assembler.pending_count()
    }

    /// Evict partial messages idle past the configured timeout
    pub fn evict_expired(&self) -> usize {
        self.assembler.evict_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessPolicy;
    use crate::envelope::{
        encode, ContextReference, CoreMessage, EncryptionMode, EnvelopeFactory, EnvelopeOptions,
        Outbound,
    };

    fn config() -> ProtocolConfig {
        ProtocolConfig::default()
    }

    #[test]
    fn test_single_envelope_opened_and_registered() {
        let reader = RecipientKeyPair::generate();
        let group = GroupKey::generate("ops");
        let factory = EnvelopeFactory::new(config());
        let message = CoreMessage::new("status").with_reference(ContextReference::new(vec![3u8; 32], "ops"));
        let out = factory
            .create(&message, &AccessPolicy::group(group.clone(), vec![reader.public_bytes()]), EnvelopeOptions::default())
            .unwrap();
        let Outbound::Single(sent, bytes) = out else {
            panic!("expected single");
        };

        let graph = Arc::new(ContextGraph::new());
        let intake = EnvelopeIntake::new(config(), Keyring::with_recipient(reader), graph.clone());
        let Received::Opened { envelope, outcome } = intake.receive(&bytes).unwrap() else {
            panic!("expected opened");
        };

        assert_eq!(envelope, sent);
        assert_eq!(outcome.opened().unwrap().message, message);
        assert!(intake.held_groups().contains("ops"));
        // Private reference learned after decryption
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.contains(&[3u8; 32]));
    }

    #[test]
    fn test_multipart_reassembled_in_any_order() {
        let reader = RecipientKeyPair::generate();
        let policy = AccessPolicy::Direct {
            recipients: vec![reader.public_bytes()],
        };
        let message = CoreMessage::new("z".repeat(4000));
        let out = EnvelopeFactory::new(config())
            .create(&message, &policy, EnvelopeOptions::default())
            .unwrap();
        let mut frames: Vec<Vec<u8>> = out.frames().into_iter().map(|f| f.to_vec()).collect();
        assert!(frames.len() >= 3);
        frames.reverse();

        let intake = EnvelopeIntake::new(config(), Keyring::with_recipient(reader), Arc::new(ContextGraph::new()));
        let last = frames.pop().unwrap();
        for frame in &frames {
            assert!(matches!(intake.receive(frame).unwrap(), Received::Pending { .. }));
        }
        assert_eq!(intake.pending_count(), 1);

        let Received::Opened { envelope, outcome } = intake.receive(&last).unwrap() else {
            panic!("expected opened");
        };
        assert_eq!(envelope.encryption, EncryptionMode::PublicKey);
        assert_eq!(outcome.opened().unwrap().message, message);
        assert_eq!(intake.pending_count(), 0);
    }

    fn sealed_frame(content: &str, group: &GroupKey, reader: &RecipientKeyPair) -> Vec<u8> {
        let out = EnvelopeFactory::new(config())
            .create(
                &CoreMessage::new(content),
                &AccessPolicy::group(group.clone(), vec![reader.public_bytes()]),
                EnvelopeOptions::default(),
            )
            .unwrap();
        out.frames()[0].to_vec()
    }

    fn opened_content(intake: &EnvelopeIntake, frame: &[u8]) -> Option<String> {
        match intake.receive(frame).unwrap() {
            Received::Opened { outcome, .. } => outcome.opened().map(|o| o.message.content.clone()),
            Received::Pending { .. } => panic!("expected opened"),
        }
    }

    #[test]
    fn test_key_rotation_keeps_every_envelope_readable() {
        let reader = RecipientKeyPair::generate();
        let old_key = GroupKey::generate("ops");
        let new_key = GroupKey::generate("ops");
        let older = sealed_frame("before rotation", &old_key, &reader);
        let newer = sealed_frame("after rotation", &new_key, &reader);

        // Newer first: learning the new key must not hide the older envelope
        let intake = EnvelopeIntake::new(
            config(),
            Keyring::with_recipient(RecipientKeyPair::from_bytes(&reader.secret_bytes())),
            Arc::new(ContextGraph::new()),
        );
        assert_eq!(opened_content(&intake, &newer).as_deref(), Some("after rotation"));
        assert_eq!(opened_content(&intake, &older).as_deref(), Some("before rotation"));

        // Older first: the learned old key must not block the newer grant
        let intake = EnvelopeIntake::new(config(), Keyring::with_recipient(reader), Arc::new(ContextGraph::new()));
        assert_eq!(opened_content(&intake, &older).as_deref(), Some("before rotation"));
        assert_eq!(opened_content(&intake, &newer).as_deref(), Some("after rotation"));
        assert_eq!(intake.held_groups().len(), 1);
    }

    #[test]
    fn test_stranger_gets_no_access() {
        let reader = RecipientKeyPair::generate();
        let out = EnvelopeFactory::new(config())
            .create(
                &CoreMessage::new("private"),
                &AccessPolicy::group(GroupKey::generate("g"), vec![reader.public_bytes()]),
                EnvelopeOptions::default(),
            )
            .unwrap();
        let graph = Arc::new(ContextGraph::new());
        let intake = EnvelopeIntake::new(config(), Keyring::new(), graph.clone());

        let Received::Opened { outcome, envelope } = intake.receive(out.frames()[0]).unwrap() else {
            panic!("expected opened");
        };
        assert_eq!(outcome, AccessOutcome::NoAccess);
        assert!(graph.contains(&envelope.content_hash));
    }

    #[test]
    fn test_tampered_frame_rejected() {
        let out = EnvelopeFactory::new(config())
            .create(&CoreMessage::new("hello"), &AccessPolicy::Public, EnvelopeOptions::default())
            .unwrap();
        let Outbound::Single(mut envelope, _) = out else {
            panic!("expected single");
        };
        envelope.message.push(0);
        let bytes = encode(&envelope).unwrap();

        let intake = EnvelopeIntake::new(config(), Keyring::new(), Arc::new(ContextGraph::new()));
        assert!(matches!(intake.receive(&bytes), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let intake = EnvelopeIntake::new(config(), Keyring::new(), Arc::new(ContextGraph::new()));
        let err = intake.receive(&vec![0u8; 2048]).unwrap_err();
        assert!(matches!(err, Error::EnvelopeTooLarge { size: 2048, max: 1024 }));
    }
}
