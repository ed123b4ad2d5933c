//! Property-based tests for protocol components.
//!
//! These tests check that protocol invariants hold for arbitrary inputs:
//!
//! - Split then reassemble returns the payload, in any arrival order
//! - Encoded envelopes decode to the same envelope and still verify
//! - A group key with the right id but the wrong bytes never opens anything
//! - Storing identical bytes twice yields the same locator

use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::access::{AccessOutcome, AccessPolicy, GroupKey, KeyWrappingEngine, Keyring};
use crate::chunking::{reassemble, split, Assembly, ChunkAssembler};
use crate::config::{ProtocolConfig, StorageConfig};
use crate::crypto::{content_digest, RecipientKeyPair};
use crate::envelope::{
    decode, encode, verify_integrity, ContextReference, CoreMessage, EncryptionMode, Envelope,
    MessageType, Metadata,
};
use crate::storage::ContentRouter;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// A payload, a part size, and a shuffled order of the resulting parts
fn payload_and_order() -> impl Strategy<Value = (Vec<u8>, usize, Vec<usize>)> {
    (prop::collection::vec(any::<u8>(), 0..4096), 1usize..700).prop_flat_map(|(payload, size)| {
        let count = payload.len().div_ceil(size).max(1);
        let order = Just((0..count).collect::<Vec<_>>()).prop_shuffle();
        (Just(payload), Just(size), order)
    })
}

// ==================== Chunking Property Tests ====================

proptest! {
    /// Reassembly does not depend on arrival order.
    #[test]
    fn split_reassemble_any_order((payload, size, order) in payload_and_order()) {
        let parts = split("msg", &payload, size).unwrap();
        prop_assert_eq!(parts.len(), order.len());
        prop_assert!(parts.iter().all(|p| p.content.len() <= size));

        let shuffled: Vec<_> = order.iter().map(|&i| parts[i].clone()).collect();
        prop_assert_eq!(reassemble(&shuffled).unwrap(), payload);
    }

    /// The assembler completes exactly on the last distinct part.
    #[test]
    fn assembler_completes_on_last_part((payload, size, order) in payload_and_order()) {
        let parts = split("stream", &payload, size).unwrap();
        let assembler = ChunkAssembler::new(&ProtocolConfig::default());

        let last = order.len() - 1;
        for (n, &i) in order.iter().enumerate() {
            match assembler.accept(parts[i].clone()).unwrap() {
                Assembly::Complete { payload: got, .. } => {
                    prop_assert_eq!(n, last);
                    prop_assert_eq!(&got, &payload);
                }
                Assembly::Pending { received, .. } => {
                    prop_assert!(n < last);
                    prop_assert_eq!(received as usize, n + 1);
                }
            }
        }
        prop_assert_eq!(assembler.pending_count(), 0);
    }
}

// ==================== Codec Property Tests ====================

proptest! {
    /// Decoding an encoded envelope gives back the same envelope.
    #[test]
    fn envelope_codec_round_trip(
        message in prop::collection::vec(any::<u8>(), 0..512),
        metadata in prop::collection::btree_map("[a-z_]{1,12}", ".{0,24}", 0..6),
        refs in prop::collection::vec((prop::collection::vec(any::<u8>(), 32), "[a-z]{1,8}"), 0..4),
        reply_to in proptest::option::of("[0-9a-f]{64}"),
    ) {
        let envelope = Envelope {
            version: 1,
            content_hash: content_digest(&message).to_vec(),
            message_type: MessageType::CoreMessage,
            encryption: EncryptionMode::None,
            reply_to,
            public_references: refs
                .into_iter()
                .map(|(hash, group)| ContextReference::new(hash, group))
                .collect(),
            access_grants: Vec::new(),
            message,
            metadata: metadata_from(metadata),
        };

        let decoded = decode(&encode(&envelope).unwrap()).unwrap();
        prop_assert!(verify_integrity(&decoded).is_ok());
        prop_assert_eq!(decoded, envelope);
    }

    /// Flipping any message byte is caught by the integrity check.
    #[test]
    fn tampered_message_fails_integrity(
        message in prop::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
    ) {
        let mut envelope = Envelope {
            version: 1,
            content_hash: content_digest(&message).to_vec(),
            message_type: MessageType::CoreMessage,
            encryption: EncryptionMode::None,
            reply_to: None,
            public_references: Vec::new(),
            access_grants: Vec::new(),
            message,
            metadata: Metadata::new(),
        };
        let i = index.index(envelope.message.len());
        envelope.message[i] ^= 0x01;
        prop_assert!(verify_integrity(&envelope).is_err());
    }
}

fn metadata_from(entries: BTreeMap<String, String>) -> Metadata {
    let mut metadata = Metadata::new();
    for (k, v) in entries {
        metadata.insert(k, v);
    }
    metadata
}

// ==================== Access Property Tests ====================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A forged group key under the right group id never grants access.
    #[test]
    fn wrong_group_key_never_opens(
        body in ".{0,200}",
        forged in any::<[u8; 32]>(),
    ) {
        let engine = KeyWrappingEngine::new();
        let group = GroupKey::generate("ops");
        prop_assume!(group.key().as_bytes() != &forged);

        let reader = RecipientKeyPair::generate();
        let sealed = engine
            .seal(&CoreMessage::new(body), &AccessPolicy::group(group, vec![reader.public_bytes()]))
            .unwrap();
        let envelope = Envelope {
            version: 1,
            content_hash: sealed.content_hash,
            message_type: MessageType::CoreMessage,
            encryption: sealed.encryption,
            reply_to: None,
            public_references: Vec::new(),
            access_grants: sealed.access_grants,
            message: sealed.message,
            metadata: Metadata::new(),
        };

        let mut keyring = Keyring::new();
        keyring.add_group_key(GroupKey::from_bytes("ops", forged));
        let opened = matches!(engine.open(&envelope, &keyring), Ok(AccessOutcome::Granted(_)));
        prop_assert!(!opened);
    }
}

// ==================== Storage Property Tests ====================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Identical bytes resolve to one locator, whichever backend takes them.
    #[test]
    fn store_twice_same_uri(content in prop::collection::vec(any::<u8>(), 0..2048)) {
        let (first, second, fetched) = block_on(async {
            let router = ContentRouter::from_config(&StorageConfig::in_memory()).await.unwrap();
            let first = router.store(&content, "application/octet-stream", None).await.unwrap();
            let second = router.store(&content, "application/octet-stream", None).await.unwrap();
            let fetched = router.retrieve(&first).await.unwrap();
            (first, second, fetched)
        });
        prop_assert_eq!(&first.uri, &second.uri);
        prop_assert_eq!(fetched, content);
    }
}
