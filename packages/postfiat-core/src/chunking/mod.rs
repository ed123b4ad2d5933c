//! # Multi-Part Chunking
//!
//! Splits an oversized payload (normally an encoded envelope) into ordered
//! parts and puts it back together on the other side.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CHUNKING PIPELINE                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   payload (N bytes)                                                    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   split(message_id, payload, S)                                        │
//! │        │   total_parts = ceil(N / S)                                   │
//! │        │   complete_message_hash = sha256(payload)   (same on all)     │
//! │        ▼                                                                │
//! │   ┌────────┐ ┌────────┐ ┌────────┐                                     │
//! │   │ part 0 │ │ part 1 │ │ part 2 │  ──► transport, any order           │
//! │   └────────┘ └────────┘ └────────┘                                     │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ChunkAssembler::accept(part)  (per message_id, under one lock)       │
//! │        │                                                                │
//! │        ├── Pending { received, expected }                              │
//! │        └── Complete(payload)  ← digest checked once, after concat      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-part integrity comes from the enclosing part envelope's own
//! `content_hash`; the whole-payload digest is checked once at the end.

mod assembler;

pub use assembler::{Assembly, ChunkAssembler};

use crate::crypto::{content_digest_hex, verify_hex_digest};
use crate::envelope::MultiPartMessagePart;
use crate::error::{Error, ReassemblyError, Result};

/// Split `payload` into parts of at most `max_part_size` bytes
///
/// Parts are numbered from 0. An empty payload yields a single empty part
/// so that it still has something to carry it.
pub fn split(
    message_id: &str,
    payload: &[u8],
    max_part_size: usize,
) -> Result<Vec<MultiPartMessagePart>> {
    if max_part_size == 0 {
        return Err(Error::InvalidPartSize("part size must be > 0".into()));
    }
    if message_id.is_empty() {
        return Err(Error::InvalidInput("message_id is required".into()));
    }

    let complete_message_hash = content_digest_hex(payload);
    let total = payload.len().div_ceil(max_part_size).max(1);
    let total_parts = u32::try_from(total)
        .map_err(|_| Error::InvalidPartSize(format!("{} parts exceed the u32 range", total)))?;

    let make_part = |part_number: u32, content: &[u8]| MultiPartMessagePart {
        message_id: message_id.to_string(),
        part_number,
        total_parts,
        content: content.to_vec(),
        complete_message_hash: complete_message_hash.clone(),
    };

    if payload.is_empty() {
        return Ok(vec![make_part(0, &[])]);
    }

    Ok(payload
        .chunks(max_part_size)
        .enumerate()
        .map(|(i, window)| make_part(i as u32, window))
        .collect())
}

/// Reassemble one message from a batch of its parts
///
/// Stateless counterpart of [`ChunkAssembler`]: every part must already be
/// at hand. Arrival order does not matter.
///
/// ## Errors
///
/// - `IncompleteMessage` while fewer than `total_parts` parts are supplied
/// - `PartCountMismatch` when parts disagree on `total_parts`
/// - `DuplicatePart` / `MissingPart` when numbering is not `0..total_parts`
/// - `Integrity` when the joined payload does not match its digest
pub fn reassemble(parts: &[MultiPartMessagePart]) -> Result<Vec<u8>> {
    let first = parts
        .first()
        .ok_or_else(|| Error::InvalidInput("no parts supplied".into()))?;
    let message_id = first.message_id.as_str();
    let total_parts = first.total_parts;

    for part in parts {
        if part.message_id != message_id {
            return Err(ReassemblyError::MixedMessageIds(
                message_id.to_string(),
                part.message_id.clone(),
            )
            .into());
        }
        if part.total_parts != total_parts {
            return Err(ReassemblyError::PartCountMismatch {
                message_id: message_id.to_string(),
                expected: total_parts,
                found: part.total_parts,
            }
            .into());
        }
        if part.complete_message_hash != first.complete_message_hash {
            return Err(ReassemblyError::ConflictingMessageHash(message_id.to_string()).into());
        }
    }

    if total_parts == 0 {
        return Err(ReassemblyError::TooManyParts(0).into());
    }
    if (parts.len() as u64) < u64::from(total_parts) {
        return Err(ReassemblyError::IncompleteMessage {
            received: parts.len() as u32,
            expected: total_parts,
        }
        .into());
    }

    let mut sorted: Vec<&MultiPartMessagePart> = parts.iter().collect();
    sorted.sort_by_key(|p| p.part_number);

    // Must be exactly 0..total_parts
    for (i, part) in sorted.iter().enumerate() {
        let expected = i as u32;
        if part.part_number == expected {
            continue;
        }
        if i > 0 && sorted[i - 1].part_number == part.part_number {
            return Err(ReassemblyError::DuplicatePart {
                message_id: message_id.to_string(),
                part_number: part.part_number,
            }
            .into());
        }
        return Err(ReassemblyError::MissingPart {
            message_id: message_id.to_string(),
            part_number: expected,
        }
        .into());
    }

    let payload: Vec<u8> = sorted.iter().flat_map(|p| p.content.iter().copied()).collect();
    verify_payload(message_id, &payload, &first.complete_message_hash)?;
    Ok(payload)
}

fn verify_payload(message_id: &str, payload: &[u8], expected_hex: &str) -> Result<()> {
    if verify_hex_digest(payload, expected_hex) {
        return Ok(());
    }
    tracing::warn!(message_id, "Reassembled payload digest mismatch");
    Err(Error::Integrity(format!(
        "reassembled payload for {} does not match complete_message_hash {}",
        message_id, expected_hex
    )))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_split_5000_by_2048() {
        let data = payload(5000);
        let parts = split("msg-1", &data, 2048).unwrap();

        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.total_parts == 3));
        assert_eq!(parts[0].content.len(), 2048);
        assert_eq!(parts[2].content.len(), 5000 - 4096);

        let shuffled = vec![parts[2].clone(), parts[0].clone(), parts[1].clone()];
        assert_eq!(reassemble(&shuffled).unwrap(), data);
    }

    #[test]
    fn test_split_shares_complete_hash() {
        let data = payload(100);
        let parts = split("msg", &data, 30).unwrap();
        let expected = content_digest_hex(&data);
        assert!(parts.iter().all(|p| p.complete_message_hash == expected));
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_exact_boundary() {
        let parts = split("msg", &payload(64), 32).unwrap();
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_empty_payload() {
        let parts = split("msg", &[], 32).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].total_parts, 1);
        assert!(reassemble(&parts).unwrap().is_empty());
    }

    #[test]
    fn test_zero_part_size_rejected() {
        assert!(matches!(split("msg", b"abc", 0), Err(Error::InvalidPartSize(_))));
    }

    #[test]
    fn test_incomplete_message() {
        let parts = split("msg", &payload(100), 30).unwrap();
        let err = reassemble(&parts[..2]).unwrap_err();
        assert!(matches!(
            err,
            Error::Reassembly(ReassemblyError::IncompleteMessage { received: 2, expected: 4 })
        ));
    }

    #[test]
    fn test_part_count_mismatch() {
        let mut parts = split("msg", &payload(100), 30).unwrap();
        parts[1].total_parts = 5;
        let err = reassemble(&parts).unwrap_err();
        assert!(matches!(err, Error::Reassembly(ReassemblyError::PartCountMismatch { .. })));
    }

    #[test]
    fn test_duplicate_instead_of_gap() {
        let parts = split("msg", &payload(90), 30).unwrap();
        let batch = vec![parts[0].clone(), parts[1].clone(), parts[1].clone()];
        let err = reassemble(&batch).unwrap_err();
        assert!(matches!(
            err,
            Error::Reassembly(ReassemblyError::DuplicatePart { part_number: 1, .. })
        ));
    }

    #[test]
    fn test_gap_detected() {
        let mut parts = split("msg", &payload(90), 30).unwrap();
        parts[1].part_number = 7;
        let err = reassemble(&parts).unwrap_err();
        assert!(matches!(
            err,
            Error::Reassembly(ReassemblyError::MissingPart { part_number: 1, .. })
        ));
    }

    #[test]
    fn test_corrupt_part_detected() {
        let mut parts = split("msg", &payload(90), 30).unwrap();
        parts[2].content[0] ^= 0xff;
        assert!(matches!(reassemble(&parts), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_mixed_messages_rejected() {
        let a = split("a", &payload(10), 5).unwrap();
        let b = split("b", &payload(10), 5).unwrap();
        let err = reassemble(&[a[0].clone(), b[1].clone()]).unwrap_err();
        assert!(matches!(err, Error::Reassembly(ReassemblyError::MixedMessageIds(_, _))));
    }
}
