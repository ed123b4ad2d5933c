//! Stateful reassembly of parts that trickle in over time.
//!
//! Partial state per `message_id` survives across calls until the message
//! completes, fails, or is evicted. Inserting a part and testing for
//! completion happen under one lock, so the last part of a message can never
//! race its own completion check. Different message ids do not interact
//! beyond sharing that lock briefly.
//!
//! Limits:
//! - `max_pending_messages`: concurrent partial messages
//! - `max_parts_per_message`: largest `total_parts` accepted from the wire
//! - idle timeout: enforced only when the owner calls [`ChunkAssembler::evict_expired`]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::verify_payload;
use crate::config::ProtocolConfig;
use crate::envelope::MultiPartMessagePart;
use crate::error::{ReassemblyError, Result};
use crate::time::{Clock, SystemClock};

/// Outcome of feeding one part to the assembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// More parts are needed
    Pending {
        /// Message being assembled
        message_id: String,
        /// Distinct parts held
        received: u32,
        /// Declared part count
        expected: u32,
    },
    /// All parts arrived and the joined payload matched its digest
    Complete {
        /// Message that completed
        message_id: String,
        /// Reassembled payload
        payload: Vec<u8>,
    },
}

/// Internal state for a partially received message
#[derive(Debug)]
struct PendingMessage {
    total_parts: u32,
    complete_message_hash: String,
    parts: BTreeMap<u32, Vec<u8>>,
    first_received: i64,
    last_activity: i64,
}

/// Accumulates multi-part messages keyed by `message_id`
pub struct ChunkAssembler {
    pending: Mutex<HashMap<String, PendingMessage>>,
    max_pending_messages: usize,
    max_parts_per_message: u32,
    idle_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl ChunkAssembler {
    /// Create an assembler using the wall clock
    pub fn new(config: &ProtocolConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an assembler with an injected clock
    pub fn with_clock(config: &ProtocolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_pending_messages: config.max_pending_messages,
            max_parts_per_message: config.max_parts_per_message,
            idle_timeout: config.reassembly_timeout(),
            clock,
        }
    }

    /// Feed one part
    ///
    /// Re-delivering a part already held (same number, same bytes) is a
    /// no-op. A part numbered outside its own `total_parts` is rejected on
    /// its own and leaves any partial state alone. Any other failure for a
    /// message discards that message's partial state; its parts must be sent
    /// again.
    pub fn accept(&self, part: MultiPartMessagePart) -> Result<Assembly> {
        let now = self.clock.now_millis();
        let message_id = part.message_id.clone();

        if part.total_parts == 0 || part.total_parts > self.max_parts_per_message {
            return Err(ReassemblyError::TooManyParts(part.total_parts).into());
        }

        // Never consistent with any pending state, so it cannot be used to
        // knock out a message in flight.
        if part.part_number >= part.total_parts {
            tracing::debug!(
                message_id = message_id.as_str(),
                part_number = part.part_number,
                total_parts = part.total_parts,
                "Rejecting out-of-range part"
            );
            return Err(ReassemblyError::PartOutOfRange {
                message_id,
                part_number: part.part_number,
                total_parts: part.total_parts,
            }
            .into());
        }

        let mut pending = self.pending.lock();

        if !pending.contains_key(&message_id) {
            if part.total_parts == 1 {
                drop(pending);
                verify_payload(&message_id, &part.content, &part.complete_message_hash)?;
                return Ok(Assembly::Complete {
                    message_id,
                    payload: part.content,
                });
            }
            if pending.len() >= self.max_pending_messages {
                tracing::warn!(
                    message_id = message_id.as_str(),
                    limit = self.max_pending_messages,
                    "Rejecting part: too many pending messages"
                );
                return Err(ReassemblyError::TooManyPending(self.max_pending_messages).into());
            }
        }

        let entry = pending
            .entry(message_id.clone())
            .or_insert_with(|| PendingMessage {
                total_parts: part.total_parts,
                complete_message_hash: part.complete_message_hash.clone(),
                parts: BTreeMap::new(),
                first_received: now,
                last_activity: now,
            });

        if let Err(err) = Self::check_consistent(entry, &part) {
            pending.remove(&message_id);
            return Err(err.into());
        }

        if let Some(existing) = entry.parts.get(&part.part_number) {
            if *existing != part.content {
                pending.remove(&message_id);
                return Err(ReassemblyError::DuplicatePart {
                    message_id,
                    part_number: part.part_number,
                }
                .into());
            }
        } else {
            entry.parts.insert(part.part_number, part.content);
        }
        entry.last_activity = now;

        let received = entry.parts.len() as u32;
        let expected = entry.total_parts;

        tracing::debug!(
            message_id = message_id.as_str(),
            part_number = part.part_number,
            received,
            expected,
            "Accepted message part"
        );

        if received < expected {
            return Ok(Assembly::Pending {
                message_id,
                received,
                expected,
            });
        }

        // Complete: take the state out before releasing the lock
        let parts = std::mem::take(&mut entry.parts);
        let complete_message_hash = std::mem::take(&mut entry.complete_message_hash);
        let first_received = entry.first_received;
        pending.remove(&message_id);
        drop(pending);

        // BTreeMap keys are distinct, each < total_parts, and there are
        // total_parts of them, so they are exactly 0..total_parts in order.
        let payload: Vec<u8> = parts.into_values().flatten().collect();
        verify_payload(&message_id, &payload, &complete_message_hash)?;

        tracing::debug!(
            message_id = message_id.as_str(),
            size = payload.len(),
            elapsed_ms = now - first_received,
            "Message reassembled"
        );

        Ok(Assembly::Complete {
            message_id,
            payload,
        })
    }

    fn check_consistent(
        entry: &PendingMessage,
        part: &MultiPartMessagePart,
    ) -> std::result::Result<(), ReassemblyError> {
        if entry.total_parts != part.total_parts {
            return Err(ReassemblyError::PartCountMismatch {
                message_id: part.message_id.clone(),
                expected: entry.total_parts,
                found: part.total_parts,
            });
        }
        if entry.complete_message_hash != part.complete_message_hash {
            return Err(ReassemblyError::ConflictingMessageHash(part.message_id.clone()));
        }
        Ok(())
    }

    /// `(received, expected)` for a message in progress
    pub fn progress(&self, message_id: &str) -> Option<(u32, u32)> {
        self.pending
            .lock()
            .get(message_id)
            .map(|p| (p.parts.len() as u32, p.total_parts))
    }

    /// Number of messages in partial state
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop a message's partial state
    pub fn evict(&self, message_id: &str) -> bool {
        self.pending.lock().remove(message_id).is_some()
    }

    /// Drop messages that have not seen a part for longer than `timeout`
    ///
    /// Returns the number of messages evicted.
    pub fn evict_idle(&self, timeout: Duration) -> usize {
        let now = self.clock.now_millis();
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|message_id, p| {
            let keep = now.saturating_sub(p.last_activity) <= timeout_ms;
            if !keep {
                tracing::warn!(
                    message_id = message_id.as_str(),
                    received = p.parts.len(),
                    expected = p.total_parts,
                    "Evicting idle partial message"
                );
            }
            keep
        });
        before - pending.len()
    }

    /// [`evict_idle`](Self::evict_idle) with the configured timeout
    pub fn evict_expired(&self) -> usize {
        self.evict_idle(self.idle_timeout)
    }
}
