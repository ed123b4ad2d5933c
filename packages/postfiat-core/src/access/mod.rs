//! # Access Module
//!
//! Who can read an envelope, expressed as wrapped keys.
//!
//! ## Key Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         KEY WRAPPING HIERARCHY                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Recipient X25519 key ──(ECDH + HKDF)──┐                               │
//! │                                         ▼                               │
//! │                               GROUP_KEY grant                           │
//! │                               target_id = group_id                      │
//! │                                         │  unwraps                      │
//! │                                         ▼                               │
//! │                                    Group key G                          │
//! │                                         │                               │
//! │                                         ▼                               │
//! │                               CONTENT_KEY grant                         │
//! │                               target_id = hex(content_hash)             │
//! │                                         │  unwraps                      │
//! │                                         ▼                               │
//! │                             CEK ‖ sha256(plaintext)                     │
//! │                                         │  decrypts                     │
//! │                                         ▼                               │
//! │                                  CoreMessage                            │
//! │                                                                         │
//! │  PUBLIC_KEY mode skips the group tier: CONTENT_KEY grants are sealed    │
//! │  straight to recipient keys.                                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let engine = KeyWrappingEngine::new();
//! let group = GroupKey::generate("board");
//! let sealed = engine.seal(&message, &AccessPolicy::group(group, vec![alice_pub]))?;
//!
//! match engine.open(&envelope, &Keyring::with_recipient(alice))? {
//!     AccessOutcome::Granted(opened) => { /* opened.message, opened.group_keys */ }
//!     AccessOutcome::NoAccess => { /* not for us */ }
//! }
//! ```

mod engine;
mod group;
mod wrap;

pub use engine::{AccessOutcome, AccessPolicy, KeyWrappingEngine, Opened, Sealed};
pub use group::{GroupKey, Keyring};
pub use wrap::{unwrap_group_key, wrap_group_key_for};
