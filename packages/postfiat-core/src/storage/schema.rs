//! # Envelope Index Schema
//!
//! SQL for the durable envelope store.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ENVELOPE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────────┐  ┌──────────────────┐   │
//! │  │    envelopes    │    │ envelope_references │  │envelope_metadata │   │
//! │  ├─────────────────┤    ├─────────────────────┤  ├──────────────────┤   │
//! │  │ id              │◄───│ envelope_id         │  │ envelope_id      │──►│
//! │  │ content_hash    │    │ content_hash        │  │ key              │   │
//! │  │ message_type    │    │ group_id            │  │ value            │   │
//! │  │ encryption      │    └─────────────────────┘  └──────────────────┘   │
//! │  │ sender          │                                                    │
//! │  │ reply_to        │    The encoded envelope is kept whole in `data`;   │
//! │  │ created_at      │    the other columns exist only to be queried.     │
//! │  │ stored_at       │                                                    │
//! │  │ data            │                                                    │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- One row per stored envelope, keyed by the digest of its encoding
CREATE TABLE IF NOT EXISTS envelopes (
    id TEXT PRIMARY KEY,
    -- Hex digest of the envelope's message bytes
    content_hash TEXT NOT NULL,
    message_type INTEGER NOT NULL,
    encryption INTEGER NOT NULL,
    -- `sender` metadata, if any
    sender TEXT,
    reply_to TEXT,
    -- Milliseconds; from the `timestamp` metadata when parseable
    created_at INTEGER NOT NULL,
    stored_at INTEGER NOT NULL,
    -- Protobuf encoding
    data BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_envelopes_content_hash ON envelopes(content_hash);
CREATE INDEX IF NOT EXISTS idx_envelopes_sender ON envelopes(sender, created_at);
CREATE INDEX IF NOT EXISTS idx_envelopes_created_at ON envelopes(created_at);

-- Public context references
CREATE TABLE IF NOT EXISTS envelope_references (
    envelope_id TEXT NOT NULL REFERENCES envelopes(id) ON DELETE CASCADE,
    content_hash TEXT NOT NULL,
    group_id TEXT NOT NULL,
    PRIMARY KEY (envelope_id, content_hash, group_id)
);
CREATE INDEX IF NOT EXISTS idx_envelope_references_hash ON envelope_references(content_hash);

-- Metadata entries, first value per key
CREATE TABLE IF NOT EXISTS envelope_metadata (
    envelope_id TEXT NOT NULL REFERENCES envelopes(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (envelope_id, key)
);
CREATE INDEX IF NOT EXISTS idx_envelope_metadata_kv ON envelope_metadata(key, value);
"#;
