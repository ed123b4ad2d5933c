//! # Error Handling
//!
//! Error types for the envelope protocol core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Structural Errors                                                 │
//! │  │   ├── Schema                - Envelope cannot be encoded            │
//! │  │   ├── MalformedEnvelope     - Bytes do not decode to an envelope    │
//! │  │   ├── EnvelopeTooLarge      - Encoded size exceeds transport limit  │
//! │  │   └── InvalidPartSize       - Chunk size of zero                    │
//! │  │                                                                      │
//! │  ├── Integrity Errors                                                  │
//! │  │   └── Integrity             - Digest mismatch (outer or inner)      │
//! │  │                                                                      │
//! │  ├── Reassembly Errors                                                 │
//! │  │   └── Reassembly(ReassemblyError)                                   │
//! │  │       ├── IncompleteMessage - Not all parts received yet            │
//! │  │       ├── PartCountMismatch - Parts disagree on total_parts         │
//! │  │       ├── DuplicatePart     - Same part number twice                │
//! │  │       ├── MissingPart       - Gap in part numbering                 │
//! │  │       └── ...                                                       │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── EncryptionFailed      - AEAD seal failed                      │
//! │  │   ├── DecryptionFailed      - AEAD open failed                      │
//! │  │   ├── InvalidKey            - Wrong key length or format            │
//! │  │   └── KeyDerivationFailed   - HKDF expansion failed                 │
//! │  │                                                                      │
//! │  └── Storage Errors                                                    │
//! │      ├── NotFound              - Backend reports absence               │
//! │      ├── UnsupportedStorage    - No backend handles the URI            │
//! │      ├── Backend               - Handling backend failed               │
//! │      ├── Unimplemented         - Backend cannot perform operation      │
//! │      └── DatabaseError         - SQLite failure                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! "No access" is deliberately absent: a holder whose keys unwrap no grant
//! receives [`AccessOutcome::NoAccess`](crate::access::AccessOutcome), not an
//! error.

use thiserror::Error;

/// Result type alias for envelope protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the protocol core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Structural Errors (100-199)
    // ========================================================================

    /// Envelope violates the schema and cannot be encoded
    #[error("Schema error: {0}")]
    Schema(String),

    /// Bytes could not be decoded into a valid envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Encoded envelope exceeds the transport size limit
    #[error("Envelope too large: {size} bytes exceeds limit of {max} bytes")]
    EnvelopeTooLarge {
        /// Encoded size in bytes
        size: usize,
        /// Transport limit in bytes
        max: usize,
    },

    /// Part size must be positive and leave room for framing
    #[error("Invalid part size: {0}")]
    InvalidPartSize(String),

    // ========================================================================
    // Integrity Errors (200-299)
    // ========================================================================

    /// Content digest does not match the declared hash
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    // ========================================================================
    // Reassembly Errors (300-399)
    // ========================================================================

    /// Multi-part reassembly failure
    #[error("Reassembly failed: {0}")]
    Reassembly(#[from] ReassemblyError),

    // ========================================================================
    // Crypto Errors (400-499)
    // ========================================================================

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    // ========================================================================
    // Storage Errors (500-599)
    // ========================================================================

    /// The backend responsible for the URI reports the content absent
    #[error("Not found in {backend} storage: {uri}")]
    NotFound {
        /// Backend identity
        backend: String,
        /// Requested URI or id
        uri: String,
    },

    /// No registered backend recognizes the URI
    #[error("No storage backend can handle URI: {0}")]
    UnsupportedStorage(String),

    /// The handling backend failed
    #[error("{backend} storage error: {message}")]
    Backend {
        /// Backend identity
        backend: String,
        /// Underlying failure
        message: String,
    },

    /// The backend does not support the operation
    #[error("{backend} storage does not implement {operation}")]
    Unimplemented {
        /// Backend identity
        backend: String,
        /// Operation name
        operation: String,
    },

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Failures while reassembling a multi-part message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Fewer parts than `total_parts` have arrived
    #[error("incomplete message: {received} of {expected} parts")]
    IncompleteMessage {
        /// Distinct parts held
        received: u32,
        /// Declared part count
        expected: u32,
    },

    /// Two parts for the same message disagree on `total_parts`
    #[error("part count mismatch for {message_id}: expected {expected}, got {found}")]
    PartCountMismatch {
        /// Message being reassembled
        message_id: String,
        /// Count declared by earlier parts
        expected: u32,
        /// Count declared by the offending part
        found: u32,
    },

    /// The same part number was supplied twice with different content
    #[error("duplicate part {part_number} for {message_id}")]
    DuplicatePart {
        /// Message being reassembled
        message_id: String,
        /// Repeated part number
        part_number: u32,
    },

    /// Part numbering has a gap
    #[error("missing part {part_number} for {message_id}")]
    MissingPart {
        /// Message being reassembled
        message_id: String,
        /// First absent part number
        part_number: u32,
    },

    /// Part number is not below `total_parts`
    #[error("part {part_number} out of range for {message_id} ({total_parts} parts)")]
    PartOutOfRange {
        /// Message being reassembled
        message_id: String,
        /// Offending part number
        part_number: u32,
        /// Declared part count
        total_parts: u32,
    },

    /// Parts disagree on the digest of the complete message
    #[error("conflicting complete_message_hash for {0}")]
    ConflictingMessageHash(String),

    /// A batch contained parts from several messages
    #[error("parts belong to different messages: {0} and {1}")]
    MixedMessageIds(String, String),

    /// Declared part count is zero or above the configured ceiling
    #[error("message declares {0} parts, outside the accepted range")]
    TooManyParts(u32),

    /// Too many messages are partially assembled
    #[error("too many pending messages (limit {0})")]
    TooManyPending(usize),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Structural
    /// - 200-299: Integrity
    /// - 300-399: Reassembly
    /// - 400-499: Crypto
    /// - 500-599: Storage
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Structural (100-199)
            Error::Schema(_) => 100,
            Error::MalformedEnvelope(_) => 101,
            Error::EnvelopeTooLarge { .. } => 102,
            Error::InvalidPartSize(_) => 103,

            // Integrity (200-299)
            Error::Integrity(_) => 200,

            // Reassembly (300-399)
            Error::Reassembly(inner) => match inner {
                ReassemblyError::IncompleteMessage { .. } => 300,
                ReassemblyError::PartCountMismatch { .. } => 301,
                ReassemblyError::DuplicatePart { .. } => 302,
                ReassemblyError::MissingPart { .. } => 303,
                ReassemblyError::PartOutOfRange { .. } => 304,
                ReassemblyError::ConflictingMessageHash(_) => 305,
                ReassemblyError::MixedMessageIds(_, _) => 306,
                ReassemblyError::TooManyParts(_) => 307,
                ReassemblyError::TooManyPending(_) => 308,
            },

            // Crypto (400-499)
            Error::EncryptionFailed(_) => 400,
            Error::DecryptionFailed(_) => 401,
            Error::InvalidKey(_) => 402,
            Error::KeyDerivationFailed(_) => 403,

            // Storage (500-599)
            Error::NotFound { .. } => 500,
            Error::UnsupportedStorage(_) => 501,
            Error::Backend { .. } => 502,
            Error::Unimplemented { .. } => 503,
            Error::DatabaseError(_) => 504,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::InvalidInput(_) => 901,
            Error::SerializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can resolve on their own: more parts may arrive,
    /// or a backend may come back.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Backend { .. }
                | Error::Reassembly(ReassemblyError::IncompleteMessage { .. })
                | Error::Reassembly(ReassemblyError::TooManyPending(_))
        )
    }

    /// Check if this error reports missing content
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Structural and integrity failures are terminal for the envelope
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Schema(_)
                | Error::MalformedEnvelope(_)
                | Error::EnvelopeTooLarge { .. }
                | Error::Integrity(_)
        )
    }

    pub(crate) fn backend(backend: impl std::fmt::Display, message: impl std::fmt::Display) -> Self {
        Error::Backend {
            backend: backend.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn not_found(backend: impl std::fmt::Display, uri: impl Into<String>) -> Self {
        Error::NotFound {
            backend: backend.to_string(),
            uri: uri.into(),
        }
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::MalformedEnvelope(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::backend("filesystem", err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::backend("ipfs", err)
    }
}

// ============================================================================
// TESTS
// ============================================================================
