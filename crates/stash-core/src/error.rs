//! Error types for Stash core operations.
//!
//! This module defines the error hierarchy for all engine operations.
//! Errors are descriptive at the core level; the CLI layer maps these
//! to user-facing messages.

use thiserror::Error;

/// Result type alias for Stash operations.
pub type Result<T> = std::result::Result<T, StashError>;

/// Failures raised by the codec pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Core error type for Stash operations.
#[derive(Debug, Error)]
pub enum StashError {
    /// Codec pipeline failure (compress/encrypt and their inverses)
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Key, version, migration or backup not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write rejected because it would exceed the configured quota
    #[error("Quota exceeded: {requested} bytes requested, limit is {limit} bytes")]
    QuotaExceeded { requested: u64, limit: u64 },

    /// Structural validation error (keys, tags, migrations)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Secondary store failure (non-fatal, retried on the next tick)
    #[error("Sync error: {0}")]
    Sync(String),

    /// A migration step failed; already-applied steps are kept
    #[error("Migration {version} failed: {message}")]
    Migration { version: u32, message: String },

    /// Backup checksum mismatch
    #[error("Backup {id} is corrupt: expected checksum {expected}, got {actual}")]
    BackupCorruption {
        id: String,
        expected: String,
        actual: String,
    },

    /// Keystore or key material error
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Incorrect keystore passphrase
    #[error("Incorrect passphrase")]
    IncorrectPassphrase,

    /// Storage backend error (generic)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite-specific storage error
    #[error("SQLite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl StashError {
    /// Convenience constructor for not-found errors.
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        StashError::NotFound(what.to_string())
    }

    /// Whether this error is a codec decryption failure.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, StashError::Codec(CodecError::DecryptionFailed(_)))
    }
}
