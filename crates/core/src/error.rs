//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid block index: {0}")]
    InvalidBlockIndex(i64),

    #[error("invalid block size: {size} (must be between 1 and {max})")]
    InvalidBlockSize { size: u64, max: u64 },

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("block {0} has no content hash")]
    MissingContentHash(i64),

    #[error("duplicate block index {0} in manifest")]
    DuplicateBlockIndex(i64),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("unknown task state: {0}")]
    UnknownTaskState(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
