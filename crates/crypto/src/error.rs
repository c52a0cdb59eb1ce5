//! Crypto error types.

use std::path::PathBuf;
use thiserror::Error;

/// Crypto operation errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key unlock failed: {0}")]
    Unlock(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("invalid signature format: {0}")]
    InvalidSignature(String),

    #[error("invalid verification code: expected {expected} bytes, got {actual}")]
    InvalidVerificationCode { expected: usize, actual: usize },

    #[error("length mismatch: {left} bytes vs {right} bytes")]
    LengthMismatch { left: usize, right: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("block verification failed for {}: {source}", .path.display())]
    BlockVerification {
        path: PathBuf,
        #[source]
        source: Box<CryptoError>,
    },

    #[error("block file does not exist: {}", .0.display())]
    MissingBlockFile(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto task failed: {0}")]
    Task(String),
}

impl CryptoError {
    /// Errors caused by what the caller passed in rather than by crypto.
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::MissingBlockFile(_)
                | Self::InvalidVerificationCode { .. }
                | Self::LengthMismatch { .. }
        )
    }
}

/// Result type for crypto operations.
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;
