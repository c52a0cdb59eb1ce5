//! Queue store and pipeline error types.

use thiserror::Error;
use vaultline_crypto::CryptoError;

/// Queue store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid state transition for {task}: {from} -> {to}")]
    InvalidStateTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("corrupt row: {0}")]
    Corrupt(#[from] vaultline_core::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure reported by the network layer.
///
/// Cloneable so that one failed fetch can be handed to every coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// The server explicitly marked the condition as retryable.
        retryable: bool,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    /// An HTTP failure with no explicit retry hint.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            retryable: false,
        }
    }

    /// Timeouts, connection failures, 5xx and rate limiting are retryable.
    /// Other 4xx responses are not, unless the server flagged them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::Http {
                status, retryable, ..
            } => *retryable || matches!(*status, 408 | 429 | 500..=599),
            Self::MalformedResponse(_) => false,
        }
    }
}

/// Coarse classification surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local file problems.
    Io,
    /// Unlock, encryption, decryption or signature failures.
    Crypto,
    /// Transport failures.
    Network,
    /// Downloaded content did not match its advertised hash.
    Integrity,
    /// Queue contract violations and store failures.
    Queue,
    /// The task was cancelled.
    Cancelled,
}

/// Errors from processing a transfer task.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("queue error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] vaultline_core::Error),

    #[error("block {index} failed integrity check: expected {expected}, got {actual}")]
    Integrity {
        index: i64,
        expected: String,
        actual: String,
    },

    #[error("task cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Join(String),
}

impl TransferError {
    /// Which part of the taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Crypto(CryptoError::Io(_)) => ErrorKind::Io,
            Self::Crypto(_) => ErrorKind::Crypto,
            Self::Network(_) => ErrorKind::Network,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Core(vaultline_core::Error::Io(_)) => ErrorKind::Io,
            Self::Core(_) | Self::Store(_) | Self::Join(_) => ErrorKind::Queue,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the queue should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e.to_string())
    }
}

/// Result type for transfer operations.
pub type TransferResult<T> = std::result::Result<T, TransferError>;
