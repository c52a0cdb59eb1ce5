//! Core domain types and shared logic for vaultline.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Block identity, index sentinels and derived block types
//! - Content hashing
//! - Manifests over ordered block hashes
//! - Transfer task rows, states and retry backoff
//! - Configuration shared by the engine and the CLI
//! - Splitting a byte stream into bounded block files

pub mod backoff;
pub mod block;
pub mod config;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod task;
pub mod writer;

pub use backoff::BackoffPolicy;
pub use block::{Block, BlockIndex, BlockLocator, BlockType};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use manifest::Manifest;
pub use task::{NetworkConstraint, NetworkType, TaskKey, TaskState, TransferDirection, TransferTask};
pub use writer::{BoundedBlockWriter, split_into_blocks};

/// Default block size: 4 MiB
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Maximum block size: 32 MiB
pub const MAX_BLOCK_SIZE: u64 = 32 * 1024 * 1024;
