//! The network layer the pipeline drives.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use vaultline_core::{Block, BlockLocator, ContentHash, TaskKey};
use vaultline_crypto::ProofToken;

/// Everything the server needs alongside one block's ciphertext.
#[derive(Debug, Clone)]
pub struct BlockUpload {
    /// Block index.
    pub index: i64,
    /// SHA-256 of the ciphertext.
    pub content_hash: ContentHash,
    /// Sealed detached signature over the plaintext.
    pub encrypted_signature: String,
    /// Answer to the revision's possession challenge for this block.
    pub proof: ProofToken,
    /// Ciphertext size in bytes.
    pub size: u64,
}

/// Block upload and download against remote storage.
///
/// Implementations report failures as [`TransportError`]; the pipeline
/// decides from [`TransportError::is_retryable`] whether to try again.
#[async_trait]
pub trait BlockTransport: Send + Sync {
    /// Upload one block's ciphertext and return its remote slot.
    async fn upload_block(
        &self,
        key: &TaskKey,
        block: &BlockUpload,
        ciphertext: Bytes,
    ) -> Result<BlockLocator, TransportError>;

    /// Finalize an uploaded revision with its manifest signature.
    async fn commit_revision(
        &self,
        key: &TaskKey,
        manifest_signature: &str,
        blocks: &[Block],
    ) -> Result<(), TransportError>;

    /// List the blocks of a revision to download.
    async fn list_blocks(&self, key: &TaskKey) -> Result<Vec<Block>, TransportError>;

    /// Fetch one block's ciphertext.
    async fn download_block(&self, locator: &BlockLocator) -> Result<Bytes, TransportError>;
}
