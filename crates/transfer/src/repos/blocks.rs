//! Block sub-record repository.

use crate::error::StoreResult;
use crate::models::BlockRow;
use async_trait::async_trait;
use vaultline_core::TaskKey;

/// Repository for the per-block records of a task.
#[async_trait]
pub trait BlockRepo: Send + Sync {
    /// Replace every block record of a task in one transaction.
    async fn replace_blocks(&self, key: &TaskKey, blocks: &[BlockRow]) -> StoreResult<()>;

    /// Block records of a task by ascending index.
    async fn list_blocks(&self, key: &TaskKey) -> StoreResult<Vec<BlockRow>>;

    /// Mark one block transferred, recording its remote locator if given.
    async fn mark_block_transferred(
        &self,
        key: &TaskKey,
        block_index: i64,
        locator: Option<&str>,
    ) -> StoreResult<()>;
}
