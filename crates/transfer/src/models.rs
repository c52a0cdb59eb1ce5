//! Database rows mapping to the queue schema.

use crate::error::{StoreError, StoreResult};
use sqlx::FromRow;
use std::path::PathBuf;
use time::OffsetDateTime;
use vaultline_core::{Block, BlockIndex, BlockLocator, ContentHash, TaskKey, TransferTask};

// =============================================================================
// Transfer tasks
// =============================================================================

/// One queued transfer.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Insertion order; breaks priority ties.
    pub seq: i64,
    pub user_id: String,
    pub volume_id: String,
    pub share_id: String,
    pub link_id: String,
    pub revision_id: String,
    pub direction: String,
    pub priority: i64,
    pub state: String,
    pub retry_count: i64,
    /// Backoff gate as unix milliseconds, so it compares numerically in SQL.
    pub run_at_ms: Option<i64>,
    pub network_constraint: String,
    pub local_path: String,
    pub last_error: Option<String>,
    pub manifest_signature: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TaskRow {
    /// Row for a task that has not been inserted yet.
    pub fn from_task(task: &TransferTask) -> Self {
        Self {
            seq: 0,
            user_id: task.key.user_id.clone(),
            volume_id: task.key.volume_id.clone(),
            share_id: task.key.share_id.clone(),
            link_id: task.key.link_id.clone(),
            revision_id: task.key.revision_id.clone(),
            direction: task.direction.as_str().to_string(),
            priority: task.priority,
            state: task.state.as_str().to_string(),
            retry_count: i64::from(task.retry_count),
            run_at_ms: task.run_at.map(to_unix_ms),
            network_constraint: task.network_constraint.as_str().to_string(),
            local_path: task.local_path.to_string_lossy().into_owned(),
            last_error: task.last_error.clone(),
            manifest_signature: task.manifest_signature.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }

    /// The task key of this row.
    pub fn key(&self) -> TaskKey {
        TaskKey::new(
            &self.user_id,
            &self.volume_id,
            &self.share_id,
            &self.link_id,
            &self.revision_id,
        )
    }

    /// Convert into the domain type.
    pub fn into_task(self) -> StoreResult<TransferTask> {
        let key = self.key();
        let retry_count = u32::try_from(self.retry_count).map_err(|_| {
            StoreError::Corrupt(vaultline_core::Error::Serialization(format!(
                "negative retry count {} for {key}",
                self.retry_count
            )))
        })?;
        Ok(TransferTask {
            key,
            direction: self.direction.parse()?,
            priority: self.priority,
            state: self.state.parse()?,
            retry_count,
            run_at: self.run_at_ms.map(from_unix_ms).transpose()?,
            network_constraint: self.network_constraint.parse()?,
            local_path: PathBuf::from(self.local_path),
            last_error: self.last_error,
            manifest_signature: self.manifest_signature,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// =============================================================================
// Block sub-records
// =============================================================================

/// One block of a task, as prepared or fetched.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct BlockRow {
    pub block_index: i64,
    /// Remote slot, known once uploaded (uploads) or from the listing (downloads).
    pub locator: Option<String>,
    /// Hex SHA-256 of the ciphertext.
    pub content_hash: Option<String>,
    /// Sealed detached signature over the plaintext.
    pub encrypted_signature: Option<String>,
    pub size: i64,
    /// Local ciphertext (uploads) or staged plaintext (downloads).
    pub local_path: String,
    pub transferred: bool,
}

impl BlockRow {
    /// Validated block index.
    pub fn index(&self) -> StoreResult<BlockIndex> {
        Ok(BlockIndex::new(self.block_index)?)
    }

    /// Parsed content hash, if recorded.
    pub fn hash(&self) -> StoreResult<Option<ContentHash>> {
        Ok(self
            .content_hash
            .as_deref()
            .map(ContentHash::from_hex)
            .transpose()?)
    }

    /// Convert into the domain type. The block must have a locator.
    pub fn to_block(&self) -> StoreResult<Block> {
        let locator = self.locator.as_deref().ok_or_else(|| {
            StoreError::NotFound(format!("locator for block {}", self.block_index))
        })?;
        let mut block = Block::new(self.block_index, BlockLocator::new(locator))?;
        block.content_hash = self.hash()?;
        block.signature = self.encrypted_signature.clone();
        Ok(block)
    }
}

/// Current time as unix milliseconds.
pub fn now_unix_ms() -> i64 {
    to_unix_ms(OffsetDateTime::now_utc())
}

/// Unix milliseconds for an instant.
pub fn to_unix_ms(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_unix_ms(ms: i64) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).map_err(|e| {
        StoreError::Corrupt(vaultline_core::Error::Serialization(format!(
            "run_at out of range: {e}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultline_core::{NetworkConstraint, TaskState, TransferDirection};

    #[test]
    fn test_task_row_conversion() {
        let mut task = TransferTask::new(
            TaskKey::new("u", "v", "s", "l", "r"),
            TransferDirection::Download,
            "/tmp/out.bin",
        )
        .with_priority(-3)
        .with_network_constraint(NetworkConstraint::UnmeteredOnly);
        task.retry_count = 2;
        task.run_at = Some(OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap());

        let back = TaskRow::from_task(&task).into_task().unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_corrupt_state_rejected() {
        let task = TransferTask::new(
            TaskKey::new("u", "v", "s", "l", "r"),
            TransferDirection::Upload,
            "/tmp/in",
        );
        let mut row = TaskRow::from_task(&task);
        row.state = "paused".to_string();
        assert!(matches!(row.into_task(), Err(StoreError::Corrupt(_))));

        let mut row = TaskRow::from_task(&task);
        row.retry_count = -1;
        assert!(row.into_task().is_err());
        assert_eq!(
            TaskRow::from_task(&task).state,
            TaskState::Enqueued.as_str()
        );
    }

    #[test]
    fn test_block_row_requires_valid_index() {
        let row = BlockRow {
            block_index: 0,
            locator: Some("slot".into()),
            content_hash: None,
            encrypted_signature: None,
            size: 0,
            local_path: "/tmp/b".into(),
            transferred: false,
        };
        assert!(row.index().is_err());
        assert!(row.to_block().is_err());
    }
}
