//! Transfer task repository.

use crate::error::StoreResult;
use crate::models::TaskRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use vaultline_core::{NetworkType, TaskKey};

/// What a worker is allowed to claim.
#[derive(Debug, Clone)]
pub struct ClaimFilter<'a> {
    /// Only tasks of this user.
    pub user_id: &'a str,
    /// The network the device is on; gates `unmetered_only` tasks.
    pub network: NetworkType,
    /// Upper bound on running tasks for the user, including the one being claimed.
    pub max_running: u32,
    /// Tasks whose backoff gate is later than this are not eligible.
    pub now_ms: i64,
}

/// Repository for transfer task rows.
#[async_trait]
pub trait TaskRepo: Send + Sync {
    /// Insert a new task. Fails with `AlreadyExists` if the key is taken.
    ///
    /// Returns the assigned insertion sequence.
    async fn insert_task(&self, task: &TaskRow) -> StoreResult<i64>;

    /// Get a task by key.
    async fn get_task(&self, key: &TaskKey) -> StoreResult<Option<TaskRow>>;

    /// List a user's tasks in dequeue order (priority, then insertion).
    async fn list_tasks(&self, user_id: &str) -> StoreResult<Vec<TaskRow>>;

    /// Atomically pick the next eligible task and mark it running.
    ///
    /// Retryable failures whose backoff has elapsed re-enter `enqueued` first.
    /// Returns `None` when nothing is eligible or the user is at `max_running`.
    async fn claim_next(&self, filter: &ClaimFilter<'_>) -> StoreResult<Option<TaskRow>>;

    /// Number of running tasks for a user.
    async fn count_running(&self, user_id: &str) -> StoreResult<u64>;

    /// `running` -> `done`.
    async fn complete_task(&self, key: &TaskKey, updated_at: OffsetDateTime) -> StoreResult<()>;

    /// `running` -> `failed_retryable`, recording the new retry count and gate.
    async fn schedule_retry(
        &self,
        key: &TaskKey,
        retry_count: u32,
        run_at_ms: i64,
        error: &str,
        updated_at: OffsetDateTime,
    ) -> StoreResult<()>;

    /// `running` -> `enqueued`, keeping the retry count. Used when a worker stops early.
    async fn release_task(&self, key: &TaskKey, updated_at: OffsetDateTime) -> StoreResult<()>;

    /// `running` -> `failed_permanent`.
    async fn fail_task(
        &self,
        key: &TaskKey,
        error: &str,
        updated_at: OffsetDateTime,
    ) -> StoreResult<()>;

    /// Store the manifest signature unless one is already set.
    ///
    /// Returns `true` if this call stored it.
    async fn set_manifest_signature(&self, key: &TaskKey, signature: &str) -> StoreResult<bool>;

    /// Delete a task and its block records in any state. Returns `false` if absent.
    async fn delete_task(&self, key: &TaskKey) -> StoreResult<bool>;

    /// Move every `running` task back to `enqueued`, e.g. after a crash.
    async fn requeue_running(&self) -> StoreResult<u64>;

    /// Delete a user's `done` tasks.
    async fn purge_done(&self, user_id: &str) -> StoreResult<u64>;
}
