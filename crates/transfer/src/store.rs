//! Queue store trait and its SQLite implementation.

use crate::error::{StoreError, StoreResult};
use crate::repos::{BlockRepo, TaskRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined queue store trait.
#[async_trait]
pub trait TransferStore: TaskRepo + BlockRepo + Send + Sync {
    /// Create tables and indexes if missing.
    async fn migrate(&self) -> StoreResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> StoreResult<()>;
}

/// SQLite-backed queue store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_secs: u64) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Config(format!("{}: {e}", parent.display())))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        Self::connect(opts).await
    }

    /// A private in-memory database, for tests and dry runs.
    pub async fn in_memory() -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::connect(opts).await
    }

    async fn connect(opts: SqliteConnectOptions) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            // One connection serializes writers, so claims never interleave.
            .max_connections(1)
            // An in-memory database lives only as long as its connection.
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl TransferStore for SqliteStore {
    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{BlockRow, TaskRow};
    use crate::repos::ClaimFilter;
    use sqlx::SqliteConnection;
    use sqlx::query::Query;
    use sqlx::sqlite::SqliteArguments;
    use time::OffsetDateTime;
    use vaultline_core::{NetworkType, TaskKey, TaskState};

    const KEY_PREDICATE: &str =
        "user_id = ? AND volume_id = ? AND share_id = ? AND link_id = ? AND revision_id = ?";

    async fn task_seq(conn: &mut SqliteConnection, key: &TaskKey) -> StoreResult<Option<i64>> {
        let seq = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT seq FROM transfer_tasks WHERE {KEY_PREDICATE}"
        ))
        .bind(&key.user_id)
        .bind(&key.volume_id)
        .bind(&key.share_id)
        .bind(&key.link_id)
        .bind(&key.revision_id)
        .fetch_optional(conn)
        .await?;
        Ok(seq)
    }

    async fn require_seq(conn: &mut SqliteConnection, key: &TaskKey) -> StoreResult<i64> {
        task_seq(conn, key)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("task {key}")))
    }

    impl SqliteStore {
        /// Apply an UPDATE guarded by `state = 'running'`, mapping a miss to the right error.
        async fn transition_from_running<'q>(
            &self,
            key: &TaskKey,
            to: TaskState,
            query: Query<'q, Sqlite, SqliteArguments<'q>>,
        ) -> StoreResult<()> {
            let mut tx = self.pool.begin().await?;
            let seq = require_seq(&mut tx, key).await?;

            let result = query.bind(seq).execute(&mut *tx).await?;
            if result.rows_affected() == 0 {
                let from: String =
                    sqlx::query_scalar("SELECT state FROM transfer_tasks WHERE seq = ?")
                        .bind(seq)
                        .fetch_one(&mut *tx)
                        .await?;
                tx.rollback().await?;
                return Err(StoreError::InvalidStateTransition {
                    task: key.to_string(),
                    from,
                    to: to.as_str().to_string(),
                });
            }

            tx.commit().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl TaskRepo for SqliteStore {
        async fn insert_task(&self, task: &TaskRow) -> StoreResult<i64> {
            let result = sqlx::query(
                r#"
                INSERT INTO transfer_tasks (
                    user_id, volume_id, share_id, link_id, revision_id,
                    direction, priority, state, retry_count, run_at_ms,
                    network_constraint, local_path, last_error, manifest_signature,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&task.user_id)
            .bind(&task.volume_id)
            .bind(&task.share_id)
            .bind(&task.link_id)
            .bind(&task.revision_id)
            .bind(&task.direction)
            .bind(task.priority)
            .bind(&task.state)
            .bind(task.retry_count)
            .bind(task.run_at_ms)
            .bind(&task.network_constraint)
            .bind(&task.local_path)
            .bind(&task.last_error)
            .bind(&task.manifest_signature)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(done) => Ok(done.last_insert_rowid()),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                    StoreError::AlreadyExists(format!("task {}", task.key())),
                ),
                Err(e) => Err(e.into()),
            }
        }

        async fn get_task(&self, key: &TaskKey) -> StoreResult<Option<TaskRow>> {
            let row = sqlx::query_as::<_, TaskRow>(&format!(
                "SELECT * FROM transfer_tasks WHERE {KEY_PREDICATE}"
            ))
            .bind(&key.user_id)
            .bind(&key.volume_id)
            .bind(&key.share_id)
            .bind(&key.link_id)
            .bind(&key.revision_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_tasks(&self, user_id: &str) -> StoreResult<Vec<TaskRow>> {
            let rows = sqlx::query_as::<_, TaskRow>(
                "SELECT * FROM transfer_tasks WHERE user_id = ? ORDER BY priority ASC, seq ASC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn claim_next(&self, filter: &ClaimFilter<'_>) -> StoreResult<Option<TaskRow>> {
            // Starting with a write takes SQLite's write lock for the whole
            // transaction, so select-then-update cannot race another claimer.
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                UPDATE transfer_tasks SET state = 'enqueued', updated_at = ?
                WHERE user_id = ? AND state = 'failed_retryable'
                  AND run_at_ms IS NOT NULL AND run_at_ms <= ?
                "#,
            )
            .bind(now)
            .bind(filter.user_id)
            .bind(filter.now_ms)
            .execute(&mut *tx)
            .await?;

            let running: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM transfer_tasks WHERE user_id = ? AND state = 'running'",
            )
            .bind(filter.user_id)
            .fetch_one(&mut *tx)
            .await?;

            if running >= i64::from(filter.max_running) {
                tx.commit().await?;
                return Ok(None);
            }

            let candidate = sqlx::query_as::<_, TaskRow>(
                r#"
                SELECT * FROM transfer_tasks
                WHERE user_id = ? AND state = 'enqueued'
                  AND (run_at_ms IS NULL OR run_at_ms <= ?)
                  AND (network_constraint = 'any' OR ?)
                ORDER BY priority ASC, seq ASC
                LIMIT 1
                "#,
            )
            .bind(filter.user_id)
            .bind(filter.now_ms)
            .bind(filter.network == NetworkType::Unmetered)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(mut row) = candidate else {
                tx.commit().await?;
                return Ok(None);
            };

            let result = sqlx::query(
                "UPDATE transfer_tasks SET state = 'running', updated_at = ? WHERE seq = ? AND state = 'enqueued'",
            )
            .bind(now)
            .bind(row.seq)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(None);
            }

            tx.commit().await?;
            row.state = TaskState::Running.as_str().to_string();
            row.updated_at = now;
            Ok(Some(row))
        }

        async fn count_running(&self, user_id: &str) -> StoreResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM transfer_tasks WHERE user_id = ? AND state = 'running'",
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(count as u64)
        }

        async fn complete_task(&self, key: &TaskKey, updated_at: OffsetDateTime) -> StoreResult<()> {
            let query = sqlx::query(
                r#"
                UPDATE transfer_tasks
                SET state = 'done', run_at_ms = NULL, last_error = NULL, updated_at = ?
                WHERE seq = ? AND state = 'running'
                "#,
            )
            .bind(updated_at);
            self.transition_from_running(key, TaskState::Done, query)
                .await
        }

        async fn schedule_retry(
            &self,
            key: &TaskKey,
            retry_count: u32,
            run_at_ms: i64,
            error: &str,
            updated_at: OffsetDateTime,
        ) -> StoreResult<()> {
            let query = sqlx::query(
                r#"
                UPDATE transfer_tasks
                SET state = 'failed_retryable', retry_count = ?, run_at_ms = ?,
                    last_error = ?, updated_at = ?
                WHERE seq = ? AND state = 'running'
                "#,
            )
            .bind(i64::from(retry_count))
            .bind(run_at_ms)
            .bind(error.to_string())
            .bind(updated_at);
            self.transition_from_running(key, TaskState::FailedRetryable, query)
                .await
        }

        async fn release_task(&self, key: &TaskKey, updated_at: OffsetDateTime) -> StoreResult<()> {
            let query = sqlx::query(
                "UPDATE transfer_tasks SET state = 'enqueued', updated_at = ? WHERE seq = ? AND state = 'running'",
            )
            .bind(updated_at);
            self.transition_from_running(key, TaskState::Enqueued, query)
                .await
        }

        async fn fail_task(
            &self,
            key: &TaskKey,
            error: &str,
            updated_at: OffsetDateTime,
        ) -> StoreResult<()> {
            let query = sqlx::query(
                r#"
                UPDATE transfer_tasks
                SET state = 'failed_permanent', run_at_ms = NULL, last_error = ?, updated_at = ?
                WHERE seq = ? AND state = 'running'
                "#,
            )
            .bind(error.to_string())
            .bind(updated_at);
            self.transition_from_running(key, TaskState::FailedPermanent, query)
                .await
        }

        async fn set_manifest_signature(&self, key: &TaskKey, signature: &str) -> StoreResult<bool> {
            let mut tx = self.pool.begin().await?;
            let seq = require_seq(&mut tx, key).await?;
            let result = sqlx::query(
                "UPDATE transfer_tasks SET manifest_signature = ? WHERE seq = ? AND manifest_signature IS NULL",
            )
            .bind(signature)
            .bind(seq)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }

        async fn delete_task(&self, key: &TaskKey) -> StoreResult<bool> {
            let mut tx = self.pool.begin().await?;
            let Some(seq) = task_seq(&mut tx, key).await? else {
                tx.rollback().await?;
                return Ok(false);
            };

            sqlx::query("DELETE FROM transfer_blocks WHERE task_seq = ?")
                .bind(seq)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM transfer_tasks WHERE seq = ?")
                .bind(seq)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(true)
        }

        async fn requeue_running(&self) -> StoreResult<u64> {
            let result = sqlx::query(
                "UPDATE transfer_tasks SET state = 'enqueued', updated_at = ? WHERE state = 'running'",
            )
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn purge_done(&self, user_id: &str) -> StoreResult<u64> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                DELETE FROM transfer_blocks WHERE task_seq IN (
                    SELECT seq FROM transfer_tasks WHERE user_id = ? AND state = 'done'
                )
                "#,
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            let result =
                sqlx::query("DELETE FROM transfer_tasks WHERE user_id = ? AND state = 'done'")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            tx.commit().await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl BlockRepo for SqliteStore {
        async fn replace_blocks(&self, key: &TaskKey, blocks: &[BlockRow]) -> StoreResult<()> {
            let mut tx = self.pool.begin().await?;
            let seq = require_seq(&mut tx, key).await?;

            sqlx::query("DELETE FROM transfer_blocks WHERE task_seq = ?")
                .bind(seq)
                .execute(&mut *tx)
                .await?;

            for block in blocks {
                sqlx::query(
                    r#"
                    INSERT INTO transfer_blocks (
                        task_seq, block_index, locator, content_hash,
                        encrypted_signature, size, local_path, transferred
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(seq)
                .bind(block.block_index)
                .bind(&block.locator)
                .bind(&block.content_hash)
                .bind(&block.encrypted_signature)
                .bind(block.size)
                .bind(&block.local_path)
                .bind(block.transferred)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn list_blocks(&self, key: &TaskKey) -> StoreResult<Vec<BlockRow>> {
            let rows = sqlx::query_as::<_, BlockRow>(
                r#"
                SELECT b.block_index, b.locator, b.content_hash, b.encrypted_signature,
                       b.size, b.local_path, b.transferred
                FROM transfer_blocks b
                JOIN transfer_tasks t ON t.seq = b.task_seq
                WHERE t.user_id = ? AND t.volume_id = ? AND t.share_id = ?
                  AND t.link_id = ? AND t.revision_id = ?
                ORDER BY b.block_index ASC
                "#,
            )
            .bind(&key.user_id)
            .bind(&key.volume_id)
            .bind(&key.share_id)
            .bind(&key.link_id)
            .bind(&key.revision_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn mark_block_transferred(
            &self,
            key: &TaskKey,
            block_index: i64,
            locator: Option<&str>,
        ) -> StoreResult<()> {
            let mut tx = self.pool.begin().await?;
            let seq = require_seq(&mut tx, key).await?;
            let result = sqlx::query(
                r#"
                UPDATE transfer_blocks
                SET transferred = 1, locator = COALESCE(?, locator)
                WHERE task_seq = ? AND block_index = ?
                "#,
            )
            .bind(locator)
            .bind(seq)
            .bind(block_index)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(StoreError::NotFound(format!(
                    "block {block_index} of task {key}"
                )));
            }
            tx.commit().await?;
            Ok(())
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- One row per file revision awaiting transfer
CREATE TABLE IF NOT EXISTS transfer_tasks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    volume_id TEXT NOT NULL,
    share_id TEXT NOT NULL,
    link_id TEXT NOT NULL,
    revision_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL DEFAULT 'enqueued',
    retry_count INTEGER NOT NULL DEFAULT 0,
    run_at_ms INTEGER,
    network_constraint TEXT NOT NULL DEFAULT 'any',
    local_path TEXT NOT NULL,
    last_error TEXT,
    manifest_signature TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (user_id, volume_id, share_id, link_id, revision_id)
);
CREATE INDEX IF NOT EXISTS idx_transfer_tasks_dequeue ON transfer_tasks(user_id, state, priority, seq);

-- Per-block progress of a task
CREATE TABLE IF NOT EXISTS transfer_blocks (
    task_seq INTEGER NOT NULL REFERENCES transfer_tasks(seq) ON DELETE CASCADE,
    block_index INTEGER NOT NULL,
    locator TEXT,
    content_hash TEXT,
    encrypted_signature TEXT,
    size INTEGER NOT NULL,
    local_path TEXT NOT NULL,
    transferred INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (task_seq, block_index)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockRow, TaskRow, now_unix_ms};
    use crate::repos::ClaimFilter;
    use time::OffsetDateTime;
    use vaultline_core::{
        NetworkConstraint, NetworkType, TaskKey, TaskState, TransferDirection, TransferTask,
    };

    fn task(link: &str, priority: i64) -> TransferTask {
        TransferTask::new(
            TaskKey::new("user", "vol", "share", link, "rev"),
            TransferDirection::Upload,
            format!("/tmp/{link}"),
        )
        .with_priority(priority)
    }

    fn filter(max_running: u32) -> ClaimFilter<'static> {
        ClaimFilter {
            user_id: "user",
            network: NetworkType::Unmetered,
            max_running,
            now_ms: now_unix_ms(),
        }
    }

    fn block(index: i64) -> BlockRow {
        BlockRow {
            block_index: index,
            locator: None,
            content_hash: None,
            encrypted_signature: None,
            size: 10,
            local_path: format!("/tmp/{index}.enc"),
            transferred: false,
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_key() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_task(&TaskRow::from_task(&task("a", 0))).await.unwrap();
        assert!(matches!(
            store.insert_task(&TaskRow::from_task(&task("a", 5))).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_insertion() {
        let store = SqliteStore::in_memory().await.unwrap();
        for (link, priority) in [("late", 5), ("first", 1), ("second", 1), ("urgent", -1)] {
            store
                .insert_task(&TaskRow::from_task(&task(link, priority)))
                .await
                .unwrap();
        }

        let mut order = Vec::new();
        while let Some(row) = store.claim_next(&filter(10)).await.unwrap() {
            assert_eq!(row.state, "running");
            order.push(row.link_id);
        }
        assert_eq!(order, ["urgent", "first", "second", "late"]);
    }

    #[tokio::test]
    async fn test_claim_respects_running_bound() {
        let store = SqliteStore::in_memory().await.unwrap();
        for link in ["a", "b", "c"] {
            store.insert_task(&TaskRow::from_task(&task(link, 0))).await.unwrap();
        }
        assert!(store.claim_next(&filter(2)).await.unwrap().is_some());
        assert!(store.claim_next(&filter(2)).await.unwrap().is_some());
        assert!(store.claim_next(&filter(2)).await.unwrap().is_none());
        assert_eq!(store.count_running("user").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_claim_skips_unmetered_only_on_metered_network() {
        let store = SqliteStore::in_memory().await.unwrap();
        let wifi = task("wifi", 0).with_network_constraint(NetworkConstraint::UnmeteredOnly);
        store.insert_task(&TaskRow::from_task(&wifi)).await.unwrap();

        let metered = ClaimFilter {
            network: NetworkType::Metered,
            ..filter(5)
        };
        assert!(store.claim_next(&metered).await.unwrap().is_none());
        assert!(store.claim_next(&filter(5)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retry_gate_and_reentry() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = task("a", 0);
        store.insert_task(&TaskRow::from_task(&t)).await.unwrap();
        store.claim_next(&filter(1)).await.unwrap().unwrap();

        let now = now_unix_ms();
        store
            .schedule_retry(&t.key, 1, now + 60_000, "timeout", OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(store.claim_next(&filter(1)).await.unwrap().is_none());

        let later = ClaimFilter {
            now_ms: now + 60_000,
            ..filter(1)
        };
        let row = store.claim_next(&later).await.unwrap().unwrap();
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_transitions_require_running() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = task("a", 0);
        store.insert_task(&TaskRow::from_task(&t)).await.unwrap();

        let err = store
            .complete_task(&t.key, OffsetDateTime::now_utc())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidStateTransition { ref from, .. } if from == "enqueued"));

        let missing = TaskKey::new("user", "vol", "share", "nope", "rev");
        assert!(matches!(
            store.fail_task(&missing, "x", OffsetDateTime::now_utc()).await,
            Err(StoreError::NotFound(_))
        ));

        store.claim_next(&filter(1)).await.unwrap().unwrap();
        store
            .fail_task(&t.key, "forbidden", OffsetDateTime::now_utc())
            .await
            .unwrap();
        let row = store.get_task(&t.key).await.unwrap().unwrap();
        assert_eq!(row.into_task().unwrap().state, TaskState::FailedPermanent);
        assert!(store.claim_next(&filter(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_returns_task_to_queue() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = task("a", 0);
        store.insert_task(&TaskRow::from_task(&t)).await.unwrap();
        store.claim_next(&filter(1)).await.unwrap().unwrap();
        assert_eq!(store.count_running("user").await.unwrap(), 1);

        store
            .release_task(&t.key, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(store.count_running("user").await.unwrap(), 0);
        let row = store.claim_next(&filter(1)).await.unwrap().unwrap();
        assert_eq!(row.retry_count, 0);
    }

    #[tokio::test]
    async fn test_manifest_signature_set_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = task("a", 0);
        store.insert_task(&TaskRow::from_task(&t)).await.unwrap();
        assert!(store.set_manifest_signature(&t.key, "first").await.unwrap());
        assert!(!store.set_manifest_signature(&t.key, "second").await.unwrap());
        let row = store.get_task(&t.key).await.unwrap().unwrap();
        assert_eq!(row.manifest_signature.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_blocks() {
        let store = SqliteStore::in_memory().await.unwrap();
        let t = task("a", 0);
        store.insert_task(&TaskRow::from_task(&t)).await.unwrap();
        store
            .replace_blocks(&t.key, &[block(1), block(2)])
            .await
            .unwrap();
        store
            .mark_block_transferred(&t.key, 1, Some("slot-1"))
            .await
            .unwrap();

        let blocks = store.list_blocks(&t.key).await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].transferred);
        assert_eq!(blocks[0].locator.as_deref(), Some("slot-1"));

        assert!(store.delete_task(&t.key).await.unwrap());
        assert!(!store.delete_task(&t.key).await.unwrap());
        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfer_blocks")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn test_requeue_running_and_purge_done() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = task("a", 0);
        let b = task("b", 1);
        store.insert_task(&TaskRow::from_task(&a)).await.unwrap();
        store.insert_task(&TaskRow::from_task(&b)).await.unwrap();

        store.claim_next(&filter(2)).await.unwrap().unwrap();
        store.complete_task(&a.key, OffsetDateTime::now_utc()).await.unwrap();
        store.claim_next(&filter(2)).await.unwrap().unwrap();

        assert_eq!(store.requeue_running().await.unwrap(), 1);
        assert_eq!(store.purge_done("user").await.unwrap(), 1);

        let remaining = store.list_tasks("user").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].link_id, "b");
        assert_eq!(remaining[0].state, "enqueued");
    }

    #[tokio::test]
    async fn test_file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");
        let store = SqliteStore::new(&path, 5).await.unwrap();
        store.health_check().await.unwrap();
        assert!(path.exists());
    }
}
