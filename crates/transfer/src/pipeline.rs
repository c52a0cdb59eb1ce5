//! The persistent transfer queue and the workers draining it.
//!
//! [`PipelineManager`] owns the policy around the store: which task runs
//! next, how many run at once, what happens after a failure and how a
//! running task is cancelled. Workers claim tasks through it, hand them to a
//! [`TaskProcessor`] and report the outcome back.

use crate::error::{StoreError, TransferError, TransferResult};
use crate::models::{TaskRow, now_unix_ms, to_unix_ms};
use crate::observer::{ObserverRegistry, TransferEvent};
use crate::processor::TaskProcessor;
use crate::repos::ClaimFilter;
use crate::store::TransferStore;
use dashmap::DashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vaultline_core::config::TransferConfig;
use vaultline_core::{BackoffPolicy, NetworkType, TaskKey, TaskState, TransferTask};

/// Store writes tried per outcome before the task is released.
const OUTCOME_ATTEMPTS: u32 = 3;

/// A task handed to a worker, with the token that cancels it.
#[derive(Debug)]
pub struct ClaimedTask {
    pub task: TransferTask,
    pub cancel: CancellationToken,
}

/// Queue policy on top of a [`TransferStore`].
pub struct PipelineManager {
    store: Arc<dyn TransferStore>,
    config: TransferConfig,
    backoff: BackoffPolicy,
    observers: Arc<ObserverRegistry<TransferEvent>>,
    in_flight: DashMap<TaskKey, CancellationToken>,
    work_available: Notify,
}

impl PipelineManager {
    pub fn new(
        store: Arc<dyn TransferStore>,
        config: TransferConfig,
        observers: Arc<ObserverRegistry<TransferEvent>>,
    ) -> Self {
        let backoff = config.backoff.policy();
        Self {
            store,
            config,
            backoff,
            observers,
            in_flight: DashMap::new(),
            work_available: Notify::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry<TransferEvent>> {
        &self.observers
    }

    /// Number of tasks currently held by workers of this manager.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Persist a new task in `enqueued` state.
    ///
    /// A task with the same key already in the queue is rejected.
    pub async fn enqueue_transfer(&self, task: TransferTask) -> TransferResult<()> {
        if task.state != TaskState::Enqueued {
            return Err(vaultline_core::Error::IllegalState(format!(
                "task {} must be enqueued, not {}",
                task.key,
                task.state.as_str()
            ))
            .into());
        }

        let seq = self.store.insert_task(&TaskRow::from_task(&task)).await?;
        info!(
            task = %task.key,
            seq,
            direction = task.direction.as_str(),
            priority = task.priority,
            "Enqueued transfer"
        );

        self.observers
            .notify(&TransferEvent::Enqueued { key: task.key });
        self.work_available.notify_waiters();
        Ok(())
    }

    /// Cancel a task in any state and remove it with its block records.
    ///
    /// A running task has its token cancelled once the row is gone. Returns
    /// `false` if the task was not in the queue.
    pub async fn cancel_transfer(&self, key: &TaskKey) -> TransferResult<bool> {
        // A claim racing this call finds the row gone.
        let removed = self.store.delete_task(key).await?;
        if let Some((_, token)) = self.in_flight.remove(key) {
            token.cancel();
        }

        if removed {
            info!(task = %key, "Cancelled transfer");
            self.observers
                .notify(&TransferEvent::Cancelled { key: key.clone() });
            self.work_available.notify_waiters();
        }
        Ok(removed)
    }

    /// Claim the next task for `user_id` on `network`, if any may start.
    ///
    /// Nothing is returned while the user already has
    /// `max_parallel_transfers` tasks running.
    pub async fn next_eligible_task(
        &self,
        user_id: &str,
        network: NetworkType,
    ) -> TransferResult<Option<ClaimedTask>> {
        let filter = ClaimFilter {
            user_id,
            network,
            max_running: self.config.max_parallel_transfers,
            now_ms: now_unix_ms(),
        };
        let Some(row) = self.store.claim_next(&filter).await? else {
            return Ok(None);
        };

        let task = row.into_task()?;
        let cancel = CancellationToken::new();
        self.in_flight.insert(task.key.clone(), cancel.clone());

        debug!(task = %task.key, retry_count = task.retry_count, "Claimed transfer");
        self.observers.notify(&TransferEvent::Started {
            key: task.key.clone(),
        });
        Ok(Some(ClaimedTask { task, cancel }))
    }

    /// Record how a claimed task ended.
    ///
    /// Returns the state the task moved to, or `None` if it is no longer in
    /// the queue because it was cancelled meanwhile.
    ///
    /// A failing store write is retried with backoff. If it keeps failing the
    /// task is released back to `enqueued` so it does not hold a running slot,
    /// and the store error is returned.
    pub async fn report_outcome(
        &self,
        key: &TaskKey,
        result: Result<(), TransferError>,
    ) -> TransferResult<Option<TaskState>> {
        self.in_flight.remove(key);
        let outcome = self.record_outcome(key, &result).await;
        self.work_available.notify_waiters();

        match outcome {
            Err(TransferError::Store(StoreError::NotFound(_))) => {
                debug!(task = %key, "Task left the queue before its outcome was recorded");
                Ok(None)
            }
            other => other,
        }
    }

    async fn record_outcome(
        &self,
        key: &TaskKey,
        result: &Result<(), TransferError>,
    ) -> TransferResult<Option<TaskState>> {
        let mut attempt = 0;
        loop {
            match self.apply_outcome(key, result).await {
                Err(TransferError::Store(e)) if !matches!(e, StoreError::NotFound(_)) => {
                    attempt += 1;
                    if attempt >= OUTCOME_ATTEMPTS {
                        self.release_after_failed_outcome(key).await;
                        return Err(e.into());
                    }
                    warn!(task = %key, attempt, error = %e, "Failed to record transfer outcome, retrying");
                    tokio::time::sleep(self.backoff.delay(attempt - 1)).await;
                }
                other => return other,
            }
        }
    }

    async fn release_after_failed_outcome(&self, key: &TaskKey) {
        match self.store.release_task(key, OffsetDateTime::now_utc()).await {
            Ok(()) => warn!(task = %key, "Outcome not recorded, returned transfer to queue"),
            Err(e) => error!(
                task = %key,
                error = %e,
                "Outcome not recorded and transfer could not be returned to queue"
            ),
        }
    }

    async fn apply_outcome(
        &self,
        key: &TaskKey,
        result: &Result<(), TransferError>,
    ) -> TransferResult<Option<TaskState>> {
        let Some(row) = self.store.get_task(key).await? else {
            return Ok(None);
        };
        let task = row.into_task()?;
        let now = OffsetDateTime::now_utc();

        match result {
            Ok(()) => {
                self.store.complete_task(key, now).await?;
                debug!(task = %key, "Transfer completed");
                self.observers
                    .notify(&TransferEvent::Completed { key: key.clone() });
                Ok(Some(TaskState::Done))
            }
            Err(TransferError::Cancelled) => {
                self.store.release_task(key, now).await?;
                debug!(task = %key, "Transfer stopped, returned to queue");
                Ok(Some(TaskState::Enqueued))
            }
            Err(e) if e.is_retryable() && self.backoff.allows_retry(task.retry_count) => {
                let delay = self.backoff.delay(task.retry_count);
                let run_at = self.backoff.next_run_at(now, task.retry_count);
                let retry_count = task.retry_count + 1;
                self.store
                    .schedule_retry(key, retry_count, to_unix_ms(run_at), &e.to_string(), now)
                    .await?;

                info!(
                    task = %key,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transfer failed, retry scheduled"
                );
                self.observers.notify(&TransferEvent::RetryScheduled {
                    key: key.clone(),
                    retry_count,
                    run_at,
                });
                Ok(Some(TaskState::FailedRetryable))
            }
            Err(e) => {
                self.store.fail_task(key, &e.to_string(), now).await?;
                warn!(
                    task = %key,
                    retry_count = task.retry_count,
                    kind = ?e.kind(),
                    error = %e,
                    "Transfer failed permanently"
                );
                self.observers.notify(&TransferEvent::Failed {
                    key: key.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Ok(Some(TaskState::FailedPermanent))
            }
        }
    }

    /// All tasks of a user, in claim order.
    pub async fn list_transfers(&self, user_id: &str) -> TransferResult<Vec<TransferTask>> {
        let rows = self.store.list_tasks(user_id).await?;
        Ok(rows
            .into_iter()
            .map(TaskRow::into_task)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Return tasks left `running` by a previous process to the queue.
    pub async fn recover(&self) -> TransferResult<u64> {
        let requeued = self.store.requeue_running().await?;
        if requeued > 0 {
            info!(requeued, "Requeued interrupted transfers");
        }
        Ok(requeued)
    }

    /// Delete a user's finished tasks.
    pub async fn purge_done(&self, user_id: &str) -> TransferResult<u64> {
        let purged = self.store.purge_done(user_id).await?;
        debug!(user = user_id, purged, "Purged finished transfers");
        Ok(purged)
    }

    /// Drain the queue for `user_id` until `shutdown` is cancelled.
    ///
    /// Runs `max_parallel_transfers` workers. Idle workers wake on new work,
    /// on a finished task, or after the poll interval so that retry gates
    /// are noticed.
    pub async fn run(
        &self,
        user_id: &str,
        network: NetworkType,
        processor: Arc<dyn TaskProcessor>,
        shutdown: CancellationToken,
    ) {
        info!(
            user = user_id,
            workers = self.config.max_parallel_transfers,
            "Starting transfer workers"
        );
        let workers = (0..self.config.max_parallel_transfers)
            .map(|worker| self.worker_loop(worker, user_id, network, processor.as_ref(), &shutdown));
        futures::future::join_all(workers).await;
        info!(user = user_id, "Transfer workers stopped");
    }

    async fn worker_loop(
        &self,
        worker: u32,
        user_id: &str,
        network: NetworkType,
        processor: &dyn TaskProcessor,
        shutdown: &CancellationToken,
    ) {
        while !shutdown.is_cancelled() {
            // Registered before claiming so a notify during the claim is not lost.
            let notified = self.work_available.notified();

            match self.next_eligible_task(user_id, network).await {
                Ok(Some(claimed)) => {
                    if let Err(e) = self.execute(claimed, processor, shutdown).await {
                        error!(worker, error = %e, "Failed to record transfer outcome");
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(worker, error = %e, "Failed to claim transfer"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = notified => {}
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    async fn execute(
        &self,
        claimed: ClaimedTask,
        processor: &dyn TaskProcessor,
        shutdown: &CancellationToken,
    ) -> TransferResult<()> {
        let ClaimedTask { task, cancel } = claimed;

        let result = tokio::select! {
            result = processor.process(&task, &cancel) => result,
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            _ = shutdown.cancelled() => Err(TransferError::Cancelled),
        };

        let cancelled = cancel.is_cancelled();
        if cancelled {
            processor.discard(&task).await;
        }

        let state = self.report_outcome(&task.key, result).await?;
        if state.is_none() && !cancelled {
            debug!(task = %task.key, "Transfer removed while running, discarding local state");
            processor.discard(&task).await;
        }
        Ok(())
    }
}
