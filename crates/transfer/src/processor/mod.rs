//! Per-task work: moving one revision's blocks end to end.

mod download;
mod upload;

pub use download::DownloadProcessor;
pub use upload::UploadProcessor;

use crate::challenge::ChallengeCache;
use crate::error::TransferResult;
use crate::keys::LinkKeyResolver;
use crate::observer::{ObserverRegistry, TransferEvent};
use crate::store::TransferStore;
use crate::transport::BlockTransport;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vaultline_core::config::TransferConfig;
use vaultline_core::{ContentHash, TaskKey, TransferDirection, TransferTask};
use vaultline_crypto::CryptoProvider;

/// Runs one claimed task.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Do the work. Long steps must observe `cancel`.
    async fn process(&self, task: &TransferTask, cancel: &CancellationToken) -> TransferResult<()>;

    /// Clean up local state of a task that was cancelled.
    async fn discard(&self, _task: &TransferTask) {}
}

/// Collaborators shared by the processors.
pub struct ProcessorContext {
    pub store: Arc<dyn TransferStore>,
    pub transport: Arc<dyn BlockTransport>,
    pub keys: Arc<dyn LinkKeyResolver>,
    pub challenges: Arc<ChallengeCache>,
    pub provider: Arc<dyn CryptoProvider>,
    pub observers: Arc<ObserverRegistry<TransferEvent>>,
    pub config: TransferConfig,
}

impl ProcessorContext {
    /// Scratch directory of one task under the configured work dir.
    pub fn task_dir(&self, key: &TaskKey) -> PathBuf {
        let digest = ContentHash::compute(key.to_string().as_bytes()).to_hex();
        self.config.work_dir.join(&digest[..32])
    }

    fn max_parallel_blocks(&self) -> usize {
        self.config.max_parallel_blocks.max(1) as usize
    }

    async fn remove_task_dir(&self, key: &TaskKey) {
        remove_scratch_dir(&self.task_dir(key)).await;
    }
}

/// Remove a scratch directory. A missing directory is fine; other failures are logged.
async fn remove_scratch_dir(dir: &Path) -> bool {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove scratch directory");
            false
        }
    }
}

/// Routes tasks to the upload or download processor by direction.
pub struct TransferProcessor {
    upload: UploadProcessor,
    download: DownloadProcessor,
}

impl TransferProcessor {
    /// Build both processors over one context.
    pub fn new(ctx: Arc<ProcessorContext>) -> Self {
        Self {
            upload: UploadProcessor::new(ctx.clone()),
            download: DownloadProcessor::new(ctx),
        }
    }
}

#[async_trait]
impl TaskProcessor for TransferProcessor {
    async fn process(&self, task: &TransferTask, cancel: &CancellationToken) -> TransferResult<()> {
        match task.direction {
            TransferDirection::Upload => self.upload.process(task, cancel).await,
            TransferDirection::Download => self.download.process(task, cancel).await,
        }
    }

    async fn discard(&self, task: &TransferTask) {
        match task.direction {
            TransferDirection::Upload => self.upload.discard(task).await,
            TransferDirection::Download => self.download.discard(task).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_scratch_dir() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("scratch");
        std::fs::create_dir_all(dir.join("plain")).unwrap();
        std::fs::write(dir.join("plain").join("block"), b"data").unwrap();

        assert!(remove_scratch_dir(&dir).await);
        assert!(!dir.exists());
        // Already gone.
        assert!(remove_scratch_dir(&dir).await);
    }

    #[tokio::test]
    async fn test_remove_scratch_dir_reports_failure() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"data").unwrap();

        assert!(!remove_scratch_dir(&file).await);
        assert!(file.exists());
    }
}
