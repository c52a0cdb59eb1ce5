use super::{ProcessorContext, TaskProcessor};
use crate::error::{TransferError, TransferResult, TransportError};
use crate::keys::LinkKeys;
use crate::models::BlockRow;
use crate::observer::TransferEvent;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vaultline_core::{BlockLocator, BlockType, ContentHash, TransferTask};
use vaultline_crypto::{BlockCipher, CryptoError, SignatureCheck, UnlockedKey};

/// Fetches, checks and decrypts a revision's content blocks into the target file.
pub struct DownloadProcessor {
    ctx: Arc<ProcessorContext>,
    cipher: BlockCipher,
}

/// Key material for one download, unlocked once.
struct DownloadKeys {
    links: LinkKeys,
    encrypt: Arc<UnlockedKey>,
    check: SignatureCheck,
}

impl DownloadProcessor {
    pub fn new(ctx: Arc<ProcessorContext>) -> Self {
        let cipher =
            BlockCipher::new(ctx.provider.clone()).with_max_parallel(ctx.max_parallel_blocks());
        Self { ctx, cipher }
    }

    /// Block records of the task, listing the remote revision the first time.
    async fn plan_blocks(&self, task: &TransferTask) -> TransferResult<Vec<BlockRow>> {
        // Staged blocks land here, also when resuming into a wiped work dir.
        let dir = self.ctx.task_dir(&task.key);
        tokio::fs::create_dir_all(&dir).await?;

        let existing = self.ctx.store.list_blocks(&task.key).await?;
        if !existing.is_empty() {
            debug!(task = %task.key, blocks = existing.len(), "Resuming download");
            return Ok(existing);
        }

        let mut rows = self
            .ctx
            .transport
            .list_blocks(&task.key)
            .await?
            .into_iter()
            .filter(|b| b.block_type() == BlockType::File)
            .map(|b| -> TransferResult<BlockRow> {
                let hash = b.content_hash.ok_or_else(|| {
                    TransportError::MalformedResponse(format!(
                        "block {} has no content hash",
                        b.index.get()
                    ))
                })?;
                Ok(BlockRow {
                    block_index: b.index.get(),
                    locator: Some(b.locator.as_str().to_string()),
                    content_hash: Some(hash.to_hex()),
                    encrypted_signature: b.signature,
                    size: 0,
                    local_path: staged_path(&dir, b.index.get())
                        .to_string_lossy()
                        .into_owned(),
                    transferred: false,
                })
            })
            .collect::<TransferResult<Vec<_>>>()?;
        rows.sort_by_key(|r| r.block_index);

        self.ctx.store.replace_blocks(&task.key, &rows).await?;
        debug!(task = %task.key, blocks = rows.len(), "Planned download blocks");
        Ok(rows)
    }

    async fn download_one(
        &self,
        task: &TransferTask,
        row: BlockRow,
        keys: &DownloadKeys,
        cancel: &CancellationToken,
    ) -> TransferResult<()> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let locator = row.locator.as_deref().ok_or_else(|| {
            TransportError::MalformedResponse(format!("block {} has no locator", row.block_index))
        })?;
        let data = self
            .ctx
            .transport
            .download_block(&BlockLocator::new(locator))
            .await?;

        let actual = ContentHash::compute(&data);
        let expected = row.hash()?;
        if expected != Some(actual) {
            return Err(TransferError::Integrity {
                index: row.block_index,
                expected: expected.map(|h| h.to_hex()).unwrap_or_default(),
                actual: actual.to_hex(),
            });
        }

        let cipher = self.cipher.clone();
        let session = keys.links.session_key.clone();
        let verify_key = keys.links.verify_key.clone();
        let encrypt = keys.encrypt.clone();
        let check = keys.check;
        let signature = row.encrypted_signature.clone();
        let path = PathBuf::from(&row.local_path);
        tokio::task::spawn_blocking(move || -> TransferResult<()> {
            let plaintext = cipher.decrypt_block(&session, &data)?;
            match (signature, check) {
                (Some(sig), _) => {
                    cipher.check_signature(&verify_key, &encrypt, &plaintext, &sig, check)?
                }
                (None, SignatureCheck::Strict) => {
                    return Err(CryptoError::SignatureVerification.into());
                }
                (None, SignatureCheck::Lenient) => {
                    tracing::warn!(path = %path.display(), "Block has no signature");
                }
            }
            std::fs::write(&path, &plaintext)?;
            Ok(())
        })
        .await??;

        self.ctx
            .store
            .mark_block_transferred(&task.key, row.block_index, None)
            .await?;
        self.ctx.observers.notify(&TransferEvent::BlockTransferred {
            key: task.key.clone(),
            index: row.block_index,
        });
        Ok(())
    }
}

#[async_trait]
impl TaskProcessor for DownloadProcessor {
    async fn process(&self, task: &TransferTask, cancel: &CancellationToken) -> TransferResult<()> {
        let links = self.ctx.keys.resolve(&task.key).await?;
        let rows = self.plan_blocks(task).await?;
        let encrypt = Arc::new(self.cipher.unlock(&links.encrypt_key).await?);
        let keys = DownloadKeys {
            links,
            encrypt,
            check: SignatureCheck::from_strict(self.ctx.config.strict_signature_check),
        };

        let pending: Vec<BlockRow> = rows
            .iter()
            .filter(|r| !r.transferred || !Path::new(&r.local_path).is_file())
            .cloned()
            .collect();
        futures::stream::iter(pending)
            .map(|row| self.download_one(task, row, &keys, cancel))
            .buffered(self.ctx.max_parallel_blocks())
            .try_collect::<Vec<()>>()
            .await?;

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let staged: Vec<PathBuf> = rows.iter().map(|r| PathBuf::from(&r.local_path)).collect();
        let target = task.local_path.clone();
        tokio::task::spawn_blocking(move || assemble(&staged, &target)).await??;
        self.ctx.remove_task_dir(&task.key).await;

        info!(task = %task.key, blocks = rows.len(), "Download assembled");
        Ok(())
    }

    async fn discard(&self, task: &TransferTask) {
        self.ctx.remove_task_dir(&task.key).await;
    }
}

fn staged_path(dir: &Path, index: i64) -> PathBuf {
    dir.join(format!("{index:08}.block"))
}

/// Concatenate staged blocks into `target`, replacing it only once complete.
fn assemble(staged: &[PathBuf], target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let partial = PathBuf::from(format!("{}.partial", target.display()));
    let mut out = std::io::BufWriter::new(std::fs::File::create(&partial)?);
    for path in staged {
        let mut block = std::fs::File::open(path)?;
        std::io::copy(&mut block, &mut out)?;
    }
    out.flush()?;
    out.into_inner()
        .map_err(std::io::IntoInnerError::into_error)?
        .sync_all()?;

    std::fs::rename(&partial, target)
}
