use super::{ProcessorContext, TaskProcessor, remove_scratch_dir};
use crate::challenge::ChallengeKey;
use crate::error::{StoreError, TransferError, TransferResult};
use crate::keys::LinkKeys;
use crate::models::BlockRow;
use crate::observer::TransferEvent;
use crate::transport::BlockUpload;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vaultline_core::{Block, BlockIndex, TransferTask, split_into_blocks};
use vaultline_crypto::{BlockCipher, BlockFile, ManifestSigner, ProofToken, answer_challenge};

/// Splits, encrypts, proves and uploads a revision, then commits its manifest.
pub struct UploadProcessor {
    ctx: Arc<ProcessorContext>,
    cipher: BlockCipher,
    signer: ManifestSigner,
}

impl UploadProcessor {
    pub fn new(ctx: Arc<ProcessorContext>) -> Self {
        let cipher =
            BlockCipher::new(ctx.provider.clone()).with_max_parallel(ctx.max_parallel_blocks());
        let signer = ManifestSigner::new(ctx.provider.clone());
        Self {
            ctx,
            cipher,
            signer,
        }
    }

    /// Block records of the task, creating them from the source file when
    /// there are none or their ciphertext is gone.
    async fn prepare_blocks(
        &self,
        task: &TransferTask,
        keys: &LinkKeys,
        cancel: &CancellationToken,
    ) -> TransferResult<Vec<BlockRow>> {
        let existing = self.ctx.store.list_blocks(&task.key).await?;
        if !existing.is_empty()
            && existing
                .iter()
                .all(|b| b.transferred || Path::new(&b.local_path).is_file())
        {
            debug!(task = %task.key, blocks = existing.len(), "Resuming upload");
            return Ok(existing);
        }

        self.ctx.remove_task_dir(&task.key).await;
        let dir = self.ctx.task_dir(&task.key);
        let plain_dir = dir.join("plain");
        let enc_dir = dir.join("enc");
        tokio::fs::create_dir_all(&plain_dir).await?;
        tokio::fs::create_dir_all(&enc_dir).await?;

        let source = task.local_path.clone();
        let block_size = self.ctx.config.block_size;
        let split_dir = plain_dir.clone();
        let plain = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&source)?;
            split_into_blocks(std::io::BufReader::new(file), split_dir, block_size)
        })
        .await??;

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let encrypted = self
            .cipher
            .encrypt_blocks(
                &keys.session_key,
                &keys.encrypt_key,
                &keys.sign_key,
                &plain,
                &enc_dir,
            )
            .await?;
        remove_scratch_dir(&plain_dir).await;

        let rows: Vec<BlockRow> = encrypted
            .iter()
            .map(|b| BlockRow {
                block_index: BlockIndex::for_position(b.position).get(),
                locator: None,
                content_hash: Some(b.content_hash.to_hex()),
                encrypted_signature: Some(b.encrypted_signature.clone()),
                size: b.size as i64,
                local_path: b.path.to_string_lossy().into_owned(),
                transferred: false,
            })
            .collect();
        self.ctx.store.replace_blocks(&task.key, &rows).await?;

        debug!(task = %task.key, blocks = rows.len(), "Prepared upload blocks");
        Ok(rows)
    }

    async fn upload_one(
        &self,
        task: &TransferTask,
        block: BlockRow,
        proof: Option<ProofToken>,
        cancel: &CancellationToken,
    ) -> TransferResult<()> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let index = block.index()?;
        let proof = proof.ok_or_else(|| {
            vaultline_core::Error::IllegalState(format!("no proof token for block {index}"))
        })?;
        let content_hash = block.hash()?.ok_or(vaultline_core::Error::MissingContentHash(
            block.block_index,
        ))?;

        let data = tokio::fs::read(&block.local_path).await?;
        let upload = BlockUpload {
            index: index.get(),
            content_hash,
            encrypted_signature: block.encrypted_signature.clone().unwrap_or_default(),
            proof,
            size: block.size as u64,
        };

        let locator = self
            .ctx
            .transport
            .upload_block(&task.key, &upload, Bytes::from(data))
            .await?;
        self.ctx
            .store
            .mark_block_transferred(&task.key, block.block_index, Some(locator.as_str()))
            .await?;

        self.ctx.observers.notify(&TransferEvent::BlockTransferred {
            key: task.key.clone(),
            index: index.get(),
        });
        Ok(())
    }

    /// The manifest signature of the task, signing and storing it only the first time.
    async fn manifest_signature(
        &self,
        task: &TransferTask,
        keys: &LinkKeys,
        blocks: &[Block],
    ) -> TransferResult<String> {
        if let Some(stored) = self.stored_signature(task).await? {
            return Ok(stored);
        }

        let signature = self.signer.sign(&keys.sign_key, blocks).await?;
        if self
            .ctx
            .store
            .set_manifest_signature(&task.key, &signature)
            .await?
        {
            debug!(task = %task.key, blocks = blocks.len(), "Stored manifest signature");
            return Ok(signature);
        }

        self.stored_signature(task)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("manifest signature of {}", task.key)).into())
    }

    async fn stored_signature(&self, task: &TransferTask) -> TransferResult<Option<String>> {
        let row = self
            .ctx
            .store
            .get_task(&task.key)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("task {}", task.key)))?;
        Ok(row.manifest_signature)
    }
}

#[async_trait]
impl TaskProcessor for UploadProcessor {
    async fn process(&self, task: &TransferTask, cancel: &CancellationToken) -> TransferResult<()> {
        let keys = self.ctx.keys.resolve(&task.key).await?;
        let blocks = self.prepare_blocks(task, &keys, cancel).await?;
        let challenge_key = ChallengeKey::from(&task.key);

        let pending: Vec<BlockRow> = blocks.into_iter().filter(|b| !b.transferred).collect();
        if !pending.is_empty() {
            let challenge = self.ctx.challenges.get(&challenge_key).await?;
            let files = pending.iter().map(|b| BlockFile::new(&b.local_path)).collect();
            let tokens: HashMap<PathBuf, ProofToken> = answer_challenge(
                self.ctx.provider.clone(),
                challenge.content_key.clone(),
                &challenge.code,
                files,
            )
            .await?;

            futures::stream::iter(pending)
                .map(|block| {
                    let proof = tokens.get(Path::new(&block.local_path)).copied();
                    self.upload_one(task, block, proof, cancel)
                })
                .buffered(self.ctx.max_parallel_blocks())
                .try_collect::<Vec<()>>()
                .await?;
        }

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let blocks = self
            .ctx
            .store
            .list_blocks(&task.key)
            .await?
            .iter()
            .map(BlockRow::to_block)
            .collect::<Result<Vec<_>, _>>()?;
        let signature = self.manifest_signature(task, &keys, &blocks).await?;

        self.ctx
            .transport
            .commit_revision(&task.key, &signature, &blocks)
            .await?;
        self.ctx.challenges.invalidate(&challenge_key);
        self.ctx.remove_task_dir(&task.key).await;

        info!(task = %task.key, blocks = blocks.len(), "Upload committed");
        Ok(())
    }

    async fn discard(&self, task: &TransferTask) {
        self.ctx.challenges.invalidate(&ChallengeKey::from(&task.key));
        self.ctx.remove_task_dir(&task.key).await;
    }
}
