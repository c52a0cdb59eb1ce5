//! Persistent transfer queue and block pipeline for vaultline.
//!
//! This crate moves file revisions between local disk and remote block
//! storage:
//! - A SQLite-backed queue of transfer tasks and their block records
//! - Queue policy: claim order, per-user concurrency, retry backoff, cancellation
//! - Upload and download processors built on the block crypto
//! - A coalescing cache of verification challenges
//! - Explicitly registered observers of pipeline events

pub mod challenge;
pub mod error;
pub mod keys;
pub mod models;
pub mod observer;
pub mod pipeline;
pub mod processor;
pub mod repos;
pub mod store;
pub mod transport;

pub use challenge::{ChallengeCache, ChallengeKey, ChallengeSource, VerificationChallenge};
pub use error::{
    ErrorKind, StoreError, StoreResult, TransferError, TransferResult, TransportError,
};
pub use keys::{LinkKeyResolver, LinkKeys};
pub use observer::{Observer, ObserverId, ObserverRegistry, TransferEvent};
pub use pipeline::{ClaimedTask, PipelineManager};
pub use processor::{
    DownloadProcessor, ProcessorContext, TaskProcessor, TransferProcessor, UploadProcessor,
};
pub use store::{SqliteStore, TransferStore};
pub use transport::{BlockTransport, BlockUpload};

use std::sync::Arc;
use vaultline_core::config::StoreConfig;

/// Open the queue store described by `config`.
pub async fn from_config(config: &StoreConfig) -> StoreResult<Arc<dyn TransferStore>> {
    let store = SqliteStore::new(&config.path, config.busy_timeout_secs).await?;
    tracing::debug!(path = %config.path.display(), "Opened transfer store");
    Ok(Arc::new(store) as Arc<dyn TransferStore>)
}
