use super::mocks::{MemoryServer, SigningCounter, StaticKeys};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vaultline_core::config::{BackoffConfig, TransferConfig};
use vaultline_core::{NetworkType, TaskKey, TransferDirection, TransferTask};
use vaultline_crypto::{KeyPair, SessionKey};
use vaultline_transfer::{
    ChallengeCache, LinkKeys, ObserverRegistry, PipelineManager, ProcessorContext, SqliteStore,
    TaskProcessor, TransferEvent, TransferProcessor, TransferStore,
};

#[allow(dead_code)]
pub const USER: &str = "user-1";

/// One client: its own queue and scratch space, talking to a shared server.
#[allow(dead_code)]
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub server: Arc<MemoryServer>,
    pub provider: Arc<SigningCounter>,
    pub keys: LinkKeys,
    pub store: Arc<dyn TransferStore>,
    pub observers: Arc<ObserverRegistry<TransferEvent>>,
    pub ctx: Arc<ProcessorContext>,
    pub pipeline: PipelineManager,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut TransferConfig)) -> Self {
        let session_key = SessionKey::generate();
        let encrypt = KeyPair::generate("encrypt", b"correct horse").unwrap();
        let sign = KeyPair::generate("sign", b"battery staple").unwrap();
        let keys = LinkKeys {
            session_key: session_key.clone(),
            encrypt_key: encrypt.secret,
            sign_key: sign.secret,
            verify_key: sign.public,
        };
        let server = Arc::new(MemoryServer::new(session_key));
        Self::build(server, keys, tweak).await
    }

    /// A second client sharing this one's server and keys.
    pub async fn sharing(&self, tweak: impl FnOnce(&mut TransferConfig)) -> Self {
        self.sharing_with_keys(self.keys.clone(), tweak).await
    }

    /// A second client on this one's server with its own idea of the keys.
    pub async fn sharing_with_keys(
        &self,
        keys: LinkKeys,
        tweak: impl FnOnce(&mut TransferConfig),
    ) -> Self {
        Self::build(self.server.clone(), keys, tweak).await
    }

    async fn build(
        server: Arc<MemoryServer>,
        keys: LinkKeys,
        tweak: impl FnOnce(&mut TransferConfig),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TransferConfig {
            block_size: 1024,
            max_parallel_transfers: 2,
            max_parallel_blocks: 3,
            work_dir: dir.path().join("work"),
            poll_interval_ms: 20,
            backoff: BackoffConfig {
                base_ms: 10,
                max_ms: 50,
                max_retries: 3,
            },
            ..TransferConfig::default()
        };
        tweak(&mut config);

        let provider = Arc::new(SigningCounter::default());
        let store: Arc<dyn TransferStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let observers = Arc::new(ObserverRegistry::new());
        let ctx = Arc::new(ProcessorContext {
            store: store.clone(),
            transport: server.clone(),
            keys: Arc::new(StaticKeys(keys.clone())),
            challenges: Arc::new(ChallengeCache::new(server.clone())),
            provider: provider.clone(),
            observers: observers.clone(),
            config: config.clone(),
        });
        let pipeline = PipelineManager::new(store.clone(), config, observers.clone());

        Self {
            dir,
            server,
            provider,
            keys,
            store,
            observers,
            ctx,
            pipeline,
        }
    }

    pub fn key(&self, link: &str) -> TaskKey {
        TaskKey::new(USER, "volume-1", "share-1", link, "revision-1")
    }

    /// Write a source file and return an upload task for it.
    pub fn upload_task(&self, link: &str, data: &[u8]) -> TransferTask {
        let path = self.dir.path().join(format!("{link}.src"));
        std::fs::write(&path, data).unwrap();
        TransferTask::new(self.key(link), TransferDirection::Upload, path)
    }

    pub fn download_task(&self, link: &str) -> TransferTask {
        TransferTask::new(
            self.key(link),
            TransferDirection::Download,
            self.download_path(link),
        )
    }

    pub fn download_path(&self, link: &str) -> PathBuf {
        self.dir.path().join("downloads").join(link)
    }

    pub fn processor(&self) -> Arc<dyn TaskProcessor> {
        Arc::new(TransferProcessor::new(self.ctx.clone()))
    }
}

/// Run the pipeline until every task of [`USER`] is done or failed for good.
#[allow(dead_code)]
pub async fn drain(pipeline: &PipelineManager, processor: Arc<dyn TaskProcessor>) {
    let shutdown = CancellationToken::new();
    let watcher = async {
        loop {
            let tasks = pipeline.list_transfers(USER).await.unwrap();
            if tasks.iter().all(|t| t.state.is_terminal()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
    };
    let run = pipeline.run(USER, NetworkType::Unmetered, processor, shutdown.clone());

    tokio::time::timeout(Duration::from_secs(30), futures::future::join(run, watcher))
        .await
        .expect("pipeline did not drain");
}
