use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use vaultline_core::{Block, BlockLocator, ContentHash, TaskKey};
use vaultline_crypto::{
    CryptoProvider, CryptoResult, DefaultCryptoProvider, ProofToken, ProtectedKey, PublicKey,
    SessionKey, UnlockedKey,
};
use vaultline_transfer::{
    BlockTransport, BlockUpload, ChallengeKey, ChallengeSource, LinkKeyResolver, LinkKeys,
    TransferResult, TransportError, VerificationChallenge,
};

/// A committed revision as the server sees it.
#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct CommittedRevision {
    pub manifest_signature: String,
    pub blocks: Vec<Block>,
}

/// Block storage, revision commits and challenges, all in memory.
///
/// Failures can be queued per operation; each queued error is returned once.
#[allow(dead_code)]
pub struct MemoryServer {
    content_key: SessionKey,
    content: Mutex<HashMap<String, Bytes>>,
    revisions: Mutex<HashMap<TaskKey, CommittedRevision>>,
    upload_failures: Mutex<VecDeque<TransportError>>,
    commit_failures: Mutex<VecDeque<TransportError>>,
    proofs: Mutex<Vec<ProofToken>>,
    pub uploads: AtomicUsize,
    pub commits: AtomicUsize,
    pub challenge_fetches: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryServer {
    pub fn new(content_key: SessionKey) -> Self {
        Self {
            content_key,
            content: Mutex::new(HashMap::new()),
            revisions: Mutex::new(HashMap::new()),
            upload_failures: Mutex::new(VecDeque::new()),
            commit_failures: Mutex::new(VecDeque::new()),
            proofs: Mutex::new(Vec::new()),
            uploads: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            challenge_fetches: AtomicUsize::new(0),
        }
    }

    /// The code every challenge carries.
    pub fn code() -> Vec<u8> {
        (0u8..32).map(|b| b.wrapping_mul(7)).collect()
    }

    pub fn fail_next_upload(&self, error: TransportError) {
        self.upload_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_commit(&self, error: TransportError) {
        self.commit_failures.lock().unwrap().push_back(error);
    }

    pub fn revision(&self, key: &TaskKey) -> Option<CommittedRevision> {
        self.revisions.lock().unwrap().get(key).cloned()
    }

    pub fn stored_blocks(&self) -> usize {
        self.content.lock().unwrap().len()
    }

    pub fn proofs(&self) -> Vec<ProofToken> {
        self.proofs.lock().unwrap().clone()
    }

    /// Add a block to an already committed revision.
    pub fn append_block(&self, key: &TaskKey, block: Block, data: Bytes) {
        self.content
            .lock()
            .unwrap()
            .insert(block.locator.as_str().to_string(), data);
        if let Some(revision) = self.revisions.lock().unwrap().get_mut(key) {
            revision.blocks.push(block);
        }
    }

    /// Flip the first byte stored under `locator`.
    pub fn corrupt(&self, locator: &BlockLocator) {
        let mut content = self.content.lock().unwrap();
        let data = content.get_mut(locator.as_str()).unwrap();
        let mut bytes = data.to_vec();
        bytes[0] ^= 0xff;
        *data = Bytes::from(bytes);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn challenge_fetch_count(&self) -> usize {
        self.challenge_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockTransport for MemoryServer {
    async fn upload_block(
        &self,
        key: &TaskKey,
        block: &BlockUpload,
        ciphertext: Bytes,
    ) -> Result<BlockLocator, TransportError> {
        if let Some(e) = self.upload_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        if ContentHash::compute(&ciphertext) != block.content_hash {
            return Err(TransportError::http(422, "content hash mismatch"));
        }

        let locator = format!("{}/{}/{}", key.link_id, key.revision_id, block.index);
        self.content
            .lock()
            .unwrap()
            .insert(locator.clone(), ciphertext);
        self.proofs.lock().unwrap().push(block.proof);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(BlockLocator::new(locator))
    }

    async fn commit_revision(
        &self,
        key: &TaskKey,
        manifest_signature: &str,
        blocks: &[Block],
    ) -> Result<(), TransportError> {
        if let Some(e) = self.commit_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.revisions.lock().unwrap().insert(
            key.clone(),
            CommittedRevision {
                manifest_signature: manifest_signature.to_string(),
                blocks: blocks.to_vec(),
            },
        );
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_blocks(&self, key: &TaskKey) -> Result<Vec<Block>, TransportError> {
        self.revisions
            .lock()
            .unwrap()
            .get(key)
            .map(|r| r.blocks.clone())
            .ok_or_else(|| TransportError::http(404, "no such revision"))
    }

    async fn download_block(&self, locator: &BlockLocator) -> Result<Bytes, TransportError> {
        self.content
            .lock()
            .unwrap()
            .get(locator.as_str())
            .cloned()
            .ok_or_else(|| TransportError::http(404, "no such block"))
    }
}

#[async_trait]
impl ChallengeSource for MemoryServer {
    async fn fetch_challenge(
        &self,
        _key: &ChallengeKey,
    ) -> Result<VerificationChallenge, TransportError> {
        self.challenge_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(VerificationChallenge {
            code: Self::code(),
            content_key: self.content_key.clone(),
        })
    }
}

/// Resolves every task to the same keys.
pub struct StaticKeys(pub LinkKeys);

#[async_trait]
impl LinkKeyResolver for StaticKeys {
    async fn resolve(&self, _key: &TaskKey) -> TransferResult<LinkKeys> {
        Ok(self.0.clone())
    }
}

/// The default provider, counting detached signatures.
#[allow(dead_code)]
#[derive(Default)]
pub struct SigningCounter {
    pub signatures: AtomicUsize,
}

#[allow(dead_code)]
impl SigningCounter {
    pub fn sign_count(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

impl CryptoProvider for SigningCounter {
    fn unlock(&self, key: &ProtectedKey) -> CryptoResult<UnlockedKey> {
        DefaultCryptoProvider.unlock(key)
    }

    fn encrypt(&self, key: &SessionKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        DefaultCryptoProvider.encrypt(key, plaintext)
    }

    fn decrypt(&self, key: &SessionKey, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        DefaultCryptoProvider.decrypt(key, ciphertext)
    }

    fn sign_detached(&self, key: &UnlockedKey, data: &[u8]) -> CryptoResult<String> {
        self.signatures.fetch_add(1, Ordering::SeqCst);
        DefaultCryptoProvider.sign_detached(key, data)
    }

    fn verify_detached(&self, key: &PublicKey, data: &[u8], signature: &str) -> CryptoResult<()> {
        DefaultCryptoProvider.verify_detached(key, data, signature)
    }
}
