//! Signing the manifest of a revision's block set.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{ProtectedKey, PublicKey, UnlockedKey};
use crate::provider::CryptoProvider;
use std::sync::Arc;
use tracing::debug;
use vaultline_core::{Block, ContentHash, Manifest};

/// Produces one signature over the ordered block hashes of a revision.
#[derive(Clone)]
pub struct ManifestSigner {
    provider: Arc<dyn CryptoProvider>,
}

impl ManifestSigner {
    /// Create a signer.
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self { provider }
    }

    /// Sign the manifest of `blocks`: content blocks by ascending index.
    ///
    /// The blocks themselves are left untouched.
    pub async fn sign(&self, sign_key: &ProtectedKey, blocks: &[Block]) -> CryptoResult<String> {
        let manifest = Manifest::from_blocks(blocks)
            .map_err(|e| CryptoError::InvalidArgument(e.to_string()))?;
        self.sign_manifest(sign_key, manifest).await
    }

    /// Sign hashes in exactly the order given.
    pub async fn sign_hashes(
        &self,
        sign_key: &ProtectedKey,
        ordered_hashes: &[ContentHash],
    ) -> CryptoResult<String> {
        self.sign_manifest(sign_key, Manifest::from_hashes(ordered_hashes.to_vec()))
            .await
    }

    /// Sign with an already unlocked key.
    pub fn sign_unlocked(&self, key: &UnlockedKey, manifest: &Manifest) -> CryptoResult<String> {
        self.provider.sign_detached(key, &manifest.to_bytes())
    }

    /// Check a manifest signature.
    pub fn verify(
        &self,
        verify_key: &PublicKey,
        manifest: &Manifest,
        signature: &str,
    ) -> CryptoResult<()> {
        self.provider
            .verify_detached(verify_key, &manifest.to_bytes(), signature)
    }

    async fn sign_manifest(&self, sign_key: &ProtectedKey, manifest: Manifest) -> CryptoResult<String> {
        let provider = self.provider.clone();
        let key = sign_key.clone();
        let signature = tokio::task::spawn_blocking(move || {
            let unlocked = provider.unlock(&key)?;
            provider.sign_detached(&unlocked, &manifest.to_bytes())
        })
        .await
        .map_err(|e| CryptoError::Task(e.to_string()))??;

        debug!(key = sign_key.name(), "Signed manifest");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;
    use crate::provider::DefaultCryptoProvider;
    use vaultline_core::BlockLocator;

    fn signer() -> ManifestSigner {
        ManifestSigner::new(Arc::new(DefaultCryptoProvider))
    }

    fn block(index: i64, data: &[u8]) -> Block {
        Block::new(index, BlockLocator::new(format!("slot-{index}")))
            .unwrap()
            .with_content_hash(ContentHash::compute(data))
    }

    #[tokio::test]
    async fn test_same_blocks_same_signature() {
        let pair = KeyPair::generate("sign", b"pw").unwrap();
        let blocks = vec![block(1, b"a"), block(2, b"b")];
        let s1 = signer().sign(&pair.secret, &blocks).await.unwrap();
        let s2 = signer().sign(&pair.secret, &blocks).await.unwrap();
        assert_eq!(s1, s2);

        let manifest = Manifest::from_blocks(&blocks).unwrap();
        signer().verify(&pair.public, &manifest, &s1).unwrap();
    }

    #[tokio::test]
    async fn test_block_input_order_does_not_matter() {
        let pair = KeyPair::generate("sign", b"pw").unwrap();
        let forward = vec![block(1, b"a"), block(2, b"b")];
        let shuffled = vec![block(2, b"b"), block(1, b"a")];
        assert_eq!(
            signer().sign(&pair.secret, &forward).await.unwrap(),
            signer().sign(&pair.secret, &shuffled).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_permuted_hashes_are_rejected() {
        let pair = KeyPair::generate("sign", b"pw").unwrap();
        let a = ContentHash::compute(b"a");
        let b = ContentHash::compute(b"b");
        let sig = signer().sign_hashes(&pair.secret, &[a, b]).await.unwrap();

        let permuted = Manifest::from_hashes(vec![b, a]);
        assert!(matches!(
            signer().verify(&pair.public, &permuted, &sig),
            Err(CryptoError::SignatureVerification)
        ));
        let dropped = Manifest::from_hashes(vec![a]);
        assert!(signer().verify(&pair.public, &dropped, &sig).is_err());
    }

    #[tokio::test]
    async fn test_empty_manifest_is_signed() {
        let pair = KeyPair::generate("sign", b"pw").unwrap();
        let sig = signer().sign(&pair.secret, &[]).await.unwrap();
        signer()
            .verify(&pair.public, &Manifest::empty(), &sig)
            .unwrap();

        // A thumbnail-only revision signs the same empty manifest.
        let thumb_only = signer()
            .sign(&pair.secret, &[block(-1, b"thumb")])
            .await
            .unwrap();
        assert_eq!(thumb_only, sig);
    }

    #[tokio::test]
    async fn test_unhashed_block_is_an_argument_error() {
        let pair = KeyPair::generate("sign", b"pw").unwrap();
        let unhashed = Block::new(1, BlockLocator::new("slot")).unwrap();
        let err = signer().sign(&pair.secret, &[unhashed]).await.unwrap_err();
        assert!(err.is_argument_error());
    }
}
