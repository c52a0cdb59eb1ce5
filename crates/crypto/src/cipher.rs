//! Per-block encryption and signing for uploads, and the matching checks for downloads.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{ProtectedKey, PublicKey, SessionKey, UnlockedKey};
use crate::provider::{self, CryptoProvider};
use crate::verifier::SignatureCheck;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use vaultline_core::ContentHash;

/// Extension given to ciphertext files written next to their plaintext name.
const CIPHERTEXT_EXT: &str = "enc";

/// Output of encrypting one plaintext block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBlock {
    /// Position in the input list.
    pub position: usize,
    /// The ciphertext file.
    pub path: PathBuf,
    /// SHA-256 of the ciphertext file contents.
    pub content_hash: ContentHash,
    /// Ciphertext size in bytes.
    pub size: u64,
    /// Detached signature over the plaintext, sealed under the encryption key.
    pub encrypted_signature: String,
}

/// Keys shared by every block of one batch, unlocked once.
struct BatchKeys {
    session: SessionKey,
    encrypt: UnlockedKey,
    sign: UnlockedKey,
}

/// Encrypts and signs the plaintext blocks of one file revision.
#[derive(Clone)]
pub struct BlockCipher {
    provider: Arc<dyn CryptoProvider>,
    max_parallel: usize,
}

impl BlockCipher {
    /// Create a cipher processing up to four blocks at once.
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            provider,
            max_parallel: 4,
        }
    }

    /// Bound the number of blocks processed concurrently.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// The provider this cipher delegates to.
    pub fn provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.provider
    }

    /// Unlock a protected key off the async threads.
    pub async fn unlock(&self, key: &ProtectedKey) -> CryptoResult<UnlockedKey> {
        let provider = self.provider.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || provider.unlock(&key))
            .await
            .map_err(|e| CryptoError::Task(e.to_string()))?
    }

    /// Encrypt and sign every block in `plain_blocks`, writing ciphertext into `out_dir`.
    ///
    /// Keys are unlocked once for the whole batch. Results are returned in
    /// input order. If any block fails, ciphertext already written for the
    /// batch is removed and the first error is returned.
    pub async fn encrypt_blocks(
        &self,
        session_key: &SessionKey,
        encrypt_key: &ProtectedKey,
        sign_key: &ProtectedKey,
        plain_blocks: &[PathBuf],
        out_dir: &Path,
    ) -> CryptoResult<Vec<EncryptedBlock>> {
        let encrypt = self.unlock(encrypt_key).await?;
        let sign = self.unlock(sign_key).await?;
        let keys = Arc::new(BatchKeys {
            session: session_key.clone(),
            encrypt,
            sign,
        });

        let results: Vec<CryptoResult<EncryptedBlock>> =
            futures::stream::iter(plain_blocks.iter().cloned().enumerate())
                .map(|(position, plain)| {
                    let provider = self.provider.clone();
                    let keys = keys.clone();
                    let out_dir = out_dir.to_path_buf();
                    async move {
                        tokio::task::spawn_blocking(move || {
                            encrypt_one(provider.as_ref(), &keys, position, &plain, &out_dir)
                        })
                        .await
                        .map_err(|e| CryptoError::Task(e.to_string()))?
                    }
                })
                .buffered(self.max_parallel)
                .collect()
                .await;

        let mut encrypted = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(block) => encrypted.push(block),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }

        if let Some(e) = first_error {
            for block in &encrypted {
                let _ = std::fs::remove_file(&block.path);
            }
            return Err(e);
        }

        debug!(
            blocks = encrypted.len(),
            dir = %out_dir.display(),
            "Encrypted and signed blocks"
        );
        Ok(encrypted)
    }

    /// Decrypt one block's ciphertext. Empty ciphertext is an empty block.
    pub fn decrypt_block(
        &self,
        session_key: &SessionKey,
        ciphertext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        self.provider.decrypt(session_key, ciphertext)
    }

    /// Check a block's sealed signature against its plaintext.
    ///
    /// With [`SignatureCheck::Lenient`] a bad signature is logged and `Ok` is
    /// returned; with [`SignatureCheck::Strict`] it is an error. Failing to
    /// unseal the signature is treated the same as a bad signature.
    pub fn check_signature(
        &self,
        verify_key: &PublicKey,
        encrypt_key: &UnlockedKey,
        plaintext: &[u8],
        encrypted_signature: &str,
        check: SignatureCheck,
    ) -> CryptoResult<()> {
        let outcome =
            provider::decrypt_signature(self.provider.as_ref(), encrypt_key, encrypted_signature)
                .and_then(|sig| self.provider.verify_detached(verify_key, plaintext, &sig));

        match (outcome, check) {
            (Ok(()), _) => Ok(()),
            (Err(e), SignatureCheck::Strict) => Err(e),
            (Err(e), SignatureCheck::Lenient) => {
                warn!(error = %e, "Block signature did not verify");
                Ok(())
            }
        }
    }
}

fn encrypt_one(
    provider: &dyn CryptoProvider,
    keys: &BatchKeys,
    position: usize,
    plain: &Path,
    out_dir: &Path,
) -> CryptoResult<EncryptedBlock> {
    let plaintext = std::fs::read(plain)?;
    let out = ciphertext_path(plain, out_dir, position);

    // Empty blocks are never encrypted but still get a signature.
    let ciphertext = if plaintext.is_empty() {
        Vec::new()
    } else {
        provider.encrypt(&keys.session, &plaintext)?
    };

    let signature = provider
        .sign_detached(&keys.sign, &plaintext)
        .map_err(|e| match e {
            CryptoError::Signing(_) => e,
            other => CryptoError::Signing(other.to_string()),
        })?;
    let encrypted_signature =
        provider::encrypt_signature(provider, &keys.encrypt.as_session_key(), &signature)?;
    std::fs::write(&out, &ciphertext)?;

    Ok(EncryptedBlock {
        position,
        content_hash: ContentHash::compute(&ciphertext),
        size: ciphertext.len() as u64,
        path: out,
        encrypted_signature,
    })
}

fn ciphertext_path(plain: &Path, out_dir: &Path, position: usize) -> PathBuf {
    let name = plain
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("block-{position}"));
    out_dir.join(format!("{name}.{CIPHERTEXT_EXT}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;
    use crate::provider::DefaultCryptoProvider;

    struct Fixture {
        cipher: BlockCipher,
        session: SessionKey,
        encrypt: KeyPair,
        sign: KeyPair,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        Fixture {
            cipher: BlockCipher::new(Arc::new(DefaultCryptoProvider)),
            session: SessionKey::generate(),
            encrypt: KeyPair::generate("enc", b"pw").unwrap(),
            sign: KeyPair::generate("sign", b"pw").unwrap(),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write_block(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_encrypt_blocks_in_order() {
        let f = fixture();
        let blocks = vec![
            write_block(f.dir.path(), "a", b"first block"),
            write_block(f.dir.path(), "b", b"second block"),
            write_block(f.dir.path(), "c", b"third"),
        ];

        let out = f
            .cipher
            .encrypt_blocks(&f.session, &f.encrypt.secret, &f.sign.secret, &blocks, f.dir.path())
            .await
            .unwrap();

        assert_eq!(out.len(), 3);
        for (i, block) in out.iter().enumerate() {
            assert_eq!(block.position, i);
            let ciphertext = std::fs::read(&block.path).unwrap();
            assert_eq!(block.content_hash, ContentHash::compute(&ciphertext));
            assert_eq!(block.size, ciphertext.len() as u64);
            let plain = f.cipher.decrypt_block(&f.session, &ciphertext).unwrap();
            assert_eq!(plain, std::fs::read(&blocks[i]).unwrap());
        }
    }

    #[tokio::test]
    async fn test_signatures_verify_strictly() {
        let f = fixture();
        let blocks = vec![write_block(f.dir.path(), "a", b"payload")];
        let out = f
            .cipher
            .encrypt_blocks(&f.session, &f.encrypt.secret, &f.sign.secret, &blocks, f.dir.path())
            .await
            .unwrap();

        let encrypt = f.cipher.unlock(&f.encrypt.secret).await.unwrap();
        f.cipher
            .check_signature(
                &f.sign.public,
                &encrypt,
                b"payload",
                &out[0].encrypted_signature,
                SignatureCheck::Strict,
            )
            .unwrap();
        assert!(
            f.cipher
                .check_signature(
                    &f.sign.public,
                    &encrypt,
                    b"other",
                    &out[0].encrypted_signature,
                    SignatureCheck::Strict,
                )
                .is_err()
        );
        f.cipher
            .check_signature(
                &f.sign.public,
                &encrypt,
                b"other",
                &out[0].encrypted_signature,
                SignatureCheck::Lenient,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_block_is_signed_but_not_encrypted() {
        let f = fixture();
        let blocks = vec![write_block(f.dir.path(), "empty", b"")];
        let out = f
            .cipher
            .encrypt_blocks(&f.session, &f.encrypt.secret, &f.sign.secret, &blocks, f.dir.path())
            .await
            .unwrap();

        assert_eq!(out[0].size, 0);
        assert!(out[0].path.exists());
        assert_eq!(std::fs::metadata(&out[0].path).unwrap().len(), 0);

        let encrypt = f.cipher.unlock(&f.encrypt.secret).await.unwrap();
        f.cipher
            .check_signature(
                &f.sign.public,
                &encrypt,
                b"",
                &out[0].encrypted_signature,
                SignatureCheck::Strict,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_wrong_passphrase_fails_whole_batch() {
        let f = fixture();
        let blocks = vec![write_block(f.dir.path(), "a", b"data")];
        let bad = ProtectedKey::new("sign", f.sign.secret.locked().clone(), b"nope".to_vec());

        let result = f
            .cipher
            .encrypt_blocks(&f.session, &f.encrypt.secret, &bad, &blocks, f.dir.path())
            .await;
        assert!(matches!(result, Err(CryptoError::Unlock(_))));
        assert!(!f.dir.path().join("a.enc").exists());
    }

    #[tokio::test]
    async fn test_missing_block_removes_partial_output() {
        let f = fixture();
        let blocks = vec![
            write_block(f.dir.path(), "a", b"data"),
            f.dir.path().join("missing"),
        ];
        let result = f
            .cipher
            .encrypt_blocks(&f.session, &f.encrypt.secret, &f.sign.secret, &blocks, f.dir.path())
            .await;
        assert!(matches!(result, Err(CryptoError::Io(_))));
        assert!(!f.dir.path().join("a.enc").exists());
    }
}
