//! Proof-of-possession answers for server-issued verification challenges.
//!
//! The server hands out a random code per revision. For every uploaded
//! block the client decrypts its own ciphertext and XORs the first bytes of
//! plaintext with the code; the resulting token proves the plaintext is at
//! hand without sending it again.

use crate::cipher::BlockCipher;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{PublicKey, SessionKey, UnlockedKey};
use crate::provider::CryptoProvider;
use base64::Engine;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Length of a verification code, and therefore of every proof token.
pub const VERIFICATION_CODE_SIZE: usize = 32;

/// How a signature that fails to verify is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Log the failure and carry on.
    #[default]
    Lenient,
    /// Fail the operation.
    Strict,
}

impl SignatureCheck {
    /// `Strict` when `strict` is set.
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::Lenient }
    }
}

/// The token answering a challenge for one block.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProofToken([u8; VERIFICATION_CODE_SIZE]);

impl ProofToken {
    /// Raw token bytes.
    pub fn as_bytes(&self) -> &[u8; VERIFICATION_CODE_SIZE] {
        &self.0
    }

    /// Encode as base64, the form the server expects.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }
}

impl fmt::Debug for ProofToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProofToken({})", self.to_base64())
    }
}

/// A ciphertext block file to answer for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockFile {
    /// Ciphertext on disk.
    pub path: PathBuf,
    /// Sealed detached signature over the plaintext, if one is known.
    pub encrypted_signature: Option<String>,
}

impl BlockFile {
    /// A block with no signature to check.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encrypted_signature: None,
        }
    }

    /// Attach the sealed signature.
    pub fn with_signature(mut self, encrypted_signature: impl Into<String>) -> Self {
        self.encrypted_signature = Some(encrypted_signature.into());
        self
    }
}

/// Keys for checking block signatures while answering.
pub struct SignatureKeys {
    /// Public half of the key that signed the blocks.
    pub verify_key: PublicKey,
    /// Key the signatures are sealed under.
    pub encrypt_key: Arc<UnlockedKey>,
}

/// Answers verification challenges for the blocks of one revision.
pub struct PossessionVerifier {
    cipher: BlockCipher,
    content_key: SessionKey,
    code: [u8; VERIFICATION_CODE_SIZE],
    signatures: Option<SignatureKeys>,
    check: SignatureCheck,
}

impl PossessionVerifier {
    /// Create a verifier. The code must be exactly [`VERIFICATION_CODE_SIZE`] bytes.
    pub fn new(cipher: BlockCipher, content_key: SessionKey, code: &[u8]) -> CryptoResult<Self> {
        let code: [u8; VERIFICATION_CODE_SIZE] =
            code.try_into().map_err(|_| CryptoError::InvalidVerificationCode {
                expected: VERIFICATION_CODE_SIZE,
                actual: code.len(),
            })?;
        Ok(Self {
            cipher,
            content_key,
            code,
            signatures: None,
            check: SignatureCheck::Lenient,
        })
    }

    /// Also check block signatures; `check` decides whether a bad one is fatal.
    pub fn with_signature_check(mut self, keys: SignatureKeys, check: SignatureCheck) -> Self {
        self.signatures = Some(keys);
        self.check = check;
        self
    }

    /// Proof token for one block of plaintext.
    ///
    /// Plaintext shorter than the code is padded with zero bytes.
    pub fn proof_token(&self, plaintext: &[u8]) -> ProofToken {
        let mut head = [0u8; VERIFICATION_CODE_SIZE];
        let n = plaintext.len().min(VERIFICATION_CODE_SIZE);
        head[..n].copy_from_slice(&plaintext[..n]);

        let mut token = [0u8; VERIFICATION_CODE_SIZE];
        for (out, (h, c)) in token.iter_mut().zip(head.iter().zip(self.code.iter())) {
            *out = h ^ c;
        }
        ProofToken(token)
    }

    /// Answer for every file, keyed by path. All or nothing.
    pub fn verify_blocks(&self, files: &[BlockFile]) -> CryptoResult<HashMap<PathBuf, ProofToken>> {
        if files.is_empty() {
            return Err(CryptoError::InvalidArgument("no blocks to verify".to_string()));
        }
        if let Some(missing) = files.iter().find(|f| !f.path.is_file()) {
            return Err(CryptoError::MissingBlockFile(missing.path.clone()));
        }

        let mut tokens = HashMap::with_capacity(files.len());
        for file in files {
            let plaintext = self.decrypt(file).map_err(|e| match e {
                CryptoError::Io(_) => e,
                other => CryptoError::BlockVerification {
                    path: file.path.clone(),
                    source: Box::new(other),
                },
            })?;
            tokens.insert(file.path.clone(), self.proof_token(&plaintext));
        }

        debug!(blocks = tokens.len(), "Answered verification challenge");
        Ok(tokens)
    }

    fn decrypt(&self, file: &BlockFile) -> CryptoResult<Vec<u8>> {
        let ciphertext = std::fs::read(&file.path)?;
        let plaintext = self.cipher.decrypt_block(&self.content_key, &ciphertext)?;

        if let (Some(keys), Some(sig)) = (&self.signatures, &file.encrypted_signature) {
            self.cipher.check_signature(
                &keys.verify_key,
                &keys.encrypt_key,
                &plaintext,
                sig,
                self.check,
            )?;
        }
        Ok(plaintext)
    }
}

/// Answer a challenge for `block_files` with `content_key` and the server's code.
///
/// Decryption runs on the blocking pool. Signatures are not checked.
pub async fn answer_challenge(
    provider: Arc<dyn CryptoProvider>,
    content_key: SessionKey,
    verification_code: &[u8],
    block_files: Vec<BlockFile>,
) -> CryptoResult<HashMap<PathBuf, ProofToken>> {
    let verifier =
        PossessionVerifier::new(BlockCipher::new(provider), content_key, verification_code)?;
    tokio::task::spawn_blocking(move || verifier.verify_blocks(&block_files))
        .await
        .map_err(|e| CryptoError::Task(e.to_string()))?
}

/// Byte-wise XOR of two equal-length arrays.
pub fn xor(a: &[u8], b: &[u8]) -> CryptoResult<Vec<u8>> {
    if a.len() != b.len() {
        return Err(CryptoError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(a.iter().zip(b).map(|(x, y)| x ^ y).collect())
}
