//! The crypto primitives the block engine consumes.

use crate::aead;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{ProtectedKey, PublicKey, SessionKey, UnlockedKey};
use base64::Engine;
use ed25519_dalek::{Signer as _, Verifier as _};

/// Symmetric encrypt/decrypt, detached sign/verify and key unwrap.
///
/// Implementations must be callable from blocking worker threads.
pub trait CryptoProvider: Send + Sync {
    /// Unlock passphrase-protected key material.
    fn unlock(&self, key: &ProtectedKey) -> CryptoResult<UnlockedKey>;

    /// Encrypt under a session key.
    fn encrypt(&self, key: &SessionKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Decrypt under a session key.
    fn decrypt(&self, key: &SessionKey, ciphertext: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Produce a base64 detached signature over `data`.
    fn sign_detached(&self, key: &UnlockedKey, data: &[u8]) -> CryptoResult<String>;

    /// Check a base64 detached signature over `data`.
    fn verify_detached(&self, key: &PublicKey, data: &[u8], signature: &str) -> CryptoResult<()>;
}

/// AES-256-GCM, ed25519 and HKDF-locked keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {
    fn unlock(&self, key: &ProtectedKey) -> CryptoResult<UnlockedKey> {
        key.locked().unlock(key.passphrase())
    }

    fn encrypt(&self, key: &SessionKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        aead::seal(key.as_bytes(), plaintext)
    }

    fn decrypt(&self, key: &SessionKey, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        aead::open(key.as_bytes(), ciphertext)
    }

    fn sign_detached(&self, key: &UnlockedKey, data: &[u8]) -> CryptoResult<String> {
        let sig = key.signing_key().sign(data);
        Ok(base64::engine::general_purpose::STANDARD.encode(sig.to_bytes()))
    }

    fn verify_detached(&self, key: &PublicKey, data: &[u8], signature: &str) -> CryptoResult<()> {
        let sig_bytes = base64::engine::general_purpose::STANDARD
            .decode(signature)
            .map_err(|e| CryptoError::InvalidSignature(format!("invalid base64: {e}")))?;

        let sig_array: [u8; 64] = sig_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidSignature(format!("expected 64 bytes, got {}", sig_bytes.len()))
        })?;

        let signature = ed25519_dalek::Signature::from_bytes(&sig_array);

        key.verifying_key()
            .verify(data, &signature)
            .map_err(|_| CryptoError::SignatureVerification)
    }
}

/// Encrypt a detached signature under the encryption key, base64 encoded.
pub(crate) fn encrypt_signature(
    provider: &dyn CryptoProvider,
    encrypt_key: &SessionKey,
    signature: &str,
) -> CryptoResult<String> {
    let sealed = provider.encrypt(encrypt_key, signature.as_bytes())?;
    Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
}

/// Reverse of [`encrypt_signature`].
pub fn decrypt_signature(
    provider: &dyn CryptoProvider,
    encrypt_key: &UnlockedKey,
    encrypted: &str,
) -> CryptoResult<String> {
    let sealed = base64::engine::general_purpose::STANDARD
        .decode(encrypted)
        .map_err(|e| CryptoError::InvalidSignature(format!("invalid base64: {e}")))?;
    let plain = provider.decrypt(&encrypt_key.as_session_key(), &sealed)?;
    String::from_utf8(plain)
        .map_err(|e| CryptoError::InvalidSignature(format!("signature is not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;

    #[test]
    fn test_sign_and_verify() {
        let provider = DefaultCryptoProvider;
        let pair = KeyPair::generate("sign-1", b"pw").unwrap();
        let unlocked = provider.unlock(&pair.secret).unwrap();

        let sig = provider.sign_detached(&unlocked, b"payload").unwrap();
        provider
            .verify_detached(&pair.public, b"payload", &sig)
            .unwrap();
        assert!(matches!(
            provider.verify_detached(&pair.public, b"tampered", &sig),
            Err(CryptoError::SignatureVerification)
        ));
    }

    #[test]
    fn test_verify_with_wrong_key() {
        let provider = DefaultCryptoProvider;
        let signer = KeyPair::generate("key-1", b"pw").unwrap();
        let other = KeyPair::generate("key-2", b"pw").unwrap();
        let unlocked = provider.unlock(&signer.secret).unwrap();
        let sig = provider.sign_detached(&unlocked, b"payload").unwrap();
        assert!(
            provider
                .verify_detached(&other.public, b"payload", &sig)
                .is_err()
        );
    }

    #[test]
    fn test_malformed_signature() {
        let provider = DefaultCryptoProvider;
        let pair = KeyPair::generate("key", b"pw").unwrap();
        assert!(matches!(
            provider.verify_detached(&pair.public, b"x", "not base64!"),
            Err(CryptoError::InvalidSignature(_))
        ));
        assert!(matches!(
            provider.verify_detached(&pair.public, b"x", "AAAA"),
            Err(CryptoError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_signature_encryption() {
        let provider = DefaultCryptoProvider;
        let enc = KeyPair::generate("enc", b"pw").unwrap();
        let unlocked = provider.unlock(&enc.secret).unwrap();
        let sealed =
            encrypt_signature(&provider, &unlocked.as_session_key(), "c2lnbmF0dXJl").unwrap();
        assert_ne!(sealed, "c2lnbmF0dXJl");
        assert_eq!(
            decrypt_signature(&provider, &unlocked, &sealed).unwrap(),
            "c2lnbmF0dXJl"
        );
    }
}
