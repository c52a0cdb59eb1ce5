//! AES-256-GCM sealing shared by block encryption and key locking.
//!
//! Wire format: nonce (12 bytes) || ciphertext (includes 16-byte GCM tag)

use crate::error::{CryptoError, CryptoResult};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand_core::{OsRng, RngCore};

pub(crate) const NONCE_LEN: usize = 12;

pub(crate) fn seal(key: &[u8; 32], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::Encryption(format!("failed to create cipher: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(crate) fn open(key: &[u8; 32], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::Decryption(format!(
            "ciphertext too short ({} bytes)",
            sealed.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::Decryption(format!("failed to create cipher: {e}")))?;
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| CryptoError::Decryption(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = [7u8; 32];
        let sealed = seal(&key, b"block data").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 10 + 16);
        assert_eq!(open(&key, &sealed).unwrap(), b"block data");
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let sealed = seal(&[1u8; 32], b"secret").unwrap();
        assert!(matches!(
            open(&[2u8; 32], &sealed),
            Err(CryptoError::Decryption(_))
        ));
        assert!(matches!(
            open(&[1u8; 32], &sealed[..5]),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_nonces_differ() {
        let key = [3u8; 32];
        assert_ne!(seal(&key, b"same").unwrap(), seal(&key, b"same").unwrap());
    }
}
