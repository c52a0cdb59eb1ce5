use std::sync::atomic::{AtomicUsize, Ordering};
use vaultline_crypto::{
    CryptoError, CryptoProvider, CryptoResult, DefaultCryptoProvider, ProtectedKey, PublicKey,
    SessionKey, UnlockedKey,
};

/// Delegates to the default provider and counts unlock and encrypt calls.
#[allow(dead_code)]
#[derive(Default)]
pub struct CountingProvider {
    pub unlocks: AtomicUsize,
    pub encryptions: AtomicUsize,
}

#[allow(dead_code)]
impl CountingProvider {
    pub fn unlock_count(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }

    pub fn encrypt_count(&self) -> usize {
        self.encryptions.load(Ordering::SeqCst)
    }
}

impl CryptoProvider for CountingProvider {
    fn unlock(&self, key: &ProtectedKey) -> CryptoResult<UnlockedKey> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        DefaultCryptoProvider.unlock(key)
    }

    fn encrypt(&self, key: &SessionKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.encryptions.fetch_add(1, Ordering::SeqCst);
        DefaultCryptoProvider.encrypt(key, plaintext)
    }

    fn decrypt(&self, key: &SessionKey, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        DefaultCryptoProvider.decrypt(key, ciphertext)
    }

    fn sign_detached(&self, key: &UnlockedKey, data: &[u8]) -> CryptoResult<String> {
        DefaultCryptoProvider.sign_detached(key, data)
    }

    fn verify_detached(&self, key: &PublicKey, data: &[u8], signature: &str) -> CryptoResult<()> {
        DefaultCryptoProvider.verify_detached(key, data, signature)
    }
}

/// Fails decryption and encryption; everything else is real.
#[allow(dead_code)]
pub struct FailingProvider;

impl CryptoProvider for FailingProvider {
    fn unlock(&self, key: &ProtectedKey) -> CryptoResult<UnlockedKey> {
        DefaultCryptoProvider.unlock(key)
    }

    fn encrypt(&self, _key: &SessionKey, _plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        Err(CryptoError::Encryption("injected failure".to_string()))
    }

    fn decrypt(&self, _key: &SessionKey, _ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        Err(CryptoError::Decryption("injected failure".to_string()))
    }

    fn sign_detached(&self, key: &UnlockedKey, data: &[u8]) -> CryptoResult<String> {
        DefaultCryptoProvider.sign_detached(key, data)
    }

    fn verify_detached(&self, key: &PublicKey, data: &[u8], signature: &str) -> CryptoResult<()> {
        DefaultCryptoProvider.verify_detached(key, data, signature)
    }
}
