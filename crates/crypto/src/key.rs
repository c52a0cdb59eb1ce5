//! Key material: content session keys, passphrase-locked secrets and ed25519 keys.

use crate::aead;
use crate::error::{CryptoError, CryptoResult};
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// HKDF info string binding the key-encryption key to its purpose.
const UNLOCK_INFO: &[u8] = b"vaultline-key-unlock-v1";

const SALT_LEN: usize = 16;

/// Symmetric key encrypting the content blocks of one file revision.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Generate a new random session key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key material.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from base64.
    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(s.trim())
                .map_err(|e| CryptoError::KeyParsing(format!("invalid base64: {e}")))?,
        );
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::KeyParsing(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Encode as base64.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

/// A 32-byte secret sealed under a passphrase.
///
/// The key-encryption key is HKDF-SHA256(salt, passphrase); the secret is
/// sealed with AES-256-GCM under it.
#[derive(Clone, PartialEq, Eq)]
pub struct LockedKey {
    salt: [u8; SALT_LEN],
    sealed: Vec<u8>,
}

impl LockedKey {
    /// Seal `secret` under `passphrase` with a fresh salt.
    pub fn lock(secret: &[u8; 32], passphrase: &[u8]) -> CryptoResult<Self> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let kek = derive_kek(&salt, passphrase)?;
        let sealed = aead::seal(&kek, secret)?;
        Ok(Self { salt, sealed })
    }

    /// Recover the secret. Any failure, including a wrong passphrase, is an unlock failure.
    pub fn unlock(&self, passphrase: &[u8]) -> CryptoResult<UnlockedKey> {
        let kek = derive_kek(&self.salt, passphrase)?;
        let secret = Zeroizing::new(
            aead::open(&kek, &self.sealed).map_err(|e| CryptoError::Unlock(e.to_string()))?,
        );
        let arr: [u8; 32] = secret.as_slice().try_into().map_err(|_| {
            CryptoError::Unlock(format!("unlocked secret has {} bytes", secret.len()))
        })?;
        Ok(UnlockedKey(Zeroizing::new(arr)))
    }

    /// Armored form: base64(salt || sealed).
    pub fn to_armored(&self) -> String {
        let mut bytes = Vec::with_capacity(SALT_LEN + self.sealed.len());
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.sealed);
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    /// Parse the armored form.
    pub fn from_armored(s: &str) -> CryptoResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| CryptoError::KeyParsing(format!("invalid base64: {e}")))?;
        if bytes.len() <= SALT_LEN + aead::NONCE_LEN {
            return Err(CryptoError::KeyParsing(format!(
                "locked key too short ({} bytes)",
                bytes.len()
            )));
        }
        let (salt, sealed) = bytes.split_at(SALT_LEN);
        let salt: [u8; SALT_LEN] = salt
            .try_into()
            .map_err(|_| CryptoError::KeyParsing("invalid salt".to_string()))?;
        Ok(Self {
            salt,
            sealed: sealed.to_vec(),
        })
    }
}

impl fmt::Debug for LockedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockedKey({} sealed bytes)", self.sealed.len())
    }
}

fn derive_kek(salt: &[u8], passphrase: &[u8]) -> CryptoResult<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(UNLOCK_INFO, &mut okm[..])
        .map_err(|e| CryptoError::Unlock(format!("key derivation failed: {e}")))?;
    Ok(okm)
}

/// A locked key together with the passphrase that opens it.
#[derive(Clone)]
pub struct ProtectedKey {
    name: String,
    locked: LockedKey,
    passphrase: Zeroizing<Vec<u8>>,
}

impl ProtectedKey {
    /// Bundle a locked key with its passphrase.
    pub fn new(name: impl Into<String>, locked: LockedKey, passphrase: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            locked,
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }

    /// Key name, used in logs and signature metadata.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sealed material.
    pub fn locked(&self) -> &LockedKey {
        &self.locked
    }

    pub(crate) fn passphrase(&self) -> &[u8] {
        &self.passphrase
    }
}

impl fmt::Debug for ProtectedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedKey")
            .field("name", &self.name)
            .field("locked", &self.locked)
            .finish()
    }
}

/// Usable key material obtained by unlocking a [`ProtectedKey`].
pub struct UnlockedKey(Zeroizing<[u8; 32]>);

impl UnlockedKey {
    /// Use the secret as an ed25519 signing key.
    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.0)
    }

    /// Use the secret as a symmetric key.
    pub(crate) fn as_session_key(&self) -> SessionKey {
        SessionKey::from_bytes(*self.0)
    }

    /// The ed25519 public key for this secret.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.signing_key().verifying_key(),
        }
    }
}

impl fmt::Debug for UnlockedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnlockedKey([REDACTED])")
    }
}

/// A public key for signature verification.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Parse from base64 of the 32 raw bytes.
    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| CryptoError::KeyParsing(format!("invalid base64: {e}")))?;
        let key_bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::KeyParsing(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        let inner = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::KeyParsing(format!("invalid public key: {e}")))?;
        Ok(Self { inner })
    }

    /// Encode as base64.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.inner.as_bytes())
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.inner
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = self.to_base64();
        write!(f, "PublicKey({}...)", &b64[..8])
    }
}

/// A freshly generated signing key, protected under a passphrase.
pub struct KeyPair {
    /// The locked secret together with its passphrase.
    pub secret: ProtectedKey,
    /// The matching public key.
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new ed25519 key and lock it under `passphrase`.
    pub fn generate(name: impl Into<String>, passphrase: &[u8]) -> CryptoResult<Self> {
        let signing = SigningKey::generate(&mut OsRng);
        let secret = Zeroizing::new(signing.to_bytes());
        let locked = LockedKey::lock(&secret, passphrase)?;
        Ok(Self {
            secret: ProtectedKey::new(name, locked, passphrase.to_vec()),
            public: PublicKey {
                inner: signing.verifying_key(),
            },
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.secret.name())
            .field("public", &self.public)
            .finish()
    }
}
