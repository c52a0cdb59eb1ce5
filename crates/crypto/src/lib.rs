//! Block encryption, signing and possession proofs for vaultline.
//!
//! This crate provides:
//! - Passphrase-locked key material and ed25519 signing keys
//! - The [`CryptoProvider`] seam and its default AES-256-GCM / ed25519 implementation
//! - Per-block encryption with detached plaintext signatures ([`BlockCipher`])
//! - Manifest signing over ordered block hashes ([`ManifestSigner`])
//! - Answers to proof-of-possession challenges ([`PossessionVerifier`])

mod aead;
pub mod cipher;
pub mod error;
pub mod key;
pub mod manifest;
pub mod provider;
pub mod verifier;

pub use cipher::{BlockCipher, EncryptedBlock};
pub use error::{CryptoError, CryptoResult};
pub use key::{KeyPair, LockedKey, ProtectedKey, PublicKey, SessionKey, UnlockedKey};
pub use manifest::ManifestSigner;
pub use provider::{CryptoProvider, DefaultCryptoProvider};
pub use verifier::{
    BlockFile, PossessionVerifier, ProofToken, SignatureCheck, SignatureKeys,
    VERIFICATION_CODE_SIZE, answer_challenge, xor,
};
