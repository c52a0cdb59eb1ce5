//! Key material for a file link.

use crate::error::TransferResult;
use async_trait::async_trait;
use vaultline_core::TaskKey;
use vaultline_crypto::{ProtectedKey, PublicKey, SessionKey};

/// The keys needed to move one revision's blocks.
#[derive(Clone, Debug)]
pub struct LinkKeys {
    /// Content session key of the revision.
    pub session_key: SessionKey,
    /// Key block signatures are sealed under.
    pub encrypt_key: ProtectedKey,
    /// Key that signs blocks and the manifest.
    pub sign_key: ProtectedKey,
    /// Public half of `sign_key`, for checking downloads.
    pub verify_key: PublicKey,
}

/// Looks up the keys of a file link.
#[async_trait]
pub trait LinkKeyResolver: Send + Sync {
    /// Keys for the link and revision named by `key`.
    async fn resolve(&self, key: &TaskKey) -> TransferResult<LinkKeys>;
}
