//! In-memory cache of verification challenges.
//!
//! Every concurrent lookup of the same key shares a single outstanding fetch.
//! Entries live until [`ChallengeCache::invalidate`]; a failed fetch leaves
//! the slot empty for the next caller and never evicts anything.

use crate::error::TransportError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use vaultline_core::TaskKey;
use vaultline_crypto::SessionKey;

/// Identifies the challenge of one revision.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChallengeKey {
    pub user_id: String,
    pub share_id: String,
    pub link_id: String,
    pub revision_id: String,
}

impl From<&TaskKey> for ChallengeKey {
    fn from(key: &TaskKey) -> Self {
        Self {
            user_id: key.user_id.clone(),
            share_id: key.share_id.clone(),
            link_id: key.link_id.clone(),
            revision_id: key.revision_id.clone(),
        }
    }
}

/// A server-issued code and the content key needed to answer it.
pub struct VerificationChallenge {
    /// Random code; must be 32 bytes to be answerable.
    pub code: Vec<u8>,
    /// Key the revision's blocks were encrypted with.
    pub content_key: SessionKey,
}

impl fmt::Debug for VerificationChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationChallenge")
            .field("code_len", &self.code.len())
            .finish_non_exhaustive()
    }
}

/// Where challenges come from.
#[async_trait]
pub trait ChallengeSource: Send + Sync {
    /// Ask the server for the challenge of a revision.
    async fn fetch_challenge(
        &self,
        key: &ChallengeKey,
    ) -> Result<VerificationChallenge, TransportError>;
}

type Slot = Arc<OnceCell<Arc<VerificationChallenge>>>;

/// Coalescing challenge cache, injected where it is needed.
pub struct ChallengeCache {
    source: Arc<dyn ChallengeSource>,
    entries: DashMap<ChallengeKey, Slot>,
}

impl ChallengeCache {
    /// Create an empty cache over `source`.
    pub fn new(source: Arc<dyn ChallengeSource>) -> Self {
        Self {
            source,
            entries: DashMap::new(),
        }
    }

    /// The cached challenge for `key`, fetching it if absent.
    pub async fn get(
        &self,
        key: &ChallengeKey,
    ) -> Result<Arc<VerificationChallenge>, TransportError> {
        // Clone the slot out so no map guard is held across the fetch.
        let slot: Slot = self.entries.entry(key.clone()).or_default().clone();

        let challenge = slot
            .get_or_try_init(|| async {
                tracing::debug!(
                    link = %key.link_id,
                    revision = %key.revision_id,
                    "Fetching verification challenge"
                );
                self.source.fetch_challenge(key).await.map(Arc::new)
            })
            .await?;
        Ok(challenge.clone())
    }

    /// Drop the entry for `key`. Returns whether one was present.
    pub fn invalidate(&self, key: &ChallengeKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of keys with a slot, filled or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no slots.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
