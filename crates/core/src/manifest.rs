//! Manifest over the ordered block hashes of one file revision.

use crate::block::{Block, BlockType};
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// Ordered list of content block hashes.
///
/// The signed payload is the plain concatenation of the hashes in order, so
/// reordering or dropping a block always yields different bytes. An empty
/// manifest is valid and signs as the empty byte string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    hashes: Vec<ContentHash>,
}

impl Manifest {
    /// Manifest with no blocks.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Manifest over hashes in exactly the given order.
    pub fn from_hashes(hashes: Vec<ContentHash>) -> Self {
        Self { hashes }
    }

    /// Manifest over the content blocks of a block set, in ascending index order.
    ///
    /// Thumbnail blocks are not part of the manifest. Every content block must
    /// carry a content hash and indices must be unique.
    pub fn from_blocks(blocks: &[Block]) -> crate::Result<Self> {
        let mut content: Vec<&Block> = blocks
            .iter()
            .filter(|b| b.block_type() == BlockType::File)
            .collect();
        content.sort_by_key(|b| b.index);

        for pair in content.windows(2) {
            if pair[0].index == pair[1].index {
                return Err(crate::Error::DuplicateBlockIndex(pair[0].index.get()));
            }
        }

        let hashes = content
            .into_iter()
            .map(|b| {
                b.content_hash
                    .ok_or(crate::Error::MissingContentHash(b.index.get()))
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(Self { hashes })
    }

    /// The ordered hashes.
    pub fn hashes(&self) -> &[ContentHash] {
        &self.hashes
    }

    /// Number of blocks covered.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether no blocks are covered.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// The bytes that get signed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.hashes.len() * 32);
        for hash in &self.hashes {
            out.extend_from_slice(hash.as_bytes());
        }
        out
    }

    /// SHA-256 over the signed bytes, useful as a short identifier in logs.
    pub fn digest(&self) -> ContentHash {
        ContentHash::compute(&self.to_bytes())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}
