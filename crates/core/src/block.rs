//! Block identity and type derivation.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a block within a file revision.
///
/// Content blocks are numbered `1..=N` in upload order. Two negative
/// sentinels identify thumbnail blocks. Every other value is rejected.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct BlockIndex(i64);

impl BlockIndex {
    /// Sentinel index of the default thumbnail block.
    pub const THUMBNAIL_DEFAULT: BlockIndex = BlockIndex(-1);

    /// Sentinel index of the photo thumbnail block.
    pub const THUMBNAIL_PHOTO: BlockIndex = BlockIndex(-2);

    /// Validate a raw index.
    pub fn new(index: i64) -> crate::Result<Self> {
        match index {
            i if i >= 1 => Ok(Self(i)),
            -1 | -2 => Ok(Self(index)),
            other => Err(crate::Error::InvalidBlockIndex(other)),
        }
    }

    /// Index of the n-th content block (0-based position).
    pub fn for_position(position: usize) -> Self {
        Self(position as i64 + 1)
    }

    /// Raw index value.
    pub fn get(&self) -> i64 {
        self.0
    }

    /// The block type this index denotes.
    pub fn block_type(&self) -> BlockType {
        BlockType::from_index(*self)
    }
}

impl TryFrom<i64> for BlockIndex {
    type Error = crate::Error;

    fn try_from(value: i64) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<BlockIndex> for i64 {
    fn from(index: BlockIndex) -> Self {
        index.0
    }
}

impl fmt::Debug for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockIndex({})", self.0)
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of content a block carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Ordinary file content.
    File,
    /// Default (small) thumbnail.
    ThumbnailDefault,
    /// Photo preview thumbnail.
    ThumbnailPhoto,
}

impl BlockType {
    /// Derive the block type from a validated index.
    pub fn from_index(index: BlockIndex) -> Self {
        match index {
            BlockIndex::THUMBNAIL_DEFAULT => Self::ThumbnailDefault,
            BlockIndex::THUMBNAIL_PHOTO => Self::ThumbnailPhoto,
            _ => Self::File,
        }
    }

    /// Whether this is a thumbnail variant.
    pub fn is_thumbnail(&self) -> bool {
        matches!(self, Self::ThumbnailDefault | Self::ThumbnailPhoto)
    }
}

/// Opaque reference to a block's remote storage slot.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockLocator(String);

impl BlockLocator {
    /// Wrap a URL or token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw locator.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlockLocator {
    // Locators are frequently pre-signed URLs; keep them out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockLocator({} chars)", self.0.len())
    }
}

/// One unit of file content (or a thumbnail).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Validated index.
    pub index: BlockIndex,
    /// Remote storage slot.
    pub locator: BlockLocator,
    /// SHA-256 of the ciphertext, once known.
    pub content_hash: Option<ContentHash>,
    /// Detached signature over the plaintext, once signed.
    pub signature: Option<String>,
}

impl Block {
    /// Create a block, rejecting invalid indices.
    pub fn new(index: i64, locator: BlockLocator) -> crate::Result<Self> {
        Ok(Self {
            index: BlockIndex::new(index)?,
            locator,
            content_hash: None,
            signature: None,
        })
    }

    /// Attach the ciphertext hash.
    pub fn with_content_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        self
    }

    /// Attach the detached signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Derived block type.
    pub fn block_type(&self) -> BlockType {
        self.index.block_type()
    }
}
