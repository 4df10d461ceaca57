use async_trait::async_trait;
use chainrelay_primitives::{Block, BlockHash32};
use thiserror::Error;

/// Metadata for one block, as returned by a metadata-only L1 query. Mirrors
/// the teacher's `L1Client::get_block_hash` plus a total-size query folded
/// into one batched call, per spec.md §4.3 step 2 ("request metadata
/// (hash, total_size, height)").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMeta {
    pub height: u64,
    pub hash: BlockHash32,
    pub total_size: u64,
}

#[derive(Debug, Error)]
pub enum L1ClientError {
    #[error("L1 client transport error: {0}")]
    Transport(String),
    #[error("L1 client returned invalid metadata for height {height}")]
    InvalidMetadata { height: u64 },
    #[error("requested height {height} not found")]
    NotFound { height: u64 },
}

/// External blockchain collaborator, specified only by interface (spec.md
/// §1 lists "the Bitcoin protocol client" as deliberately out of core
/// scope). Grounded on `btcio/src/rpc/traits.rs`'s `L1Client` trait.
#[async_trait]
pub trait L1Client: Send + Sync {
    /// Current chain tip height as seen by the external provider.
    async fn get_tip_height(&self) -> Result<u64, L1ClientError>;

    /// Metadata-only query for a contiguous height range `[start, end]`
    /// inclusive. Every returned entry must have a non-null hash and
    /// height; callers treat anything else as an error.
    async fn get_block_metadata(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<BlockMeta>, L1ClientError>;

    /// Fetches the full block body at `height`.
    async fn get_block(&self, height: u64) -> Result<Block, L1ClientError>;

    /// Fetches just the hash at `height`, used for reorg-point detection.
    async fn get_block_hash(&self, height: u64) -> Result<BlockHash32, L1ClientError>;
}
