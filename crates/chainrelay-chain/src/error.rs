use thiserror::Error;

/// Errors surfaced by callers that drive [`crate::ChainIndex`] -- the index
/// itself reports rejection via `bool` (spec.md §4.1: `addBlock`/
/// `addBlocks`/`truncateTo` all "fail" by returning false), but upstream
/// callers such as the ingestion pipeline need a typed reason to log and
/// react to. Mirrors `consensus-logic/src/errors.rs`'s `ChainTipError`
/// split between transient and structural failure.
#[derive(Debug, Error)]
pub enum ChainIndexError {
    #[error("block at height {height} does not extend current tip (expected prev {expected}, got {actual})")]
    NonConsecutiveBlock {
        height: u64,
        expected: String,
        actual: String,
    },
    #[error("batch of {len} blocks is not internally consecutive at index {index}")]
    NonConsecutiveBatch { len: usize, index: usize },
    #[error("truncate target height {target} is below the base sentinel {base}")]
    TruncateBelowBase { target: i64, base: i64 },
}
