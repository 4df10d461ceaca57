use chainrelay_chain::ChainIndex;
use chainrelay_primitives::{BlockHash32, LightBlock};

use crate::l1_client::{L1Client, L1ClientError};

/// How far back to search for a fork point before giving up. Ported from
/// `btcio/src/reader/reorg.rs`'s `MAX_REORG_DEPTH`.
pub const MAX_REORG_DEPTH: u64 = 6;

/// Checks whether `incoming_prev_hash`/`incoming_height` cleanly extends the
/// chain tail. If it doesn't, walks backward comparing the retained chain
/// against the external provider's canonical hash at each height, returning
/// the highest height at which they still agree (the fork point).
///
/// Grounded on `detect_reorg`/`find_fork_point_until` in
/// `btcio/src/reader/reorg.rs`, generalized from a `VecDeque<BlockHash>`
/// of recently-seen hashes to querying [`ChainIndex`] directly (which
/// already retains the same bounded tail).
pub async fn detect_reorg(
    chain: &ChainIndex,
    incoming_height: u64,
    incoming_prev_hash: BlockHash32,
    client: &dyn L1Client,
) -> Result<Option<u64>, L1ClientError> {
    let Some(tip) = chain.tip() else {
        return Ok(None);
    };
    if incoming_height == tip.height + 1 && incoming_prev_hash == tip.hash {
        return Ok(None);
    }
    let retained = chain.to_array();
    find_fork_point(&retained, client).await.map(Some)
}

/// Same check, but over an already-taken snapshot of the retained tail
/// rather than a live `&ChainIndex`. Lets callers holding the chain behind
/// a lock release it before the async hash-comparison loop instead of
/// holding it across awaits.
pub async fn detect_reorg_from_snapshot(
    retained: &[LightBlock],
    incoming_height: u64,
    incoming_prev_hash: BlockHash32,
    client: &dyn L1Client,
) -> Result<Option<u64>, L1ClientError> {
    let Some(tip) = retained.last() else {
        return Ok(None);
    };
    if incoming_height == tip.height + 1 && incoming_prev_hash == tip.hash {
        return Ok(None);
    }
    find_fork_point(retained, client).await.map(Some)
}

async fn find_fork_point(
    retained: &[LightBlock],
    client: &dyn L1Client,
) -> Result<u64, L1ClientError> {
    let tip_height = retained.last().expect("checked non-empty by caller").height;
    let floor = tip_height.saturating_sub(MAX_REORG_DEPTH);
    let front_height = retained.first().map(|b| b.height).unwrap_or(tip_height);

    for height in (floor..=tip_height).rev() {
        if height < front_height {
            continue;
        }
        let offset = (height - front_height) as usize;
        let Some(local) = retained.get(offset) else {
            continue;
        };
        let remote_hash = client.get_block_hash(height).await?;
        if local.hash == remote_hash {
            return Ok(height);
        }
    }

    tracing::warn!(tip_height, floor, "no fork point found within max reorg depth");
    Err(L1ClientError::NotFound { height: floor })
}
