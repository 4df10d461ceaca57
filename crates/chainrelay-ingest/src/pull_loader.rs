use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chainrelay_chain::ChainIndex;
use chainrelay_common::retry::{retry_with_backoff_async, ExponentialBackoff};
use chainrelay_common::timer::ExponentialTimer;
use chainrelay_queue::BlockQueue;
use parking_lot::Mutex;
use thiserror::Error;

use crate::l1_client::{BlockMeta, L1Client, L1ClientError};
use crate::reorg;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    L1(#[from] L1ClientError),
    #[error("metadata for height {height} missing hash/height")]
    InvalidMetadata { height: u64 },
    #[error(transparent)]
    Queue(#[from] chainrelay_queue::BlockQueueError),
}

/// What one [`PullLoader::tick`] accomplished, used by the driving loop to
/// decide whether to fast-follow or back off.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// `queue.lastHeight >= tip`: nothing to do, monitoring mode.
    AtTip,
    /// A batch's worth of bytes would have overflowed the queue; metadata
    /// stays cached for the next tick.
    SkippedQueueFull,
    /// Fetched and enqueued `usize` blocks.
    Fetched(usize),
}

pub struct PullLoaderConfig {
    pub initial_max_preload_count: u64,
    pub max_request_blocks_batch_size: u64,
    pub fetch_retry_attempts: u16,
    pub fetch_retry_backoff: ExponentialBackoff,
}

/// Adaptive preloader + parallel fetcher that fills [`BlockQueue`] up to
/// the network tip. Grounded on `btcio/src/reader/mod.rs`'s
/// `bitcoin_data_reader_task` polling loop, generalized from a single
/// next-height poll to a self-tuning batch-ahead strategy per spec.md
/// §4.3.
pub struct PullLoader {
    client: Arc<dyn L1Client>,
    queue: Arc<BlockQueue>,
    chain: Arc<Mutex<ChainIndex>>,
    config: PullLoaderConfig,
    preloaded_metadata: VecDeque<BlockMeta>,
    max_preload_count: u64,
    last_duration: Option<Duration>,
    previous_duration: Option<Duration>,
}

impl PullLoader {
    pub fn new(
        client: Arc<dyn L1Client>,
        queue: Arc<BlockQueue>,
        chain: Arc<Mutex<ChainIndex>>,
        config: PullLoaderConfig,
    ) -> Self {
        let max_preload_count = config.initial_max_preload_count;
        Self {
            client,
            queue,
            chain,
            config,
            preloaded_metadata: VecDeque::new(),
            max_preload_count,
            last_duration: None,
            previous_duration: None,
        }
    }

    pub fn max_preload_count(&self) -> u64 {
        self.max_preload_count
    }

    /// On error: the caller is expected to clear cached preload metadata
    /// and reset its timer to retry immediately (spec.md §4.3's error
    /// handling is a driving-loop concern, not a `tick` concern).
    pub fn clear_preloaded_metadata(&mut self) {
        self.preloaded_metadata.clear();
    }

    /// Prefix of `preloaded_metadata` whose cumulative `total_size` does
    /// not exceed the batch byte budget, always at least one entry.
    fn peek_drain_prefix(&self) -> Vec<BlockMeta> {
        let mut out = Vec::new();
        let mut acc = 0u64;
        for m in self.preloaded_metadata.iter() {
            if !out.is_empty() && acc + m.total_size > self.config.max_request_blocks_batch_size {
                break;
            }
            acc += m.total_size;
            out.push(m.clone());
        }
        out
    }

    pub async fn tick(&mut self) -> Result<TickOutcome, IngestError> {
        let tip = self.client.get_tip_height().await?;
        let last_height = self.queue.last_height();

        if last_height >= 0 && last_height as u64 >= tip {
            return Ok(TickOutcome::AtTip);
        }

        if self.preloaded_metadata.is_empty() {
            let start_height = (last_height + 1) as u64;
            if start_height > tip {
                return Ok(TickOutcome::AtTip);
            }
            let count = self.max_preload_count.min(tip - start_height + 1);
            let end_height = start_height + count - 1;
            let metas = self.client.get_block_metadata(start_height, end_height).await?;
            for m in &metas {
                if m.hash.is_zero() {
                    return Err(IngestError::InvalidMetadata { height: m.height });
                }
            }
            self.preloaded_metadata.extend(metas);
        }

        let prefix = self.peek_drain_prefix();
        if prefix.is_empty() {
            return Ok(TickOutcome::AtTip);
        }

        let prefix_bytes: u64 = prefix.iter().map(|m| m.total_size).sum();
        if self.queue.current_size() + prefix_bytes > self.queue.max_queue_size() {
            return Ok(TickOutcome::SkippedQueueFull);
        }

        let start = Instant::now();
        let mut fetched = 0usize;
        for meta in &prefix {
            self.preloaded_metadata.pop_front();
            let current_last = self.queue.last_height();
            if current_last >= 0 && meta.height <= current_last as u64 {
                continue;
            }
            let client = self.client.clone();
            let height = meta.height;
            let block = retry_with_backoff_async(
                "fetch_block",
                self.config.fetch_retry_attempts,
                &self.config.fetch_retry_backoff,
                || {
                    let client = client.clone();
                    async move { client.get_block(height).await }
                },
            )
            .await?;

            let chain_snapshot = self.chain.lock().to_array();
            if let Some(fork_height) = reorg::detect_reorg_from_snapshot(
                &chain_snapshot,
                block.height,
                block.previous_hash,
                self.client.as_ref(),
            )
            .await?
            {
                tracing::warn!(fork_height, "reorg detected, truncating chain and queue");
                self.chain.lock().truncate_to(fork_height as i64);
                self.queue.reorganize(fork_height as i64);
                self.preloaded_metadata.clear();
                return Ok(TickOutcome::Fetched(fetched));
            }

            self.chain.lock().add_block(block.to_light());
            self.queue.enqueue(&block)?;
            fetched += 1;
        }

        let elapsed = start.elapsed();
        self.previous_duration = self.last_duration;
        self.last_duration = Some(elapsed);
        self.retune_preload_count();

        Ok(TickOutcome::Fetched(fetched))
    }

    /// Adjusts `max_preload_count` based on the ratio of the last two tick
    /// durations: faster ticks mean we should look further ahead, slower
    /// ticks mean we're outrunning downstream capacity. Integer ratio
    /// comparison avoids floating point, per the teacher's fixed-point
    /// backoff convention.
    fn retune_preload_count(&mut self) {
        let (Some(last), Some(previous)) = (self.last_duration, self.previous_duration) else {
            return;
        };
        let last_ms = last.as_millis() as u64;
        let prev_ms = previous.as_millis().max(1) as u64;

        if last_ms * 10 > prev_ms * 12 {
            self.max_preload_count = self.max_preload_count * 5 / 4;
        } else if last_ms * 10 < prev_ms * 8 {
            self.max_preload_count = (self.max_preload_count * 3 / 4).max(1);
        }
    }

    /// Drives `tick` on an exponential-backoff cadence until `shutdown`
    /// fires. On success at the tip, the timer keeps backing off toward
    /// its cap (monitoring cadence); on a productive tick it resets to the
    /// floor (fast-follow); on error it clears cached metadata and retries
    /// immediately.
    pub async fn run(
        &mut self,
        mut timer: ExponentialTimer,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.tick().await {
                Ok(TickOutcome::Fetched(n)) if n > 0 => {
                    tracing::debug!(fetched = n, "pull loader fetched blocks");
                    timer.reset();
                }
                Ok(TickOutcome::Fetched(_)) | Ok(TickOutcome::AtTip) => {
                    timer.backoff();
                }
                Ok(TickOutcome::SkippedQueueFull) => {
                    tracing::debug!("pull loader skipped tick: queue full");
                    timer.backoff();
                }
                Err(err) => {
                    tracing::warn!(%err, "pull loader tick failed, resetting strategy");
                    self.clear_preloaded_metadata();
                    timer.reset();
                    continue;
                }
            }
            tokio::select! {
                _ = timer.wait() => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chainrelay_primitives::{Block, BlockHash32};

    use super::*;

    struct StubClient {
        tip: u64,
        blocks: StdMutex<std::collections::HashMap<u64, Block>>,
    }

    #[async_trait]
    impl L1Client for StubClient {
        async fn get_tip_height(&self) -> Result<u64, L1ClientError> {
            Ok(self.tip)
        }

        async fn get_block_metadata(
            &self,
            start: u64,
            end: u64,
        ) -> Result<Vec<BlockMeta>, L1ClientError> {
            let blocks = self.blocks.lock().unwrap();
            Ok((start..=end)
                .filter_map(|h| blocks.get(&h))
                .map(|b| BlockMeta {
                    height: b.height,
                    hash: b.hash,
                    total_size: b.size,
                })
                .collect())
        }

        async fn get_block(&self, height: u64) -> Result<Block, L1ClientError> {
            self.blocks
                .lock()
                .unwrap()
                .get(&height)
                .cloned()
                .ok_or(L1ClientError::NotFound { height })
        }

        async fn get_block_hash(&self, height: u64) -> Result<BlockHash32, L1ClientError> {
            self.blocks
                .lock()
                .unwrap()
                .get(&height)
                .map(|b| b.hash)
                .ok_or(L1ClientError::NotFound { height })
        }
    }

    fn blk(height: u64, size: u64) -> Block {
        Block {
            height,
            hash: BlockHash32([height as u8 + 1; 32]),
            previous_hash: BlockHash32([height as u8; 32]),
            merkle_root: BlockHash32::ZERO,
            size,
            txids: vec![],
            raw_header: vec![],
        }
    }

    fn loader(tip: u64, blocks: Vec<Block>, max_queue: u64, max_batch: u64) -> PullLoader {
        let mut map = std::collections::HashMap::new();
        for b in blocks {
            map.insert(b.height, b);
        }
        let client = Arc::new(StubClient {
            tip,
            blocks: StdMutex::new(map),
        });
        let queue = Arc::new(BlockQueue::new(max_queue, 1_000_000, -1));
        let chain = Arc::new(Mutex::new(ChainIndex::new(100, -1)));
        PullLoader::new(
            client,
            queue,
            chain,
            PullLoaderConfig {
                initial_max_preload_count: 4,
                max_request_blocks_batch_size: max_batch,
                fetch_retry_attempts: 2,
                fetch_retry_backoff: ExponentialBackoff::new(1, 2, 1),
            },
        )
    }

    #[tokio::test]
    async fn at_tip_when_queue_caught_up() {
        let mut loader = loader(0, vec![], 1_000_000, 1_000_000);
        // queue starts at sentinel -1, tip is 0: -1 is not >= 0, so it will
        // try to preload metadata for height 0 and find nothing -> AtTip
        // via empty prefix.
        let outcome = loader.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::AtTip);
    }

    #[tokio::test]
    async fn fetches_and_enqueues_available_blocks() {
        let blocks = vec![blk(0, 100), blk(1, 100), blk(2, 100)];
        let mut loader = loader(2, blocks, 1_000_000, 1_000_000);
        let outcome = loader.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Fetched(3));
        assert_eq!(loader.queue.last_height(), 2);
    }

    #[tokio::test]
    async fn skips_tick_when_batch_would_overflow_queue() {
        let blocks = vec![blk(0, 500), blk(1, 500)];
        let mut loader = loader(1, blocks, 600, 1_000_000);
        let outcome = loader.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::SkippedQueueFull);
        assert_eq!(loader.queue.len(), 0);
    }

    #[tokio::test]
    async fn invalid_metadata_is_rejected() {
        let mut bad_block = blk(0, 100);
        bad_block.hash = BlockHash32::ZERO;
        let mut loader = loader(0, vec![bad_block], 1_000_000, 1_000_000);
        let err = loader.tick().await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidMetadata { height: 0 }));
    }

    #[tokio::test]
    async fn retunes_preload_count_after_two_ticks() {
        let blocks = (0..10).map(|h| blk(h, 10)).collect::<Vec<_>>();
        let mut loader = loader(9, blocks, 1_000_000, 20);
        let before = loader.max_preload_count();
        loader.tick().await.unwrap();
        loader.tick().await.unwrap();
        // Not asserting direction (timing-dependent), just that retuning
        // logic runs without panicking and stays >= 1.
        assert!(loader.max_preload_count() >= 1);
        let _ = before;
    }
}
