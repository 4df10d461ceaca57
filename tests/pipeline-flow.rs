//! End-to-end walk of the full ingestion pipeline: a stub L1 feed drives
//! `PullLoader` into `BlockQueue`, `BatchIterator` hands batches to a
//! `NetworkAggregate`-backed executor, events land in `EventStore`, and
//! `DeliveryLoop` drains the outbox out through a stub transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chainrelay_aggregates::{Aggregate, NetworkAggregate, RemoteHashSource};
use chainrelay_chain::ChainIndex;
use chainrelay_common::retry::ExponentialBackoff;
use chainrelay_delivery::{DeliveryLoop, DeliveryLoopConfig};
use chainrelay_ingest::batch_iterator::{BatchAck, BatchExecutor, BatchExecutorError};
use chainrelay_ingest::l1_client::{BlockMeta, L1Client, L1ClientError};
use chainrelay_ingest::{BatchIterator, PullLoader, PullLoaderConfig};
use chainrelay_primitives::{Block, BlockHash32, LightBlock, RequestId};
use chainrelay_queue::BlockQueue;
use chainrelay_store::EventStore;
use chainrelay_transport::{Producer, ProducerConfig, ProducerManager, RawTransport, TransportError};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

struct StubL1 {
    blocks: Vec<Block>,
}

#[async_trait]
impl L1Client for StubL1 {
    async fn get_tip_height(&self) -> Result<u64, L1ClientError> {
        Ok(self.blocks.last().map(|b| b.height).unwrap_or(0))
    }

    async fn get_block_metadata(&self, start: u64, end: u64) -> Result<Vec<BlockMeta>, L1ClientError> {
        Ok(self
            .blocks
            .iter()
            .filter(|b| b.height >= start && b.height <= end)
            .map(|b| BlockMeta {
                height: b.height,
                hash: b.hash,
                total_size: b.size,
            })
            .collect())
    }

    async fn get_block(&self, height: u64) -> Result<Block, L1ClientError> {
        self.blocks
            .iter()
            .find(|b| b.height == height)
            .cloned()
            .ok_or(L1ClientError::NotFound { height })
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash32, L1ClientError> {
        self.blocks
            .iter()
            .find(|b| b.height == height)
            .map(|b| b.hash)
            .ok_or(L1ClientError::NotFound { height })
    }
}

struct StubRemoteHashSource {
    hashes: HashMap<u64, BlockHash32>,
}

impl RemoteHashSource for StubRemoteHashSource {
    fn hash_at(&self, height: u64) -> Option<BlockHash32> {
        self.hashes.get(&height).copied()
    }
}

struct StubTransport {
    sent: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl RawTransport for StubTransport {
    async fn raw_send(&self, json: &[u8]) -> Result<(), TransportError> {
        self.sent.lock().push(json.to_vec());
        Ok(())
    }
    fn is_transport_connected(&self) -> bool {
        true
    }
}

struct NetworkExecutor {
    aggregate: Arc<Mutex<NetworkAggregate>>,
    queue: Arc<BlockQueue>,
    store: Arc<EventStore>,
    remote: StubRemoteHashSource,
    delivered: AsyncMutex<usize>,
}

#[async_trait]
impl BatchExecutor for NetworkExecutor {
    async fn handle_batch(
        &self,
        batch: Vec<LightBlock>,
        request_id: RequestId,
        ack: BatchAck,
    ) -> Result<(), BatchExecutorError> {
        let hashes: Vec<BlockHash32> = batch.iter().map(|b| b.hash).collect();
        let mut aggregate = self.aggregate.lock();
        let outcome = aggregate
            .propose_add_blocks(batch, request_id, 1, &self.remote)
            .map_err(|err| BatchExecutorError::Rejected(err.to_string()))?;
        if outcome.is_some() {
            self.store
                .persist_aggregates_and_outbox(&mut [&mut *aggregate as &mut dyn Aggregate])
                .map_err(|err| BatchExecutorError::Rejected(err.to_string()))?;
            *self.delivered.lock().await += hashes.len();
        }
        drop(aggregate);
        self.queue.dequeue_many(&hashes).ok();
        ack.ack();
        Ok(())
    }
}

fn chain_block(height: u64, hash: u8, prev: u8, size: u64) -> Block {
    Block {
        height,
        hash: BlockHash32([hash; 32]),
        previous_hash: BlockHash32([prev; 32]),
        merkle_root: BlockHash32::ZERO,
        size,
        txids: vec![],
        raw_header: vec![],
    }
}

#[tokio::test]
async fn blocks_flow_from_l1_through_to_wire_delivery() {
    let chain_blocks = vec![
        chain_block(0, 1, 0, 50),
        chain_block(1, 2, 1, 50),
        chain_block(2, 3, 2, 50),
    ];
    let mut hashes = HashMap::new();
    for b in &chain_blocks {
        hashes.insert(b.height, b.hash);
    }

    let client: Arc<dyn L1Client> = Arc::new(StubL1 { blocks: chain_blocks });
    let queue = Arc::new(BlockQueue::new(10_000, 1_000, -1));
    let pull_chain = Arc::new(Mutex::new(ChainIndex::new(64, -1)));
    let pull_loader_config = PullLoaderConfig {
        initial_max_preload_count: 10,
        max_request_blocks_batch_size: 10_000,
        fetch_retry_attempts: 1,
        fetch_retry_backoff: ExponentialBackoff::new(10, 2, 1),
    };
    let mut pull_loader = PullLoader::new(client.clone(), queue.clone(), pull_chain, pull_loader_config);

    let mut total_fetched = 0usize;
    loop {
        match pull_loader.tick().await.unwrap() {
            chainrelay_ingest::TickOutcome::AtTip => break,
            chainrelay_ingest::TickOutcome::Fetched(n) => total_fetched += n,
            chainrelay_ingest::TickOutcome::SkippedQueueFull => panic!("queue should not overflow in this test"),
        }
    }
    assert_eq!(total_fetched, 3);
    assert_eq!(queue.len(), 3);

    let store = Arc::new(EventStore::open_in_memory().unwrap());
    let aggregate = Arc::new(Mutex::new(NetworkAggregate::new("network", 64, -1)));
    let executor = Arc::new(NetworkExecutor {
        aggregate,
        queue: queue.clone(),
        store: store.clone(),
        remote: StubRemoteHashSource { hashes },
        delivered: AsyncMutex::new(0),
    });
    let iterator = BatchIterator::new(queue.clone(), executor.clone(), 10_000);

    loop {
        match iterator.tick().await {
            chainrelay_ingest::IteratorTickOutcome::Dispatched => {}
            chainrelay_ingest::IteratorTickOutcome::Idle => break,
            chainrelay_ingest::IteratorTickOutcome::ExecutorRejected => panic!("executor should not reject"),
        }
    }
    assert_eq!(*executor.delivered.lock().await, 3);
    assert!(queue.is_empty());

    let transport = Arc::new(StubTransport { sent: Mutex::new(Vec::new()) });
    let manager: Arc<ProducerManager<StubTransport>> = Arc::new(ProducerManager::new());
    let producer = Producer::new(transport.clone(), ProducerConfig::default());
    manager.register("primary", producer.clone());
    manager.set_streaming_producer(Some("primary".to_string()));

    let delivery = DeliveryLoop::new(store.clone(), manager, DeliveryLoopConfig::default());

    let ack_producer = producer.clone();
    tokio::spawn(async move {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        ack_producer
            .resolve_ack(serde_json::json!({"all_ok": true, "ok_indices": [0]}))
            .await;
    });

    let outcome = delivery.tick(|| 1).await;
    assert!(matches!(outcome, chainrelay_delivery::TickOutcome::Delivered(1)), "{outcome:?}");
    assert!(!store.has_any_pending_after_watermark(0).unwrap());
    assert_eq!(transport.sent.lock().len(), 1);
}
