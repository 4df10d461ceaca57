//! Multi-component checks for outbox ordering and at-least-once delivery
//! that span `chainrelay-aggregates`, `chainrelay-store` and
//! `chainrelay-delivery` together.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chainrelay_aggregates::{Aggregate, MempoolAggregate, NetworkAggregate, RemoteHashSource};
use chainrelay_delivery::{DeliveryLoop, DeliveryLoopConfig, TickOutcome};
use chainrelay_primitives::{BlockHash32, LightBlock, RequestId};
use chainrelay_store::EventStore;
use chainrelay_transport::{Producer, ProducerConfig, ProducerManager, RawTransport, TransportError};
use parking_lot::Mutex;

struct NoopRemote;

impl RemoteHashSource for NoopRemote {
    fn hash_at(&self, _height: u64) -> Option<BlockHash32> {
        None
    }
}

fn light(height: u64, hash: u8, prev: u8) -> LightBlock {
    LightBlock {
        height,
        hash: BlockHash32([hash; 32]),
        previous_hash: BlockHash32([prev; 32]),
        merkle_root: BlockHash32::ZERO,
        size: 10,
        txids: vec![],
    }
}

/// Two successive `persistAggregatesAndOutbox` calls across two distinct
/// aggregates (Network, Mempool) produce strictly disjoint, ascending
/// outbox id ranges (spec.md §8 scenario 2).
#[test]
fn outbox_ids_stay_disjoint_and_ascending_across_calls() {
    let store = EventStore::open_in_memory().unwrap();

    let mut network = NetworkAggregate::new("network", 64, -1);
    network
        .propose_add_blocks(vec![light(0, 1, 0)], RequestId::new(), 1, &NoopRemote)
        .unwrap();
    let first = store
        .persist_aggregates_and_outbox(&mut [&mut network as &mut dyn Aggregate])
        .unwrap();
    let first_max = first.last_id.expect("first call produced rows");

    let mut mempool = MempoolAggregate::new("mempool");
    mempool
        .propose_add_tx(BlockHash32([7; 32]), vec![1, 2, 3], RequestId::new(), 2)
        .unwrap();
    let second = store
        .persist_aggregates_and_outbox(&mut [&mut mempool as &mut dyn Aggregate])
        .unwrap();
    let second_min = second.first_id.expect("second call produced rows");

    assert!(second_min > first_max, "second range ({second_min}) must exceed first range ({first_max})");
}

struct FlakyTransport {
    connected: AtomicBool,
    fail_next: AtomicBool,
}

#[async_trait]
impl RawTransport for FlakyTransport {
    async fn raw_send(&self, _json: &[u8]) -> Result<(), TransportError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Send("simulated transport failure".into()));
        }
        Ok(())
    }
    fn is_transport_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A publish failure leaves the watermark untouched and the row
/// undeleted; a subsequent successful tick delivers that same row and
/// advances the watermark (spec.md §8 scenario 3).
#[tokio::test]
async fn ack_failure_leaves_watermark_unchanged_then_recovers() {
    let store = Arc::new(EventStore::open_in_memory().unwrap());
    let mut mempool = MempoolAggregate::new("mempool");
    mempool
        .propose_add_tx(BlockHash32([9; 32]), vec![1, 2, 3], RequestId::new(), 1)
        .unwrap();
    store
        .persist_aggregates_and_outbox(&mut [&mut mempool as &mut dyn Aggregate])
        .unwrap();

    let transport = Arc::new(FlakyTransport {
        connected: AtomicBool::new(true),
        fail_next: AtomicBool::new(true),
    });
    let manager: Arc<ProducerManager<FlakyTransport>> = Arc::new(ProducerManager::new());
    let producer = Producer::new(transport.clone(), ProducerConfig::default());
    manager.register("primary", producer.clone());
    manager.set_streaming_producer(Some("primary".to_string()));

    let delivery = DeliveryLoop::new(store.clone(), manager, DeliveryLoopConfig::default());

    let failed = delivery.tick(|| 1).await;
    assert!(matches!(failed, TickOutcome::Error(_)), "{failed:?}");
    assert_eq!(delivery.last_seen_id(), 0);
    assert!(store.has_any_pending_after_watermark(0).unwrap());

    let ack_producer = producer.clone();
    tokio::spawn(async move {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        ack_producer
            .resolve_ack(serde_json::json!({"all_ok": true, "ok_indices": [0]}))
            .await;
    });

    let recovered = delivery.tick(|| 1).await;
    assert!(matches!(recovered, TickOutcome::Delivered(1)), "{recovered:?}");
    assert!(delivery.last_seen_id() > 0);
    assert!(!store.has_any_pending_after_watermark(0).unwrap());
}

#[allow(dead_code)]
fn _silence_unused_mutex_import(_: &Mutex<()>) {}
