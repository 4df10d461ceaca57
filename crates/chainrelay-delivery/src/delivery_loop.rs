use std::sync::Arc;
use std::time::Duration;

use chainrelay_primitives::{OutboxRow, WireEvent};
use chainrelay_store::EventStore;
use chainrelay_transport::{ProducerManager, RawTransport};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use crate::error::DeliveryError;

pub struct DeliveryLoopConfig {
    /// Byte budget handed to `select_pending_rows` per chunk.
    pub budget_bytes: u64,
    /// How long to wait for producer connectivity before giving up on a
    /// tick (spec.md §4.6: "Await producer connectivity up to 5 seconds").
    pub connect_timeout: Duration,
    /// Periodic sweep cadence used when no new-event notification arrives.
    pub sweep_interval: Duration,
}

impl Default for DeliveryLoopConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 1_000_000,
            connect_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    NoStreamingProducer,
    Offline,
    Idle,
    Delivered(usize),
    AckFailed,
    Error(DeliveryError),
}

/// Drains outbox rows through the selected [`chainrelay_transport::Producer`]
/// with at-least-once delivery and a single in-flight ACK. Grounded on
/// `PullLoader::run`'s timer-driven `tokio::select!` loop shape, adapted
/// from a pull-side polling cadence to a push-side drain gated by both a
/// new-event notification and a periodic sweep (spec.md §4.6: "triggered
/// by new-event notification or a periodic sweep").
pub struct DeliveryLoop<T: RawTransport> {
    store: Arc<EventStore>,
    manager: Arc<ProducerManager<T>>,
    config: DeliveryLoopConfig,
    last_seen_id: Mutex<i64>,
    notify: Notify,
}

impl<T: RawTransport + 'static> DeliveryLoop<T> {
    pub fn new(store: Arc<EventStore>, manager: Arc<ProducerManager<T>>, config: DeliveryLoopConfig) -> Self {
        Self {
            store,
            manager,
            config,
            last_seen_id: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    pub fn last_seen_id(&self) -> i64 {
        *self.last_seen_id.lock()
    }

    /// Wakes a sleeping `run` loop immediately, e.g. right after a write
    /// path persists new outbox rows.
    pub fn notify_new_events(&self) {
        self.notify.notify_one();
    }

    pub async fn tick(&self, timestamp_fn: fn() -> u64) -> TickOutcome {
        let Some(producer) = self.manager.get_streaming() else {
            return TickOutcome::NoStreamingProducer;
        };
        if producer.wait_for_online(self.config.connect_timeout).await.is_err() {
            return TickOutcome::Offline;
        }

        let last_seen_id = self.last_seen_id();
        let chunk = match self.store.select_pending_rows(last_seen_id, self.config.budget_bytes) {
            Ok(chunk) => chunk,
            Err(err) => return TickOutcome::Error(err.into()),
        };
        if chunk.is_empty() {
            return TickOutcome::Idle;
        }

        let wire_events = match self.frame(&chunk) {
            Ok(events) => events,
            Err(err) => return TickOutcome::Error(err),
        };

        let ack = match self.manager.stream_wire_with_ack(wire_events, timestamp_fn).await {
            Ok(ack) => ack,
            Err(err) => return TickOutcome::Error(err.into()),
        };
        if !ack.all_ok {
            return TickOutcome::AckFailed;
        }

        let ids: Vec<i64> = chunk.iter().map(|row| row.id).collect();
        if let Err(err) = self.store.delete_outbox_by_ids(&ids) {
            return TickOutcome::Error(err.into());
        }
        let new_last_seen_id = *ids.last().expect("chunk checked non-empty above");
        *self.last_seen_id.lock() = new_last_seen_id;
        TickOutcome::Delivered(ids.len())
    }

    /// Serializes rows once into the wire shape (spec.md §4.6 framing:
    /// `{modelName, eventType, eventVersion, requestId, blockHeight,
    /// payload as JSON string (decompressed), timestamp}`). Payloads are
    /// stored as opaque (Borsh-encoded) bytes rather than JSON text, so
    /// "payload as a JSON string" is satisfied by carrying the
    /// decompressed bytes hex-encoded inside a JSON string value, not by
    /// reinterpreting the bytes as JSON.
    fn frame(&self, chunk: &[OutboxRow]) -> Result<Vec<WireEvent>, DeliveryError> {
        chunk
            .iter()
            .map(|row| {
                let payload = self.store.decompress_row_payload(row)?;
                Ok(WireEvent {
                    model_name: row.aggregate_id.clone(),
                    event_type: row.event_type.clone(),
                    event_version: row.event_version,
                    request_id: row.request_id,
                    block_height: row.block_height,
                    payload: hex::encode(payload),
                    timestamp: row.timestamp_micros,
                })
            })
            .collect()
    }

    /// Drives `tick` until `shutdown` fires, waking early on
    /// `notify_new_events` or the sweep interval, whichever comes first.
    pub async fn run(&self, timestamp_fn: fn() -> u64, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.tick(timestamp_fn).await {
                TickOutcome::Delivered(n) => tracing::debug!(delivered = n, "delivery loop drained outbox chunk"),
                TickOutcome::AckFailed => tracing::warn!("delivery loop ack failed or timed out, chunk retained"),
                TickOutcome::Error(err) => tracing::warn!(%err, "delivery loop tick failed"),
                TickOutcome::Offline | TickOutcome::NoStreamingProducer | TickOutcome::Idle => {}
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {}
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chainrelay_aggregates::{Aggregate, MempoolAggregate};
    use chainrelay_primitives::{BlockHash32, RequestId};
    use chainrelay_transport::{Producer, ProducerConfig, TransportError};

    use super::*;

    struct StubTransport {
        connected: AtomicBool,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl StubTransport {
        fn new(connected: bool) -> Self {
            Self {
                connected: AtomicBool::new(connected),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RawTransport for StubTransport {
        async fn raw_send(&self, json: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().push(json.to_vec());
            Ok(())
        }
        fn is_transport_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn seeded_store() -> Arc<EventStore> {
        let store = EventStore::open_in_memory().unwrap();
        let mut mp = MempoolAggregate::new("mempool");
        mp.propose_add_tx(BlockHash32([9; 32]), vec![1, 2, 3], RequestId::new(), 1).unwrap();
        let mut aggs: Vec<&mut dyn Aggregate> = vec![&mut mp];
        store.persist_aggregates_and_outbox(&mut aggs).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn no_streaming_producer_yields_neutral_outcome() {
        let store = seeded_store();
        let manager: Arc<ProducerManager<StubTransport>> = Arc::new(ProducerManager::new());
        let delivery = DeliveryLoop::new(store, manager, DeliveryLoopConfig::default());
        assert!(matches!(delivery.tick(|| 1).await, TickOutcome::NoStreamingProducer));
    }

    #[tokio::test]
    async fn offline_producer_is_reported_without_touching_the_chunk() {
        let store = seeded_store();
        let manager: Arc<ProducerManager<StubTransport>> = Arc::new(ProducerManager::new());
        let producer = Producer::new(Arc::new(StubTransport::new(false)), ProducerConfig::default());
        manager.register("primary", producer);
        manager.set_streaming_producer(Some("primary".to_string()));

        let mut config = DeliveryLoopConfig::default();
        config.connect_timeout = Duration::from_millis(50);
        let delivery = DeliveryLoop::new(store, manager, config);
        assert!(matches!(delivery.tick(|| 1).await, TickOutcome::Offline));
        assert_eq!(delivery.last_seen_id(), 0);
    }

    #[tokio::test]
    async fn delivered_chunk_advances_watermark_and_deletes_rows() {
        let store = seeded_store();
        let manager: Arc<ProducerManager<StubTransport>> = Arc::new(ProducerManager::new());
        let producer = Producer::new(Arc::new(StubTransport::new(true)), ProducerConfig::default());
        manager.register("primary", producer.clone());
        manager.set_streaming_producer(Some("primary".to_string()));

        let delivery = DeliveryLoop::new(store.clone(), manager, DeliveryLoopConfig::default());

        // The Producer's wait_for_ack blocks until resolve_ack is called;
        // simulate the remote Consumer ACKing immediately via a background
        // task so the tick's await resolves.
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
        assert!(matches!(outcome, TickOutcome::Delivered(1)), "{outcome:?}");
        assert!(delivery.last_seen_id() > 0);
        assert!(!store.has_any_pending_after_watermark(0).unwrap());
    }
}
